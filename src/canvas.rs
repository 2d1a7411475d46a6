//! 2D canvas collaborator contract and the tiny-skia rasterizer.

use tiny_skia::{
    FillRule, FilterQuality, Paint, PathBuilder, Pattern, Pixmap, Shader, SpreadMode, Stroke,
    StrokeDash, Transform,
};

use crate::Error;
use crate::color::Color;
use crate::sprite::Sprite;

/// Line ending style.
#[derive(PartialEq, Eq, Copy, Clone, Default, Debug)]
pub enum LineCap {
    #[default]
    Butt,
    Round,
    Square,
}

/// Corner style of joined line segments.
#[derive(PartialEq, Eq, Copy, Clone, Default, Debug)]
pub enum LineJoin {
    #[default]
    Miter,
    Bevel,
    Round,
}

/// Parameters for stroking the current path.
#[derive(Clone, Debug)]
pub struct StrokeStyle {
    pub color: Color,
    /// Sprite stroked as a repeating pattern instead of the color.
    pub pattern: Option<Sprite>,
    /// Stroke width in canvas pixels.
    pub width: f32,
    pub cap: LineCap,
    pub join: LineJoin,
    pub miter_limit: f32,
    /// Alternating dash and gap lengths in canvas pixels.
    pub dash: Option<Vec<f32>>,
    /// Canvas pixels per pattern pixel.
    pub pattern_scale: f32,
}

impl Default for StrokeStyle {
    fn default() -> Self {
        Self {
            color: Color::BLACK,
            pattern: None,
            width: 1.,
            cap: LineCap::default(),
            join: LineJoin::default(),
            miter_limit: 2.,
            dash: None,
            pattern_scale: 1.,
        }
    }
}

/// Drawing surface for one tile render.
///
/// Paths are built with `move_to`/`line_to`/`close_path` in canvas pixel
/// coordinates; `fill`, `fill_pattern` and `stroke` consume the path.
pub trait Canvas {
    /// Edge length of the square target in pixels.
    fn size(&self) -> u32;

    fn move_to(&mut self, x: f32, y: f32);

    fn line_to(&mut self, x: f32, y: f32);

    fn close_path(&mut self);

    /// Flood the entire target with a color.
    fn paint_background(&mut self, color: Color);

    /// Fill the current path.
    fn fill(&mut self, color: Color);

    /// Fill the current path with a repeating sprite pattern.
    ///
    /// `scale` is the number of canvas pixels per pattern pixel.
    fn fill_pattern(&mut self, sprite: &Sprite, opacity: f32, scale: f32);

    /// Stroke the current path.
    fn stroke(&mut self, style: &StrokeStyle);
}

/// Software rasterizer drawing into a [`Pixmap`].
pub struct PixmapCanvas {
    pixmap: Pixmap,
    path: PathBuilder,
}

impl PixmapCanvas {
    pub fn new(size: u32) -> Result<Self, Error> {
        let pixmap = Pixmap::new(size, size)
            .ok_or_else(|| Error::Failed(format!("cannot allocate {size}x{size} raster")))?;

        Ok(Self { pixmap, path: PathBuilder::new() })
    }

    /// Take the finished raster.
    pub fn into_pixmap(self) -> Pixmap {
        self.pixmap
    }

    /// Consume the pending path, if it is non-empty.
    fn take_path(&mut self) -> Option<tiny_skia::Path> {
        std::mem::replace(&mut self.path, PathBuilder::new()).finish()
    }
}

fn skia_color(color: Color) -> tiny_skia::Color {
    tiny_skia::Color::from_rgba(
        color.r.clamp(0., 1.),
        color.g.clamp(0., 1.),
        color.b.clamp(0., 1.),
        color.a.clamp(0., 1.),
    )
    .unwrap_or(tiny_skia::Color::BLACK)
}

fn solid_paint<'a>(color: Color) -> Paint<'a> {
    let mut paint = Paint::default();
    paint.anti_alias = true;
    paint.shader = Shader::SolidColor(skia_color(color));
    paint
}

impl Canvas for PixmapCanvas {
    fn size(&self) -> u32 {
        self.pixmap.width()
    }

    fn move_to(&mut self, x: f32, y: f32) {
        self.path.move_to(x, y);
    }

    fn line_to(&mut self, x: f32, y: f32) {
        // tiny-skia panics on a line without a starting point.
        if self.path.is_empty() {
            self.path.move_to(x, y);
        } else {
            self.path.line_to(x, y);
        }
    }

    fn close_path(&mut self) {
        self.path.close();
    }

    fn paint_background(&mut self, color: Color) {
        self.pixmap.fill(skia_color(color));
    }

    fn fill(&mut self, color: Color) {
        let Some(path) = self.take_path() else { return };

        // The even-odd rule handles interior rings regardless of their
        // winding order.
        self.pixmap.fill_path(
            &path,
            &solid_paint(color),
            FillRule::EvenOdd,
            Transform::identity(),
            None,
        );
    }

    fn fill_pattern(&mut self, sprite: &Sprite, opacity: f32, scale: f32) {
        let Some(path) = self.take_path() else { return };
        let Some(region) = sprite.region() else { return };

        let mut paint = Paint::default();
        paint.anti_alias = true;
        paint.shader = Pattern::new(
            region.as_ref(),
            SpreadMode::Repeat,
            FilterQuality::Bilinear,
            opacity.clamp(0., 1.),
            Transform::from_scale(scale, scale),
        );

        self.pixmap.fill_path(&path, &paint, FillRule::EvenOdd, Transform::identity(), None);
    }

    fn stroke(&mut self, style: &StrokeStyle) {
        let Some(path) = self.take_path() else { return };

        let dash = style.dash.as_ref().and_then(|dash| {
            // An odd dash list repeats itself, like SVG.
            let mut dash = dash.clone();
            if dash.len() % 2 == 1 {
                let copy = dash.clone();
                dash.extend_from_slice(&copy);
            }
            StrokeDash::new(dash, 0.)
        });

        let stroke = Stroke {
            width: style.width,
            miter_limit: style.miter_limit,
            line_cap: match style.cap {
                LineCap::Butt => tiny_skia::LineCap::Butt,
                LineCap::Round => tiny_skia::LineCap::Round,
                LineCap::Square => tiny_skia::LineCap::Square,
            },
            line_join: match style.join {
                LineJoin::Miter => tiny_skia::LineJoin::Miter,
                LineJoin::Bevel => tiny_skia::LineJoin::Bevel,
                LineJoin::Round => tiny_skia::LineJoin::Round,
            },
            dash,
        };

        let region;
        let mut paint = solid_paint(style.color);
        if let Some(sprite) = &style.pattern
            && let Some(pattern_region) = sprite.region()
        {
            region = pattern_region;
            paint.shader = Pattern::new(
                region.as_ref(),
                SpreadMode::Repeat,
                FilterQuality::Bilinear,
                1.,
                Transform::from_scale(style.pattern_scale, style.pattern_scale),
            );
        }

        self.pixmap.stroke_path(&path, &paint, &stroke, Transform::identity(), None);
    }
}
