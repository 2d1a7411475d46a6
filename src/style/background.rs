//! Background style layers.

use std::sync::Arc;

use serde_json::Value as Json;

use crate::Error;
use crate::canvas::Canvas;
use crate::color::Color;
use crate::expr::Expression;
use crate::scope::RenderScope;
use crate::style::compile_member;

/// A layer painting the whole tile with a single color.
pub struct BackgroundLayer {
    color: Arc<Expression>,
    opacity: Arc<Expression>,
}

impl BackgroundLayer {
    pub(crate) fn from_json(paint: Option<&serde_json::Map<String, Json>>) -> Result<Self, Error> {
        Ok(Self {
            color: compile_member(paint, "background-color")?,
            opacity: compile_member(paint, "background-opacity")?,
        })
    }

    pub(crate) fn render(&self, scope: &RenderScope<'_>, canvas: &mut dyn Canvas) {
        let color = self.color.eval_color(scope, Color::BLACK);
        let opacity = self.opacity.eval_number(scope, 1.) as f32;
        canvas.paint_background(color.with_opacity(opacity));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::PixmapCanvas;

    #[test]
    fn paints_the_whole_tile() {
        let paint: Json = serde_json::from_str(
            r##"{"background-color": "#ff0000", "background-opacity": 0.5}"##,
        )
        .unwrap();
        let layer = BackgroundLayer::from_json(paint.as_object()).unwrap();

        let mut canvas = PixmapCanvas::new(8).unwrap();
        layer.render(&RenderScope::new(0., 1.), &mut canvas);

        let pixmap = canvas.into_pixmap();
        let pixel = pixmap.pixel(4, 4).unwrap();
        assert!((127..=128).contains(&pixel.alpha()));
    }

    #[test]
    fn defaults_to_black() {
        let layer = BackgroundLayer::from_json(None).unwrap();
        let mut canvas = PixmapCanvas::new(8).unwrap();
        layer.render(&RenderScope::new(0., 1.), &mut canvas);

        let pixmap = canvas.into_pixmap();
        let pixel = pixmap.pixel(0, 0).unwrap();
        assert_eq!((pixel.red(), pixel.green(), pixel.blue(), pixel.alpha()), (0, 0, 0, 255));
    }
}
