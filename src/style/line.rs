//! Line style layers.

use std::sync::Arc;

use serde_json::Value as Json;

use crate::Error;
use crate::canvas::{Canvas, LineCap, LineJoin, StrokeStyle};
use crate::color::Color;
use crate::expr::Expression;
use crate::geometry::{LineString, Point};
use crate::scope::RenderScope;
use crate::style::{compile_member, compile_optional_member};
use crate::value::Value;

/// A layer stroking line features.
pub struct LineLayer {
    color: Arc<Expression>,
    opacity: Arc<Expression>,
    width: Arc<Expression>,
    gap_width: Arc<Expression>,
    offset: Arc<Expression>,
    dasharray: Option<Arc<Expression>>,
    pattern: Option<Arc<Expression>>,

    cap: Arc<Expression>,
    join: Arc<Expression>,
    miter_limit: Arc<Expression>,
}

impl LineLayer {
    pub(crate) fn from_json(
        paint: Option<&serde_json::Map<String, Json>>,
        layout: Option<&serde_json::Map<String, Json>>,
    ) -> Result<Self, Error> {
        Ok(Self {
            color: compile_member(paint, "line-color")?,
            opacity: compile_member(paint, "line-opacity")?,
            width: compile_member(paint, "line-width")?,
            gap_width: compile_member(paint, "line-gap-width")?,
            offset: compile_member(paint, "line-offset")?,
            dasharray: compile_optional_member(paint, "line-dasharray")?,
            pattern: compile_optional_member(paint, "line-pattern")?,
            cap: compile_member(layout, "line-cap")?,
            join: compile_member(layout, "line-join")?,
            miter_limit: compile_member(layout, "line-miter-limit")?,
        })
    }

    pub(crate) fn render(
        &self,
        scope: &RenderScope<'_>,
        canvas: &mut dyn Canvas,
    ) -> Result<(), Error> {
        let scale_factor = scope.scale_factor as f32;
        let pixels = canvas.size() as f32;

        let width = self.width.eval_number(scope, 1.).max(0.) as f32 * scale_factor;
        let gap_width = self.gap_width.eval_number(scope, 0.).max(0.) as f32 * scale_factor;
        let offset = self.offset.eval_number(scope, 0.) as f32 * scale_factor;
        let opacity = self.opacity.eval_number(scope, 1.) as f32;
        let color = self.color.eval_color(scope, Color::BLACK).with_opacity(opacity);
        let pattern = self.pattern.as_ref().and_then(|pattern| pattern.eval_image(scope));
        let pattern_scale = pattern
            .as_ref()
            .map_or(1., |sprite| (scope.scale_factor / sprite.scale()) as f32);

        let style = StrokeStyle {
            color,
            width,
            cap: self.eval_cap(scope),
            join: self.eval_join(scope),
            miter_limit: self.miter_limit.eval_number(scope, 2.) as f32,
            dash: self.eval_dash(scope, width),
            pattern,
            pattern_scale,
        };

        let mut lines = Vec::new();
        for line in scope.geometry_lines()? {
            // Geometry arrives normalized; stroke metrics are in pixels.
            let mut line = LineString::new(
                line.points.iter().map(|point| *point * pixels).collect(),
            );

            if offset != 0. {
                line = offset_line(&line, offset);
            }

            lines.push(line);
        }

        // A gap width splits the stroke into two parallel casings.
        if gap_width > 0. {
            let casing_offset = (gap_width + width) / 2.;
            for line in &lines {
                emit_line(canvas, &offset_line(line, -casing_offset));
                emit_line(canvas, &offset_line(line, casing_offset));
            }
        } else {
            for line in &lines {
                emit_line(canvas, line);
            }
        }

        canvas.stroke(&style);
        Ok(())
    }

    fn eval_cap(&self, scope: &RenderScope<'_>) -> LineCap {
        match self.cap.eval_string(scope, "butt").as_str() {
            "round" => LineCap::Round,
            "square" => LineCap::Square,
            _ => LineCap::Butt,
        }
    }

    fn eval_join(&self, scope: &RenderScope<'_>) -> LineJoin {
        match self.join.eval_string(scope, "miter").as_str() {
            "bevel" => LineJoin::Bevel,
            "round" => LineJoin::Round,
            _ => LineJoin::Miter,
        }
    }

    /// Evaluate the dash array, scaled to multiples of the line width.
    fn eval_dash(&self, scope: &RenderScope<'_>, width: f32) -> Option<Vec<f32>> {
        let expression = self.dasharray.as_ref()?;
        let value = expression.eval(scope).ok()?;

        let dashes: Vec<f32> = value
            .get_array()?
            .iter()
            .map_while(Value::get_number)
            .map(|dash| dash as f32 * width)
            .collect();

        (dashes.len() == value.get_array()?.len() && !dashes.is_empty()).then_some(dashes)
    }
}

fn emit_line(canvas: &mut dyn Canvas, line: &LineString) {
    let mut points = line.points.iter();
    if let Some(first) = points.next() {
        canvas.move_to(first.x, first.y);
    }
    for point in points {
        canvas.line_to(point.x, point.y);
    }
}

/// Offset a line perpendicular to its direction.
///
/// Positive distances offset to the right of the line direction. Vertex
/// normals are averaged between adjacent segments with the miter length
/// clamped, which is accurate enough for the small offsets map styles use.
fn offset_line(line: &LineString, distance: f32) -> LineString {
    let points = &line.points;
    if points.len() < 2 {
        return line.clone();
    }

    let normal = |from: Point, to: Point| (to - from).normalized().perpendicular();

    let mut offset_points = Vec::with_capacity(points.len());
    for i in 0..points.len() {
        let previous = (i > 0).then(|| normal(points[i - 1], points[i]));
        let next = (i + 1 < points.len()).then(|| normal(points[i], points[i + 1]));

        let direction = match (previous, next) {
            (Some(previous), Some(next)) => {
                let averaged = (previous + next).normalized();
                // Lengthen the offset at corners, but never beyond 2x.
                let miter = 1. / averaged.dot(next).max(0.5);
                averaged * miter
            },
            (Some(normal), None) | (None, Some(normal)) => normal,
            (None, None) => Point::default(),
        };

        offset_points.push(points[i] + direction * distance);
    }

    LineString::new(offset_points)
}

#[cfg(test)]
mod tests {
    use prost::Message;

    use super::*;
    use crate::canvas::PixmapCanvas;
    use crate::mvt::Reader;
    use crate::mvt::proto::{Feature, GeomType, Layer, Tile};

    #[test]
    fn offsets_follow_the_normal() {
        let line = LineString::new(vec![Point::new(0., 0.), Point::new(10., 0.)]);
        let offset = offset_line(&line, 2.);
        assert_eq!(offset.points, vec![Point::new(0., 2.), Point::new(10., 2.)]);

        let offset = offset_line(&line, -2.);
        assert_eq!(offset.points, vec![Point::new(0., -2.), Point::new(10., -2.)]);
    }

    #[test]
    fn corner_offsets_are_mitered() {
        let line = LineString::new(vec![
            Point::new(0., 0.),
            Point::new(10., 0.),
            Point::new(10., 10.),
        ]);
        let offset = offset_line(&line, 1.);

        // The corner offset stretches along the corner bisector.
        let corner = offset.points[1];
        assert!((corner.x - 9.).abs() < 1e-4);
        assert!((corner.y - 1.).abs() < 1e-4);
        assert!(corner.distance(Point::new(10., 0.)) > 1.);
    }

    fn line_tile() -> Vec<u8> {
        Tile {
            layers: vec![Layer {
                version: 2,
                name: "streets".into(),
                features: vec![Feature {
                    r#type: Some(GeomType::Linestring as i32),
                    // Horizontal line across the full tile.
                    geometry: vec![9, 0, 8, 10, 32, 0],
                    ..Default::default()
                }],
                extent: 16,
                ..Default::default()
            }],
        }
        .encode_to_vec()
    }

    #[test]
    fn strokes_lines() {
        let paint: Json =
            serde_json::from_str(r##"{"line-color": "#ff0000", "line-width": 2}"##).unwrap();
        let layer = LineLayer::from_json(paint.as_object(), None).unwrap();

        let bytes = line_tile();
        let reader = Reader::new(&bytes).unwrap();
        let mut iter = reader.iter();
        iter.read_layer(0);
        iter.next_feature();

        let mut scope = RenderScope::new(10., 1.);
        scope.iter = Some(iter);

        let mut canvas = PixmapCanvas::new(16).unwrap();
        layer.render(&scope, &mut canvas).unwrap();

        let pixmap = canvas.into_pixmap();
        let pixel = pixmap.pixel(8, 4).unwrap();
        assert_eq!((pixel.red(), pixel.alpha()), (255, 255));
        assert_eq!(pixmap.pixel(8, 12).unwrap().alpha(), 0);
    }
}
