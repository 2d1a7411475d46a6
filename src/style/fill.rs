//! Fill style layers.

use std::sync::Arc;

use serde_json::Value as Json;

use crate::Error;
use crate::canvas::{Canvas, StrokeStyle};
use crate::color::Color;
use crate::expr::Expression;
use crate::scope::RenderScope;
use crate::style::{CanvasPathSink, compile_member, compile_optional_member};

/// A layer filling polygon features.
pub struct FillLayer {
    color: Arc<Expression>,
    opacity: Arc<Expression>,
    outline_color: Option<Arc<Expression>>,
    pattern: Option<Arc<Expression>>,
}

impl FillLayer {
    pub(crate) fn from_json(paint: Option<&serde_json::Map<String, Json>>) -> Result<Self, Error> {
        Ok(Self {
            color: compile_member(paint, "fill-color")?,
            opacity: compile_member(paint, "fill-opacity")?,
            outline_color: compile_optional_member(paint, "fill-outline-color")?,
            pattern: compile_optional_member(paint, "fill-pattern")?,
        })
    }

    pub(crate) fn render(
        &self,
        scope: &RenderScope<'_>,
        canvas: &mut dyn Canvas,
    ) -> Result<(), Error> {
        let opacity = self.opacity.eval_number(scope, 1.) as f32;

        let mut sink = CanvasPathSink::new(&mut *canvas);
        scope.exec_geometry(&mut sink)?;

        let pattern = self.pattern.as_ref().and_then(|pattern| pattern.eval_image(scope));
        match pattern {
            Some(sprite) => {
                let scale = (scope.scale_factor / sprite.scale()) as f32;
                canvas.fill_pattern(&sprite, opacity, scale);
            },
            None => {
                let color = self.color.eval_color(scope, Color::BLACK);
                canvas.fill(color.with_opacity(opacity));
            },
        }

        // Hairline outline on top of the fill.
        if let Some(outline_color) = &self.outline_color {
            let color = outline_color.eval_color(scope, Color::BLACK);

            let mut sink = CanvasPathSink::new(&mut *canvas);
            scope.exec_geometry(&mut sink)?;
            canvas.stroke(&StrokeStyle {
                color: color.with_opacity(opacity),
                width: scope.scale_factor as f32,
                ..Default::default()
            });
        }

        Ok(())
    }
}
