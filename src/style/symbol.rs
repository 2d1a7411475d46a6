//! Symbol style layers.
//!
//! Symbol layers do not rasterize anything. They evaluate their layout and
//! paint properties per feature and emit [`SymbolInfo`] placement records,
//! which a downstream label placer turns into on-screen text and icons.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value as Json;

use crate::Error;
use crate::color::Color;
use crate::expr::Expression;
use crate::geometry::LineString;
use crate::pipeline::TILE_SIZE;
use crate::scope::RenderScope;
use crate::source::TileCoords;
use crate::sprite::Sprite;
use crate::style::{compile_member, compile_optional_member};
use crate::value::{FormatPart, Value};

/// Where symbols are anchored along their feature's geometry.
#[derive(PartialEq, Eq, Copy, Clone, Default, Debug)]
pub enum Placement {
    #[default]
    Point,
    Line,
    LineCenter,
}

/// How a symbol rotates relative to the map.
#[derive(PartialEq, Eq, Copy, Clone, Default, Debug)]
pub enum Alignment {
    #[default]
    Auto,
    Map,
    Viewport,
    ViewportGlyph,
}

/// Which part of the symbol sits on the anchor point.
#[derive(PartialEq, Eq, Copy, Clone, Default, Debug)]
pub enum Anchor {
    #[default]
    Center,
    Top,
    Bottom,
    Left,
    Right,
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

/// Collision behavior of a symbol.
#[derive(PartialEq, Eq, Copy, Clone, Default, Debug)]
pub enum Overlap {
    #[default]
    Never,
    Always,
    Cooperative,
}

/// A symbol placement request emitted during tile rendering.
///
/// Coordinates are in normalized tile space; `line` carries the simplified
/// geometry run for line placements, with `cursor` the distance of the
/// anchor along it.
#[derive(Clone, Debug)]
pub struct SymbolInfo {
    /// Styled text parts; plain text becomes a single part.
    pub text: Vec<FormatPart>,
    pub text_color: Color,
    pub text_size: f64,
    pub text_font: Vec<String>,
    pub text_letter_spacing: f64,
    pub text_max_width: f64,
    pub text_keep_upright: bool,
    pub text_anchor: Anchor,
    pub text_offset: [f64; 2],
    pub text_overlap: Overlap,
    pub text_ignore_placement: bool,
    pub text_optional: bool,

    pub icon: Option<Sprite>,
    pub icon_size: f64,
    pub icon_color: Option<Color>,
    pub icon_opacity: f64,
    pub icon_anchor: Anchor,
    pub icon_offset: [f64; 2],
    /// Top, right, bottom and left collision padding.
    pub icon_padding: [f64; 4],
    pub icon_overlap: Overlap,
    pub icon_ignore_placement: bool,
    pub icon_optional: bool,

    pub placement: Placement,
    pub rotation_alignment: Alignment,
    pub sort_key: f64,

    /// Anchor position in normalized tile space.
    pub x: f32,
    pub y: f32,
    /// Distance of the anchor along `line`.
    pub cursor: f32,
    pub line: Option<LineString>,
    pub line_length: f32,

    pub layer_index: usize,
    pub tile: TileCoords,
    /// All feature tags, rendered to strings.
    pub tags: HashMap<String, String>,
}

impl SymbolInfo {
    /// The symbol's text with all formatting dropped.
    pub fn plain_text(&self) -> String {
        self.text.iter().map(|part| part.text.as_str()).collect()
    }
}

/// A layer emitting symbol placement records.
pub struct SymbolLayer {
    text_field: Arc<Expression>,
    text_color: Arc<Expression>,
    text_opacity: Arc<Expression>,
    text_size: Arc<Expression>,
    text_font: Vec<String>,
    text_letter_spacing: Arc<Expression>,
    text_max_width: Arc<Expression>,
    text_keep_upright: Arc<Expression>,
    text_anchor: Arc<Expression>,
    text_offset: Arc<Expression>,
    text_overlap: Arc<Expression>,
    text_allow_overlap: Arc<Expression>,
    text_ignore_placement: Arc<Expression>,
    text_optional: Arc<Expression>,
    text_rotation_alignment: Arc<Expression>,

    icon_image: Option<Arc<Expression>>,
    icon_size: Arc<Expression>,
    icon_color: Option<Arc<Expression>>,
    icon_opacity: Arc<Expression>,
    icon_anchor: Arc<Expression>,
    icon_offset: Arc<Expression>,
    icon_padding: Arc<Expression>,
    icon_overlap: Arc<Expression>,
    icon_allow_overlap: Arc<Expression>,
    icon_ignore_placement: Arc<Expression>,
    icon_optional: Arc<Expression>,

    placement: Arc<Expression>,
    spacing: Arc<Expression>,
    sort_key: Arc<Expression>,
}

impl SymbolLayer {
    pub(crate) fn from_json(
        paint: Option<&serde_json::Map<String, Json>>,
        layout: Option<&serde_json::Map<String, Json>>,
    ) -> Result<Self, Error> {
        // The font list is a plain array, not an expression.
        let text_font = match layout.and_then(|layout| layout.get("text-font")) {
            Some(Json::Array(fonts)) => fonts
                .iter()
                .map(|font| {
                    font.as_str().map(String::from).ok_or_else(|| {
                        Error::MalformedStyle("expected \"text-font\" to list strings".into())
                    })
                })
                .collect::<Result<_, _>>()?,
            Some(_) => {
                return Err(Error::MalformedStyle("expected \"text-font\" to be an array".into()));
            },
            None => Vec::new(),
        };

        Ok(Self {
            text_field: compile_member(layout, "text-field")?,
            text_color: compile_member(paint, "text-color")?,
            text_opacity: compile_member(paint, "text-opacity")?,
            text_size: compile_member(layout, "text-size")?,
            text_font,
            text_letter_spacing: compile_member(layout, "text-letter-spacing")?,
            text_max_width: compile_member(layout, "text-max-width")?,
            text_keep_upright: compile_member(layout, "text-keep-upright")?,
            text_anchor: compile_member(layout, "text-anchor")?,
            text_offset: compile_member(layout, "text-offset")?,
            text_overlap: compile_member(layout, "text-overlap")?,
            text_allow_overlap: compile_member(layout, "text-allow-overlap")?,
            text_ignore_placement: compile_member(layout, "text-ignore-placement")?,
            text_optional: compile_member(layout, "text-optional")?,
            text_rotation_alignment: compile_member(layout, "text-rotation-alignment")?,
            icon_image: compile_optional_member(layout, "icon-image")?,
            icon_size: compile_member(layout, "icon-size")?,
            icon_color: compile_optional_member(paint, "icon-color")?,
            icon_opacity: compile_member(paint, "icon-opacity")?,
            icon_anchor: compile_member(layout, "icon-anchor")?,
            icon_offset: compile_member(layout, "icon-offset")?,
            icon_padding: compile_member(layout, "icon-padding")?,
            icon_overlap: compile_member(layout, "icon-overlap")?,
            icon_allow_overlap: compile_member(layout, "icon-allow-overlap")?,
            icon_ignore_placement: compile_member(layout, "icon-ignore-placement")?,
            icon_optional: compile_member(layout, "icon-optional")?,
            placement: compile_member(layout, "symbol-placement")?,
            spacing: compile_member(layout, "symbol-spacing")?,
            sort_key: compile_member(layout, "symbol-sort-key")?,
        })
    }

    pub(crate) fn render(
        &self,
        scope: &mut RenderScope<'_>,
        layer_index: usize,
        tile: TileCoords,
    ) -> Result<(), Error> {
        let Some(center) = scope.geometry_center()? else { return Ok(()) };

        // Tiles include some margin; symbols covered by a neighboring tile
        // are dropped.
        if center.x < 0. || center.x >= 1. || center.y < 0. || center.y >= 1. {
            return Ok(());
        }

        let text = self.eval_text(scope);
        let icon = self.icon_image.as_ref().and_then(|icon| icon.eval_image(scope));
        if text.is_empty() && icon.is_none() {
            return Ok(());
        }

        let text_opacity = self.text_opacity.eval_number(scope, 1.) as f32;
        let symbol = SymbolInfo {
            text,
            text_color: self
                .text_color
                .eval_color(scope, Color::BLACK)
                .with_opacity(text_opacity),
            text_size: self.text_size.eval_number(scope, 16.),
            text_font: self.text_font.clone(),
            text_letter_spacing: self.text_letter_spacing.eval_number(scope, 0.),
            text_max_width: self.text_max_width.eval_number(scope, 10.),
            text_keep_upright: self.text_keep_upright.eval_boolean(scope, true),
            text_anchor: eval_anchor(&self.text_anchor, scope),
            text_offset: eval_offset(&self.text_offset, scope),
            text_overlap: eval_overlap(&self.text_overlap, &self.text_allow_overlap, scope),
            text_ignore_placement: self.text_ignore_placement.eval_boolean(scope, false),
            text_optional: self.text_optional.eval_boolean(scope, false),
            icon,
            icon_size: self.icon_size.eval_number(scope, 1.),
            icon_color: self
                .icon_color
                .as_ref()
                .map(|color| color.eval_color(scope, Color::BLACK)),
            icon_opacity: self.icon_opacity.eval_number(scope, 1.),
            icon_anchor: eval_anchor(&self.icon_anchor, scope),
            icon_offset: eval_offset(&self.icon_offset, scope),
            icon_padding: self.eval_padding(scope),
            icon_overlap: eval_overlap(&self.icon_overlap, &self.icon_allow_overlap, scope),
            icon_ignore_placement: self.icon_ignore_placement.eval_boolean(scope, false),
            icon_optional: self.icon_optional.eval_boolean(scope, false),
            placement: eval_placement(&self.placement, scope),
            rotation_alignment: eval_alignment(&self.text_rotation_alignment, scope),
            sort_key: self.sort_key.eval_number(scope, 0.),
            x: center.x,
            y: center.y,
            cursor: 0.,
            line: None,
            line_length: 0.,
            layer_index,
            tile,
            tags: scope.tag_table(),
        };

        match symbol.placement {
            Placement::Point => scope.symbols.push(symbol),
            Placement::Line | Placement::LineCenter => self.place_on_lines(scope, symbol)?,
        }

        Ok(())
    }

    /// Emit candidates along the feature's simplified geometry runs.
    fn place_on_lines(
        &self,
        scope: &mut RenderScope<'_>,
        symbol: SymbolInfo,
    ) -> Result<(), Error> {
        // Simplification tolerance of one geometry unit.
        let tolerance = 1. / scope.layer_extent().unwrap_or(4096).max(1) as f32;
        let spacing = self.spacing.eval_number(scope, 250.).max(1.) as f32 / TILE_SIZE as f32;

        for line in scope.geometry_lines()? {
            for run in line.simplify(tolerance).split_monotone() {
                let length = run.length();
                if length == 0. {
                    continue;
                }

                let mut cursors = Vec::new();
                match symbol.placement {
                    Placement::LineCenter => cursors.push(length / 2.),
                    _ => {
                        let mut cursor = spacing / 2.;
                        while cursor < length {
                            cursors.push(cursor);
                            cursor += spacing;
                        }
                    },
                }

                for cursor in cursors {
                    let Some((anchor, _tangent)) = run.point_at(cursor) else { continue };

                    let mut candidate = symbol.clone();
                    candidate.x = anchor.x;
                    candidate.y = anchor.y;
                    candidate.cursor = cursor;
                    candidate.line = Some(run.clone());
                    candidate.line_length = length;
                    scope.symbols.push(candidate);
                }
            }
        }

        Ok(())
    }

    /// Evaluate the text field to formatted parts.
    fn eval_text(&self, scope: &RenderScope<'_>) -> Vec<FormatPart> {
        match self.text_field.eval(scope) {
            Ok(Value::Formatted(parts)) => parts,
            Ok(value @ Value::String(_)) => {
                let text = value.as_string();
                if text.is_empty() {
                    Vec::new()
                } else {
                    vec![FormatPart { text, ..Default::default() }]
                }
            },
            _ => Vec::new(),
        }
    }

    /// Evaluate `icon-padding`, accepting a single value or all four sides.
    fn eval_padding(&self, scope: &RenderScope<'_>) -> [f64; 4] {
        match self.icon_padding.eval(scope) {
            Ok(Value::Number(padding)) => [padding; 4],
            Ok(Value::Array(values)) if values.len() == 4 => {
                let mut padding = [2.; 4];
                for (slot, value) in padding.iter_mut().zip(&values) {
                    *slot = value.get_number().unwrap_or(2.);
                }
                padding
            },
            _ => [2.; 4],
        }
    }
}

fn eval_placement(expression: &Expression, scope: &RenderScope<'_>) -> Placement {
    match expression.eval_string(scope, "point").as_str() {
        "line" => Placement::Line,
        "line-center" => Placement::LineCenter,
        _ => Placement::Point,
    }
}

fn eval_alignment(expression: &Expression, scope: &RenderScope<'_>) -> Alignment {
    match expression.eval_string(scope, "auto").as_str() {
        "map" => Alignment::Map,
        "viewport" => Alignment::Viewport,
        "viewport-glyph" => Alignment::ViewportGlyph,
        _ => Alignment::Auto,
    }
}

fn eval_anchor(expression: &Expression, scope: &RenderScope<'_>) -> Anchor {
    match expression.eval_string(scope, "center").as_str() {
        "top" => Anchor::Top,
        "bottom" => Anchor::Bottom,
        "left" => Anchor::Left,
        "right" => Anchor::Right,
        "top-left" => Anchor::TopLeft,
        "top-right" => Anchor::TopRight,
        "bottom-left" => Anchor::BottomLeft,
        "bottom-right" => Anchor::BottomRight,
        _ => Anchor::Center,
    }
}

/// Evaluate an overlap mode, falling back to the legacy `*-allow-overlap`
/// boolean.
fn eval_overlap(
    expression: &Expression,
    allow_overlap: &Expression,
    scope: &RenderScope<'_>,
) -> Overlap {
    match expression.eval(scope).ok().as_ref().and_then(Value::get_string) {
        Some("always") => Overlap::Always,
        Some("never") => Overlap::Never,
        Some("cooperative") => Overlap::Cooperative,
        _ => {
            if allow_overlap.eval_boolean(scope, false) {
                Overlap::Always
            } else {
                Overlap::Never
            }
        },
    }
}

fn eval_offset(expression: &Expression, scope: &RenderScope<'_>) -> [f64; 2] {
    match expression.eval(scope) {
        Ok(Value::Array(values)) if values.len() == 2 => {
            let x = values[0].get_number().unwrap_or(0.);
            let y = values[1].get_number().unwrap_or(0.);
            [x, y]
        },
        _ => [0., 0.],
    }
}
