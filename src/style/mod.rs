//! Stylesheet parsing and style layers.

use std::sync::Arc;

use serde_json::Value as Json;

use crate::Error;
use crate::canvas::Canvas;
use crate::expr::Expression;
use crate::index::IndexDescription;
use crate::mvt::GeometrySink;
use crate::scope::RenderScope;
use crate::source::TileCoords;
use crate::style::background::BackgroundLayer;
use crate::style::fill::FillLayer;
use crate::style::line::LineLayer;
use crate::style::symbol::SymbolLayer;

pub mod background;
pub mod fill;
pub mod line;
pub mod symbol;

/// A parsed MapLibre stylesheet.
///
/// Stylesheets are immutable after loading and safe to share between tile
/// renders. Loading is all-or-nothing: a single malformed layer fails the
/// whole load, with the layer's id in the error message.
pub struct Stylesheet {
    pub name: Option<String>,
    pub layers: Vec<StyleLayer>,

    pub(crate) source: TileSource,
    pub(crate) index_description: IndexDescription,
}

/// The single vector tile source of a stylesheet.
#[derive(Clone, Debug)]
pub struct TileSource {
    pub name: String,
    pub url_template: String,
    pub min_zoom: u8,
    pub max_zoom: u8,
}

impl Stylesheet {
    /// Load a stylesheet from its JSON representation.
    pub fn from_json(style_json: &str) -> Result<Self, Error> {
        let json: Json = serde_json::from_str(style_json)
            .map_err(|err| Error::MalformedStyle(format!("invalid style JSON: {err}")))?;
        let object = json
            .as_object()
            .ok_or_else(|| Error::MalformedStyle("expected style to be an object".into()))?;

        let name = match object.get("name") {
            Some(Json::String(name)) => Some(name.clone()),
            Some(_) => return Err(Error::MalformedStyle("expected \"name\" to be a string".into())),
            None => None,
        };

        let source = Self::parse_sources(object.get("sources"))?;

        let mut layers = Vec::new();
        let mut index_description = IndexDescription::default();
        if let Some(layers_json) = object.get("layers") {
            let layers_json = layers_json.as_array().ok_or_else(|| {
                Error::MalformedStyle("expected \"layers\" to be an array".into())
            })?;

            for layer_json in layers_json {
                let layer = StyleLayer::from_json(layer_json)?;

                // Collect the filter's index demands while the style loads,
                // so tiles only pay for the single indexing pass.
                if let (Some(filter), Some(source_layer)) = (&layer.filter, &layer.source_layer) {
                    filter.collect_indexes(source_layer, &mut index_description);
                }

                layers.push(layer);
            }
        }

        Ok(Self { name, layers, source, index_description })
    }

    /// Validate the `sources` object and extract the one vector source.
    fn parse_sources(sources: Option<&Json>) -> Result<TileSource, Error> {
        let sources = sources
            .and_then(Json::as_object)
            .ok_or_else(|| Error::Unsupported("a data source is required".into()))?;

        if sources.len() > 1 {
            return Err(Error::Unsupported("multiple data sources are not supported".into()));
        }

        let (source_name, source) = sources
            .iter()
            .next()
            .ok_or_else(|| Error::Unsupported("a data source is required".into()))?;
        let source = source.as_object().ok_or_else(|| {
            Error::MalformedStyle(format!("expected source {source_name:?} to be an object"))
        })?;

        match source.get("type").and_then(Json::as_str) {
            Some("vector") => (),
            _ => return Err(Error::Unsupported("only vector sources are supported".into())),
        }

        if source.contains_key("url") {
            return Err(Error::Unsupported(
                "TileJSON links are not supported; embed the tile URLs directly".into(),
            ));
        }

        let url_template = source
            .get("tiles")
            .and_then(Json::as_array)
            .and_then(|tiles| tiles.first())
            .and_then(Json::as_str)
            .ok_or_else(|| {
                Error::MalformedStyle(
                    "expected \"tiles\" array with at least one URL template".into(),
                )
            })?;

        let zoom = |key: &str, default: u8| {
            source.get(key).and_then(Json::as_u64).map_or(default, |zoom| zoom.min(30) as u8)
        };

        Ok(TileSource {
            name: source_name.clone(),
            url_template: url_template.into(),
            min_zoom: zoom("minzoom", 0),
            max_zoom: zoom("maxzoom", 30),
        })
    }
}

/// One layer of a stylesheet.
pub struct StyleLayer {
    pub id: String,
    pub source_layer: Option<String>,
    pub min_zoom: f64,
    pub max_zoom: f64,

    pub(crate) filter: Option<Arc<Expression>>,
    pub(crate) visible: bool,
    pub(crate) kind: LayerKind,
}

pub(crate) enum LayerKind {
    Background(BackgroundLayer),
    Fill(FillLayer),
    Line(LineLayer),
    Symbol(SymbolLayer),
}

impl StyleLayer {
    fn from_json(json: &Json) -> Result<Self, Error> {
        let object = json
            .as_object()
            .ok_or_else(|| Error::MalformedStyle("expected layer to be an object".into()))?;
        let id = object.get("id").and_then(Json::as_str).unwrap_or("<unnamed>").to_string();

        Self::from_object(object, &id)
            .map_err(|err| err.prefix_layer(&id))
    }

    fn from_object(object: &serde_json::Map<String, Json>, id: &str) -> Result<Self, Error> {
        let layer_type = object.get("type").and_then(Json::as_str).ok_or_else(|| {
            Error::MalformedStyle("expected layer to have a string \"type\"".into())
        })?;

        let paint = member_object(object, "paint")?;
        let layout = member_object(object, "layout")?;

        let kind = match layer_type {
            "background" => LayerKind::Background(BackgroundLayer::from_json(paint)?),
            "fill" => LayerKind::Fill(FillLayer::from_json(paint)?),
            "line" => LayerKind::Line(LineLayer::from_json(paint, layout)?),
            "symbol" => LayerKind::Symbol(SymbolLayer::from_json(paint, layout)?),
            _ => return Err(Error::UnsupportedLayer(layer_type.into())),
        };

        let filter = match object.get("filter") {
            Some(filter) => Some(Expression::compile(filter)?),
            None => None,
        };

        let visible = layout
            .and_then(|layout| layout.get("visibility"))
            .and_then(Json::as_str)
            .is_none_or(|visibility| visibility != "none");

        Ok(Self {
            id: id.into(),
            source_layer: object.get("source-layer").and_then(Json::as_str).map(String::from),
            min_zoom: object.get("minzoom").and_then(Json::as_f64).unwrap_or(0.),
            max_zoom: object.get("maxzoom").and_then(Json::as_f64).unwrap_or(1e9),
            filter,
            visible,
            kind,
        })
    }

    /// Whether the layer draws without consuming features.
    pub(crate) fn is_background(&self) -> bool {
        matches!(self.kind, LayerKind::Background(_))
    }

    /// Render the layer for the feature currently bound to the scope.
    pub(crate) fn render(
        &self,
        scope: &mut RenderScope<'_>,
        canvas: &mut dyn Canvas,
        layer_index: usize,
        tile: TileCoords,
    ) -> Result<(), Error> {
        match &self.kind {
            LayerKind::Background(background) => {
                background.render(scope, canvas);
                Ok(())
            },
            LayerKind::Fill(fill) => fill.render(scope, canvas),
            LayerKind::Line(line) => line.render(scope, canvas),
            LayerKind::Symbol(symbol) => symbol.render(scope, layer_index, tile),
        }
    }
}

impl Error {
    /// Prefix style errors with the offending layer's id.
    fn prefix_layer(self, id: &str) -> Self {
        match self {
            Self::MalformedStyle(message) => Self::MalformedStyle(format!("layer {id:?}: {message}")),
            Self::InvalidExpression(message) => {
                Self::InvalidExpression(format!("layer {id:?}: {message}"))
            },
            other => other,
        }
    }

    /// Prefix expression errors with the offending property name.
    fn prefix_property(self, key: &str) -> Self {
        match self {
            Self::InvalidExpression(message) => {
                Self::InvalidExpression(format!("{key}: {message}"))
            },
            Self::MalformedStyle(message) => Self::MalformedStyle(format!("{key}: {message}")),
            other => other,
        }
    }
}

/// Fetch an optional object member, failing on non-object values.
fn member_object<'a>(
    object: &'a serde_json::Map<String, Json>,
    key: &str,
) -> Result<Option<&'a serde_json::Map<String, Json>>, Error> {
    match object.get(key) {
        Some(Json::Object(member)) => Ok(Some(member)),
        Some(_) => Err(Error::MalformedStyle(format!("expected {key:?} to be an object"))),
        None => Ok(None),
    }
}

/// Compile an optional property member, with absent members evaluating to
/// null.
pub(crate) fn compile_member(
    object: Option<&serde_json::Map<String, Json>>,
    key: &str,
) -> Result<Arc<Expression>, Error> {
    match object.and_then(|object| object.get(key)) {
        Some(json) => Expression::compile(json)
            .map_err(|err| err.prefix_property(key)),
        None => Ok(Arc::new(Expression::Literal(crate::value::Value::Null))),
    }
}

/// Compile a property member only if it is present.
pub(crate) fn compile_optional_member(
    object: Option<&serde_json::Map<String, Json>>,
    key: &str,
) -> Result<Option<Arc<Expression>>, Error> {
    match object.and_then(|object| object.get(key)) {
        Some(json) => Expression::compile(json)
            .map(Some)
            .map_err(|err| err.prefix_property(key)),
        None => Ok(None),
    }
}

/// Sink feeding normalized geometry into a canvas path in pixel space.
pub(crate) struct CanvasPathSink<'a> {
    pub canvas: &'a mut dyn Canvas,
    pub scale: f32,
}

impl<'a> CanvasPathSink<'a> {
    pub fn new(canvas: &'a mut dyn Canvas) -> Self {
        let scale = canvas.size() as f32;
        Self { canvas, scale }
    }
}

impl GeometrySink for CanvasPathSink<'_> {
    fn move_to(&mut self, x: f32, y: f32) {
        self.canvas.move_to(x * self.scale, y * self.scale);
    }

    fn line_to(&mut self, x: f32, y: f32) {
        self.canvas.line_to(x * self.scale, y * self.scale);
    }

    fn close_path(&mut self) {
        self.canvas.close_path();
    }
}
