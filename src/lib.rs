//! MapLibre vector tile rendering.
//!
//! styx turns Mapbox Vector Tile data and a [MapLibre style] into rasterized
//! map tiles plus a list of symbol placement requests. It implements the
//! style spec's expression language, the background, fill, line and symbol
//! layer types, sprite sheets, and per-tile feature indexes to keep filter
//! evaluation fast.
//!
//! The entry point is [`VectorRenderer`]: construct it from a style JSON,
//! then call [`fill_tile`](VectorRenderer::fill_tile) per tile. Text shaping
//! and label collision are out of scope; symbol layers stop at
//! [`SymbolInfo`] records for a downstream label placer.
//!
//! [MapLibre style]: https://maplibre.org/maplibre-style-spec/

pub use crate::canvas::{Canvas, LineCap, LineJoin, PixmapCanvas, StrokeStyle};
pub use crate::color::Color;
pub use crate::diagnostics::{DiagnosticSink, TracingDiagnostics};
pub use crate::error::Error;
pub use crate::expr::Expression;
pub use crate::mvt::{GeometrySink, Reader, ReaderIter};
pub use crate::pipeline::{RenderedTile, TILE_SIZE, VectorRenderer};
pub use crate::scope::RenderScope;
pub use crate::source::{Cancellable, DataSource, TileCoords, TileData, TileDownloader};
pub use crate::sprite::{FallbackFn, Sprite, SpriteSheet};
pub use crate::style::symbol::SymbolInfo;
pub use crate::style::{StyleLayer, Stylesheet};
pub use crate::value::Value;

pub mod canvas;
pub mod color;
pub mod diagnostics;
mod error;
pub mod expr;
pub mod geometry;
pub mod index;
pub mod mvt;
pub mod pipeline;
pub mod scope;
pub mod source;
pub mod sprite;
pub mod style;
pub mod value;
