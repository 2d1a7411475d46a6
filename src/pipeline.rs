//! The tile rendering pipeline.

use std::sync::Arc;

use tiny_skia::Pixmap;
use tokio::task;

use crate::Error;
use crate::canvas::PixmapCanvas;
use crate::diagnostics::{DiagnosticSink, TracingDiagnostics};
use crate::index::Bitset;
use crate::mvt::Reader;
use crate::scope::RenderScope;
use crate::source::{Cancellable, DataSource, TileCoords, TileDownloader};
use crate::sprite::SpriteSheet;
use crate::style::Stylesheet;
use crate::style::symbol::SymbolInfo;

/// Logical edge length of a rendered tile.
///
/// The style spec does not make this configurable for vector tiles.
pub const TILE_SIZE: u32 = 512;

/// Features per batch between cancellation checks.
const CANCEL_BATCH: usize = 64;

/// Maximum skipped-feature reports forwarded to the diagnostic sink per
/// tile.
const DIAGNOSTICS_PER_TILE: u32 = 16;

/// The output of one tile render.
pub struct RenderedTile {
    /// The rasterized tile, scaled by the requested scale factor.
    pub pixmap: Pixmap,
    /// Symbol placement requests, ordered by style layer, then sort key,
    /// then emission order.
    pub symbols: Vec<SymbolInfo>,
}

/// Renders vector tiles according to a stylesheet.
///
/// The renderer itself is immutable during rendering; concurrent
/// [`fill_tile`](Self::fill_tile) calls on clones of shared state are safe,
/// with per-render state confined to each call.
pub struct VectorRenderer<S> {
    stylesheet: Arc<Stylesheet>,
    sprites: Arc<SpriteSheet>,
    diagnostics: Arc<dyn DiagnosticSink>,
    source: S,
}

impl VectorRenderer<TileDownloader> {
    /// Create a renderer downloading tiles from the style's tile URLs.
    pub fn new(style_json: &str) -> Result<Self, Error> {
        let stylesheet = Stylesheet::from_json(style_json)?;
        let source = TileDownloader::new(&stylesheet.source.url_template);
        Ok(Self::with_source(stylesheet, source))
    }
}

impl<S: DataSource> VectorRenderer<S> {
    /// Create a renderer with a custom data source.
    pub fn with_source(stylesheet: Stylesheet, source: S) -> Self {
        Self {
            stylesheet: Arc::new(stylesheet),
            sprites: Arc::new(SpriteSheet::new()),
            diagnostics: Arc::new(TracingDiagnostics),
            source,
        }
    }

    pub fn stylesheet(&self) -> &Stylesheet {
        &self.stylesheet
    }

    pub fn sprites(&self) -> &SpriteSheet {
        &self.sprites
    }

    /// Replace the sprite sheet used to resolve icons and patterns.
    pub fn set_sprite_sheet(&mut self, sprites: SpriteSheet) {
        self.sprites = Arc::new(sprites);
    }

    /// Replace the sink receiving non-fatal render diagnostics.
    pub fn set_diagnostics(&mut self, diagnostics: Arc<dyn DiagnosticSink>) {
        self.diagnostics = diagnostics;
    }

    /// Render one tile.
    ///
    /// Fetches the tile's data, runs every style layer over its features and
    /// returns the raster along with the symbol placement requests.
    /// Cancellation aborts between layers and feature batches without
    /// publishing a partial result.
    pub async fn fill_tile(
        &self,
        coords: TileCoords,
        scale_factor: f64,
        cancellable: &Cancellable,
    ) -> Result<RenderedTile, Error> {
        cancellable.check()?;
        let data = self.source.fetch(coords, cancellable).await?;
        cancellable.check()?;

        if !data.coords.is_ancestor_of(coords) {
            return Err(Error::BadResponse(format!(
                "data source answered tile {coords:?} with unrelated tile {:?}",
                data.coords
            )));
        }

        let reader = Reader::new(&data.bytes)?;

        let size = (TILE_SIZE as f64 * scale_factor).round().max(1.) as u32;
        let mut canvas = PixmapCanvas::new(size)?;

        let mut scope = RenderScope::new(coords.z as f64, scale_factor);
        scope.sprites = Some(&self.sprites);

        // When the source substitutes an ancestor tile, render the window of
        // it covering the requested tile.
        if data.coords.z < coords.z {
            let delta = coords.z - data.coords.z;
            let scale = (1u32 << delta) as f32;
            scope.overzoom_scale = scale;
            scope.overzoom_x = (coords.x - (data.coords.x << delta)) as f32 / scale;
            scope.overzoom_y = (coords.y - (data.coords.y << delta)) as f32 / scale;
        }

        let mut diagnostics_budget = DIAGNOSTICS_PER_TILE;
        for (layer_index, layer) in self.stylesheet.layers.iter().enumerate() {
            cancellable.check()?;
            // Cooperate with single-threaded executors between layers.
            task::yield_now().await;

            let zoom = coords.z as f64;
            if !layer.visible || zoom < layer.min_zoom || zoom >= layer.max_zoom {
                continue;
            }

            if layer.is_background() {
                let _ = layer.render(&mut scope, &mut canvas, layer_index, coords);
                continue;
            }

            // Find the MVT layer this style layer consumes.
            let Some(source_layer) = &layer.source_layer else { continue };
            let mut iter = reader.iter();
            if !iter.read_layer_by_name(source_layer) {
                continue;
            }
            let feature_count = iter.layer_feature_count().unwrap_or(0);

            scope.iter = Some(iter);
            scope.index_layer(&self.stylesheet.index_description);

            let features = match &layer.filter {
                Some(filter) => filter.eval_bitset(&mut scope, None),
                None => {
                    let mut all = Bitset::new(feature_count);
                    all.invert();
                    all
                },
            };

            for (batch, feature_index) in features.iter().enumerate() {
                if batch % CANCEL_BATCH == 0 {
                    cancellable.check()?;
                }

                if !scope.read_feature(feature_index) {
                    continue;
                }

                if let Err(err) = layer.render(&mut scope, &mut canvas, layer_index, coords)
                    && diagnostics_budget > 0
                {
                    diagnostics_budget -= 1;
                    self.diagnostics.feature_skipped(&layer.id, &err.to_string());
                }
            }
        }

        // Stable order: style layer, then sort key, then emission order.
        let mut symbols = std::mem::take(&mut scope.symbols);
        symbols.sort_by(|a, b| {
            a.layer_index.cmp(&b.layer_index).then_with(|| a.sort_key.total_cmp(&b.sort_key))
        });

        Ok(RenderedTile { pixmap: canvas.into_pixmap(), symbols })
    }
}
