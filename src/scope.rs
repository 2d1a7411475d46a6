//! Per-tile render state.

use std::collections::HashMap;

use crate::Error;
use crate::geometry::{LineString, Point};
use crate::index::{FeatureIndex, IndexDescription};
use crate::mvt::proto::GeomType;
use crate::mvt::{GeometrySink, ReaderIter};
use crate::sprite::SpriteSheet;
use crate::style::symbol::SymbolInfo;
use crate::value::Value;

/// Mutable evaluation context for one tile render.
///
/// The scope ties expression evaluation to the current feature, the zoom
/// level, and the sprite sheet. It lives for a single tile render and is
/// never shared between threads; all shared structures it references are
/// immutable.
pub struct RenderScope<'tile> {
    /// Fractional zoom level seen by expressions.
    pub zoom: f64,
    /// Ratio of physical to logical pixels of the target raster.
    pub scale_factor: f64,

    /// Scale applied when rendering a window of an ancestor tile.
    pub overzoom_scale: f32,
    /// Normalized offset of the window into the ancestor tile.
    pub overzoom_x: f32,
    pub overzoom_y: f32,

    pub(crate) iter: Option<ReaderIter<'tile>>,
    pub(crate) sprites: Option<&'tile SpriteSheet>,
    pub(crate) index: FeatureIndex,
    pub(crate) symbols: Vec<SymbolInfo>,
}

impl<'tile> RenderScope<'tile> {
    pub fn new(zoom: f64, scale_factor: f64) -> Self {
        Self {
            zoom,
            scale_factor,
            overzoom_scale: 1.,
            overzoom_x: 0.,
            overzoom_y: 0.,
            iter: None,
            sprites: None,
            index: FeatureIndex::default(),
            symbols: Vec::new(),
        }
    }

    pub(crate) fn sprites(&self) -> Option<&'tile SpriteSheet> {
        self.sprites
    }

    /// Look up a tag on the currently bound feature.
    pub fn feature_tag(&self, key: &str) -> Option<Value> {
        self.iter.as_ref()?.feature_tag(key)
    }

    /// The currently bound feature's id.
    pub fn feature_id(&self) -> Option<u64> {
        self.iter.as_ref()?.feature_id()
    }

    /// The currently bound feature's geometry type.
    pub fn geometry_type(&self) -> Option<GeomType> {
        self.iter.as_ref()?.feature_geometry_type()
    }

    /// The geometry type name exposed by the `geometry-type` expression.
    pub fn geometry_type_name(&self) -> Option<&'static str> {
        match self.geometry_type()? {
            GeomType::Point => Some("Point"),
            GeomType::Linestring => Some("LineString"),
            GeomType::Polygon => Some("Polygon"),
            GeomType::Unknown => None,
        }
    }

    pub(crate) fn layer_index(&self) -> Option<usize> {
        self.iter.as_ref()?.layer_index()
    }

    pub(crate) fn layer_extent(&self) -> Option<u32> {
        self.iter.as_ref()?.layer_extent()
    }

    pub(crate) fn layer_feature_count(&self) -> Option<usize> {
        self.iter.as_ref()?.layer_feature_count()
    }

    pub(crate) fn read_feature(&mut self, index: usize) -> bool {
        self.iter.as_mut().is_some_and(|iter| iter.read_feature(index))
    }

    /// Build the feature index for the current layer, if the description
    /// requests any indexes for it.
    pub(crate) fn index_layer(&mut self, description: &IndexDescription) {
        let Some(iter) = &self.iter else { return };
        let (Some(layer_index), Some(layer)) = (iter.layer_index(), iter.layer_struct()) else {
            return;
        };

        self.index.index_layer(layer_index, layer, description);
    }

    /// Walk the current feature's geometry with the overzoom transform
    /// applied.
    pub fn exec_geometry(&self, sink: &mut dyn GeometrySink) -> Result<(), Error> {
        let iter = self.iter.as_ref().ok_or_else(|| Error::Failed("no feature bound".into()))?;

        let mut transformed = TransformSink {
            sink,
            scale: self.overzoom_scale,
            x: self.overzoom_x,
            y: self.overzoom_y,
        };
        iter.execute_geometry(&mut transformed)
    }

    /// Collect the current feature's geometry as line strings.
    ///
    /// Closed contours repeat their starting point at the end.
    pub fn geometry_lines(&self) -> Result<Vec<LineString>, Error> {
        let mut sink = LineSink::default();
        self.exec_geometry(&mut sink)?;
        sink.finish();
        Ok(sink.lines)
    }

    /// Bounding box of the current feature's geometry.
    pub fn geometry_bounds(&self) -> Result<Option<(Point, Point)>, Error> {
        let lines = self.geometry_lines()?;

        let mut bounds: Option<(Point, Point)> = None;
        for line in &lines {
            let Some((min, max)) = line.bounds() else { continue };
            bounds = Some(match bounds {
                Some((current_min, current_max)) => (
                    Point::new(current_min.x.min(min.x), current_min.y.min(min.y)),
                    Point::new(current_max.x.max(max.x), current_max.y.max(max.y)),
                ),
                None => (min, max),
            });
        }

        Ok(bounds)
    }

    /// Center of the current feature's bounding box.
    pub fn geometry_center(&self) -> Result<Option<Point>, Error> {
        let bounds = self.geometry_bounds()?;
        Ok(bounds.map(|(min, max)| Point::new((min.x + max.x) / 2., (min.y + max.y) / 2.)))
    }

    /// Render all tags of the current feature to strings.
    pub fn tag_table(&self) -> HashMap<String, String> {
        let Some(iter) = &self.iter else { return HashMap::new() };
        iter.feature_tags().map(|(key, value)| (key.into(), value.as_string())).collect()
    }
}

/// Sink adapter applying the overzoom window transform.
struct TransformSink<'a> {
    sink: &'a mut dyn GeometrySink,
    scale: f32,
    x: f32,
    y: f32,
}

impl GeometrySink for TransformSink<'_> {
    fn move_to(&mut self, x: f32, y: f32) {
        self.sink.move_to((x - self.x) * self.scale, (y - self.y) * self.scale);
    }

    fn line_to(&mut self, x: f32, y: f32) {
        self.sink.line_to((x - self.x) * self.scale, (y - self.y) * self.scale);
    }

    fn close_path(&mut self) {
        self.sink.close_path();
    }
}

/// Sink collecting geometry into line strings.
#[derive(Default)]
struct LineSink {
    lines: Vec<LineString>,
    current: Vec<Point>,
    start: Point,
}

impl LineSink {
    fn finish(&mut self) {
        if !self.current.is_empty() {
            self.lines.push(LineString::new(std::mem::take(&mut self.current)));
        }
    }
}

impl GeometrySink for LineSink {
    fn move_to(&mut self, x: f32, y: f32) {
        self.finish();
        self.start = Point::new(x, y);
        self.current.push(self.start);
    }

    fn line_to(&mut self, x: f32, y: f32) {
        self.current.push(Point::new(x, y));
    }

    fn close_path(&mut self) {
        self.current.push(self.start);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mvt::Reader;
    use crate::mvt::proto::{Feature, Layer, Tile};
    use prost::Message;

    fn square_tile() -> Vec<u8> {
        Tile {
            layers: vec![Layer {
                version: 2,
                name: "shapes".into(),
                features: vec![Feature {
                    r#type: Some(GeomType::Polygon as i32),
                    // A 10x10 square at (0, 0), closed.
                    geometry: vec![9, 0, 0, 26, 20, 0, 0, 20, 19, 0, 15],
                    ..Default::default()
                }],
                extent: 10,
                ..Default::default()
            }],
        }
        .encode_to_vec()
    }

    #[test]
    fn geometry_collection() {
        let bytes = square_tile();
        let reader = Reader::new(&bytes).unwrap();
        let mut iter = reader.iter();
        iter.read_layer(0);
        iter.next_feature();

        let mut scope = RenderScope::new(10., 1.);
        scope.iter = Some(iter);

        let lines = scope.geometry_lines().unwrap();
        assert_eq!(lines.len(), 1);
        // Four corners plus the repeated start.
        assert_eq!(lines[0].points.len(), 5);
        assert_eq!(lines[0].points[0], lines[0].points[4]);

        let (min, max) = scope.geometry_bounds().unwrap().unwrap();
        assert_eq!(min, Point::new(0., 0.));
        assert_eq!(max, Point::new(1., 1.));
        assert_eq!(scope.geometry_center().unwrap().unwrap(), Point::new(0.5, 0.5));
    }

    #[test]
    fn overzoom_transform() {
        let bytes = square_tile();
        let reader = Reader::new(&bytes).unwrap();
        let mut iter = reader.iter();
        iter.read_layer(0);
        iter.next_feature();

        // Render the bottom-right quadrant of the parent tile.
        let mut scope = RenderScope::new(10., 1.);
        scope.overzoom_scale = 2.;
        scope.overzoom_x = 0.5;
        scope.overzoom_y = 0.5;
        scope.iter = Some(iter);

        let (min, max) = scope.geometry_bounds().unwrap().unwrap();
        assert_eq!(min, Point::new(-1., -1.));
        assert_eq!(max, Point::new(1., 1.));
    }
}
