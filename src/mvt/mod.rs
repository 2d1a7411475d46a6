//! Mapbox vector tile decoding and iteration.

use prost::Message;
use smallvec::SmallVec;

use crate::Error;
use crate::mvt::proto::GeomType;
use crate::value::Value;

pub mod proto;

/// A decoded vector tile.
///
/// The tile is parsed once at construction; [`Reader::iter`] creates cursors
/// over its layers and features.
pub struct Reader {
    tile: proto::Tile,
}

impl Reader {
    /// Decode a vector tile, rejecting malformed input.
    pub fn new(bytes: &[u8]) -> Result<Self, Error> {
        let tile = proto::Tile::decode(bytes)
            .map_err(|err| Error::Failed(format!("invalid vector tile: {err}")))?;
        Ok(Self { tile })
    }

    /// Create a cursor over the tile's layers.
    pub fn iter(&self) -> ReaderIter<'_> {
        ReaderIter { reader: self, state: State::NoLayer }
    }

    pub fn layer_count(&self) -> usize {
        self.tile.layers.len()
    }
}

/// Iteration state of a [`ReaderIter`].
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
enum State {
    NoLayer,
    OnLayer(usize),
    OnFeature(usize, usize),
}

/// Cursor over the layers and features of a [`Reader`].
///
/// The cursor starts out on no layer; reads in the wrong state return `None`
/// or `false` without changing the state.
pub struct ReaderIter<'a> {
    reader: &'a Reader,
    state: State,
}

impl<'a> ReaderIter<'a> {
    /// Move the cursor to the layer at `index`.
    pub fn read_layer(&mut self, index: usize) -> bool {
        if index < self.reader.tile.layers.len() {
            self.state = State::OnLayer(index);
            true
        } else {
            false
        }
    }

    /// Move the cursor to the layer named `name`.
    pub fn read_layer_by_name(&mut self, name: &str) -> bool {
        match self.reader.tile.layers.iter().position(|layer| layer.name == name) {
            Some(index) => {
                self.state = State::OnLayer(index);
                true
            },
            None => false,
        }
    }

    /// Advance to the next feature of the current layer.
    ///
    /// Returns `false` and moves back onto the layer once the features are
    /// exhausted.
    pub fn next_feature(&mut self) -> bool {
        match self.state {
            State::NoLayer => false,
            State::OnLayer(layer) => {
                if self.reader.tile.layers[layer].features.is_empty() {
                    false
                } else {
                    self.state = State::OnFeature(layer, 0);
                    true
                }
            },
            State::OnFeature(layer, feature) => {
                if feature + 1 < self.reader.tile.layers[layer].features.len() {
                    self.state = State::OnFeature(layer, feature + 1);
                    true
                } else {
                    self.state = State::OnLayer(layer);
                    false
                }
            },
        }
    }

    /// Move the cursor to the feature at `index` within the current layer.
    pub fn read_feature(&mut self, index: usize) -> bool {
        let layer = match self.state {
            State::NoLayer => return false,
            State::OnLayer(layer) | State::OnFeature(layer, _) => layer,
        };

        if index < self.reader.tile.layers[layer].features.len() {
            self.state = State::OnFeature(layer, index);
            true
        } else {
            false
        }
    }

    pub fn layer_index(&self) -> Option<usize> {
        match self.state {
            State::NoLayer => None,
            State::OnLayer(layer) | State::OnFeature(layer, _) => Some(layer),
        }
    }

    pub fn feature_index(&self) -> Option<usize> {
        match self.state {
            State::OnFeature(_, feature) => Some(feature),
            _ => None,
        }
    }

    pub fn layer_name(&self) -> Option<&'a str> {
        self.layer_struct().map(|layer| layer.name.as_str())
    }

    pub fn layer_extent(&self) -> Option<u32> {
        self.layer_struct().map(|layer| layer.extent)
    }

    pub fn layer_feature_count(&self) -> Option<usize> {
        self.layer_struct().map(|layer| layer.features.len())
    }

    /// The current feature's id, if it has one.
    pub fn feature_id(&self) -> Option<u64> {
        self.feature_struct()?.id
    }

    /// The current feature's geometry type.
    pub fn feature_geometry_type(&self) -> Option<GeomType> {
        let feature = self.feature_struct()?;
        Some(feature.r#type.and_then(|raw| GeomType::try_from(raw).ok()).unwrap_or(GeomType::Unknown))
    }

    /// Look up a tag on the current feature.
    ///
    /// Returns `None` when no feature is selected or the feature does not
    /// carry the key. Out-of-range tag indices are skipped for forward
    /// compatibility.
    pub fn feature_tag(&self, key: &str) -> Option<Value> {
        let layer = self.layer_struct()?;
        let feature = self.feature_struct()?;

        for pair in feature.tags.chunks_exact(2) {
            match layer.keys.get(pair[0] as usize) {
                Some(tag_key) if tag_key == key => {
                    // Skip pairs with out-of-range value indices.
                    if let Some(value) = layer.values.get(pair[1] as usize) {
                        return Some(value.to_value());
                    }
                },
                _ => (),
            }
        }

        None
    }

    /// Iterate over the current feature's tags.
    pub fn feature_tags(&self) -> impl Iterator<Item = (&'a str, Value)> {
        let layer = self.layer_struct();
        let tags = self.feature_struct().map_or(&[][..], |feature| &feature.tags[..]);

        tags.chunks_exact(2).filter_map(move |pair| {
            let layer = layer?;
            let key = layer.keys.get(pair[0] as usize)?;
            let value = layer.values.get(pair[1] as usize)?;
            Some((key.as_str(), value.to_value()))
        })
    }

    /// Walk the current feature's geometry, forwarding normalized commands to
    /// the sink.
    ///
    /// Coordinates are mapped into `[0, 1]` by dividing through the layer
    /// extent. A malformed command stream fails without emitting a single
    /// call.
    pub fn execute_geometry(&self, sink: &mut dyn GeometrySink) -> Result<(), Error> {
        let layer = self.layer_struct().ok_or_else(no_feature)?;
        let feature = self.feature_struct().ok_or_else(no_feature)?;
        let extent = layer.extent.max(1) as f32;

        // Validate the entire stream up front, so truncated geometry doesn't
        // emit a partial path.
        let commands: SmallVec<[Command; 32]> = GeometryIter::new(&feature.geometry)
            .collect::<Result<_, _>>()
            .map_err(|err| Error::Failed(err.to_string()))?;

        let mut x = 0i32;
        let mut y = 0i32;
        for command in commands {
            match command {
                Command::MoveTo(dx, dy) => {
                    x += dx;
                    y += dy;
                    sink.move_to(x as f32 / extent, y as f32 / extent);
                },
                Command::LineTo(dx, dy) => {
                    x += dx;
                    y += dy;
                    sink.line_to(x as f32 / extent, y as f32 / extent);
                },
                Command::ClosePath => sink.close_path(),
            }
        }

        Ok(())
    }

    pub(crate) fn layer_struct(&self) -> Option<&'a proto::Layer> {
        match self.state {
            State::NoLayer => None,
            State::OnLayer(layer) | State::OnFeature(layer, _) => {
                self.reader.tile.layers.get(layer)
            },
        }
    }

    pub(crate) fn feature_struct(&self) -> Option<&'a proto::Feature> {
        match self.state {
            State::OnFeature(layer, feature) => {
                self.reader.tile.layers.get(layer)?.features.get(feature)
            },
            _ => None,
        }
    }
}

fn no_feature() -> Error {
    Error::Failed("no feature selected".into())
}

/// Receiver for normalized geometry commands.
pub trait GeometrySink {
    /// Start a new contour at the absolute position `(x, y)`.
    fn move_to(&mut self, x: f32, y: f32);

    /// Extend the current contour to the absolute position `(x, y)`.
    fn line_to(&mut self, x: f32, y: f32);

    /// Close the current contour.
    ///
    /// Closing a contour does not move the cursor.
    fn close_path(&mut self);
}

/// Decoded geometry command carrying zig-zag decoded deltas.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
enum Command {
    MoveTo(i32, i32),
    LineTo(i32, i32),
    ClosePath,
}

/// Errors for malformed geometry command streams.
#[derive(thiserror::Error, PartialEq, Eq, Copy, Clone, Debug)]
enum GeometryError {
    #[error("geometry command {0} is not valid")]
    InvalidCommand(u32),
    #[error("truncated geometry command stream")]
    Truncated,
}

fn zigzag(value: u32) -> i32 {
    ((value >> 1) as i32) ^ (-((value & 1) as i32))
}

/// Iterator over the commands in a feature's geometry stream.
///
/// Yields an error and stops if the stream contains an unknown command or a
/// parameter list running past the end of the stream.
struct GeometryIter<'a> {
    geometry: &'a [u32],
    command: Option<(Command, u32)>,
    index: usize,
    failed: bool,
}

impl<'a> GeometryIter<'a> {
    fn new(geometry: &'a [u32]) -> Self {
        Self { geometry, command: Default::default(), index: Default::default(), failed: false }
    }
}

impl Iterator for GeometryIter<'_> {
    type Item = Result<Command, GeometryError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        loop {
            match &mut self.command {
                // All repetitions of the current command were dispatched.
                Some((_, 0)) => self.command = None,

                Some((Command::ClosePath, count)) => {
                    *count -= 1;
                    return Some(Ok(Command::ClosePath));
                },

                Some((command, count)) => {
                    *count -= 1;

                    if self.index + 2 > self.geometry.len() {
                        self.failed = true;
                        return Some(Err(GeometryError::Truncated));
                    }

                    let dx = zigzag(self.geometry[self.index]);
                    let dy = zigzag(self.geometry[self.index + 1]);
                    self.index += 2;

                    let command = match command {
                        Command::MoveTo(..) => Command::MoveTo(dx, dy),
                        Command::LineTo(..) => Command::LineTo(dx, dy),
                        Command::ClosePath => unreachable!(),
                    };
                    return Some(Ok(command));
                },

                // Parse the next command integer.
                None => {
                    let command = *self.geometry.get(self.index)?;
                    self.index += 1;

                    let count = command >> 3;
                    match command & 0x7 {
                        1 => self.command = Some((Command::MoveTo(0, 0), count)),
                        2 => self.command = Some((Command::LineTo(0, 0), count)),
                        7 => self.command = Some((Command::ClosePath, count)),
                        id => {
                            self.failed = true;
                            return Some(Err(GeometryError::InvalidCommand(id)));
                        },
                    }
                },
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod test_tiles {
    use super::*;

    /// Encode a tile with a single `helloworld` layer containing one point
    /// feature tagged `name = "Hello, world!"`.
    pub fn hello_world() -> Vec<u8> {
        let layer = proto::Layer {
            version: 2,
            name: "helloworld".into(),
            keys: vec!["name".into()],
            values: vec![proto::TagValue {
                string_value: Some("Hello, world!".into()),
                ..Default::default()
            }],
            features: vec![proto::Feature {
                id: Some(7),
                tags: vec![0, 0],
                r#type: Some(GeomType::Point as i32),
                geometry: vec![9, 50, 34],
            }],
            extent: 4096,
        };

        proto::Tile { layers: vec![layer] }.encode_to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commands(geometry: &[u32]) -> Vec<Result<Command, GeometryError>> {
        GeometryIter::new(geometry).collect()
    }

    #[test]
    fn empty_geometry_iter() {
        assert_eq!(commands(&[]), vec![]);
    }

    #[test]
    fn single_geometry_iter() {
        assert_eq!(commands(&[9, 50, 34]), vec![Ok(Command::MoveTo(25, 17))]);
        assert_eq!(commands(&[10, 50, 34]), vec![Ok(Command::LineTo(25, 17))]);
        assert_eq!(commands(&[15]), vec![Ok(Command::ClosePath)]);
    }

    #[test]
    fn multi_geometry_iter() {
        assert_eq!(commands(&[17, 10, 14, 3, 9]), vec![
            Ok(Command::MoveTo(5, 7)),
            Ok(Command::MoveTo(-2, -5)),
        ]);

        assert_eq!(commands(&[9, 4, 4, 18, 0, 16, 16, 0]), vec![
            Ok(Command::MoveTo(2, 2)),
            Ok(Command::LineTo(0, 8)),
            Ok(Command::LineTo(8, 0)),
        ]);

        assert_eq!(commands(&[9, 6, 12, 18, 10, 12, 24, 44, 15]), vec![
            Ok(Command::MoveTo(3, 6)),
            Ok(Command::LineTo(5, 6)),
            Ok(Command::LineTo(12, 22)),
            Ok(Command::ClosePath),
        ]);
    }

    #[test]
    fn invalid_geometry_iter() {
        // Unknown command id.
        assert_eq!(commands(&[11, 0, 0]), vec![Err(GeometryError::InvalidCommand(3))]);

        // LineTo declaring three pairs with only two present.
        let geometry = [9, 0, 0, 26, 2, 2, 4, 4];
        let result = commands(&geometry);
        assert_eq!(result.last(), Some(&Err(GeometryError::Truncated)));
    }

    #[test]
    fn truncated_geometry_emits_nothing() {
        let layer = proto::Layer {
            version: 2,
            name: "test".into(),
            features: vec![proto::Feature {
                r#type: Some(GeomType::Linestring as i32),
                // LineTo declares 3 pairs, stream contains 2.
                geometry: vec![9, 0, 0, 26, 2, 2, 4, 4],
                ..Default::default()
            }],
            extent: 4096,
            ..Default::default()
        };
        let bytes = proto::Tile { layers: vec![layer] }.encode_to_vec();

        let reader = Reader::new(&bytes).unwrap();
        let mut iter = reader.iter();
        assert!(iter.read_layer(0));
        assert!(iter.next_feature());

        #[derive(Default)]
        struct CountingSink(usize);
        impl GeometrySink for CountingSink {
            fn move_to(&mut self, _x: f32, _y: f32) {
                self.0 += 1;
            }

            fn line_to(&mut self, _x: f32, _y: f32) {
                self.0 += 1;
            }

            fn close_path(&mut self) {
                self.0 += 1;
            }
        }

        let mut sink = CountingSink::default();
        assert!(iter.execute_geometry(&mut sink).is_err());
        assert_eq!(sink.0, 0);
    }

    #[test]
    fn iterator_state_machine() {
        let bytes = test_tiles::hello_world();
        let reader = Reader::new(&bytes).unwrap();
        let mut iter = reader.iter();

        // Layer reads fail before a layer is selected.
        assert_eq!(iter.layer_name(), None);
        assert!(!iter.next_feature());
        assert!(!iter.read_feature(0));
        assert_eq!(iter.feature_id(), None);

        assert!(!iter.read_layer_by_name("missing"));
        assert!(iter.read_layer_by_name("helloworld"));
        assert_eq!(iter.layer_name(), Some("helloworld"));
        assert_eq!(iter.layer_extent(), Some(4096));

        // Feature reads fail before a feature is selected.
        assert_eq!(iter.feature_id(), None);
        assert_eq!(iter.feature_geometry_type(), None);

        assert!(iter.next_feature());
        assert_eq!(iter.feature_id(), Some(7));
        assert_eq!(iter.feature_geometry_type(), Some(GeomType::Point));
        assert_eq!(iter.feature_tag("name"), Some(Value::from("Hello, world!")));
        assert_eq!(iter.feature_tag("name:en"), None);

        // The cursor falls back onto the layer at the end of the features.
        assert!(!iter.next_feature());
        assert_eq!(iter.feature_id(), None);
        assert_eq!(iter.layer_name(), Some("helloworld"));

        // Indexed feature reads work from the layer state.
        assert!(iter.read_feature(0));
        assert_eq!(iter.feature_id(), Some(7));
        assert!(!iter.read_feature(1));
    }

    #[test]
    fn rejects_malformed_tiles() {
        assert!(Reader::new(&[0xff, 0xff, 0xff]).is_err());
    }

    #[test]
    fn geometry_normalization() {
        let bytes = test_tiles::hello_world();
        let reader = Reader::new(&bytes).unwrap();
        let mut iter = reader.iter();
        iter.read_layer(0);
        iter.next_feature();

        struct PointSink(Vec<(f32, f32)>);
        impl GeometrySink for PointSink {
            fn move_to(&mut self, x: f32, y: f32) {
                self.0.push((x, y));
            }

            fn line_to(&mut self, x: f32, y: f32) {
                self.0.push((x, y));
            }

            fn close_path(&mut self) {}
        }

        let mut sink = PointSink(Vec::new());
        iter.execute_geometry(&mut sink).unwrap();
        assert_eq!(sink.0, vec![(25. / 4096., 17. / 4096.)]);
    }
}
