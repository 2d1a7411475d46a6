//! Per-layer feature indexes for accelerated filter evaluation.
//!
//! During style load, every layer filter declares the (field, value) pairs it
//! would benefit from indexing into an [`IndexDescription`]. The tile
//! pipeline then makes a single pass over each referenced MVT layer and
//! builds [`Bitset`]s over its feature indices, which the expression engine
//! uses to answer common predicates without visiting every feature.

use std::collections::{HashMap, HashSet};

use crate::mvt::proto::{GeomType, Layer};
use crate::value::Value;

/// A packed bit array over the features of one MVT layer.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Bitset {
    blocks: Vec<u64>,
    len: usize,
}

impl Bitset {
    /// Create a bitset with `len` cleared bits.
    pub fn new(len: usize) -> Self {
        Self { blocks: vec![0; len.div_ceil(64)], len }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn set(&mut self, index: usize) {
        debug_assert!(index < self.len);
        self.blocks[index / 64] |= 1 << (index % 64);
    }

    pub fn get(&self, index: usize) -> bool {
        debug_assert!(index < self.len);
        self.blocks[index / 64] & (1 << (index % 64)) != 0
    }

    /// Set all bits which are set in `other`.
    pub fn union(&mut self, other: &Self) {
        debug_assert_eq!(self.len, other.len);
        for (block, other_block) in self.blocks.iter_mut().zip(&other.blocks) {
            *block |= other_block;
        }
    }

    /// Clear all bits which are cleared in `other`.
    pub fn intersect(&mut self, other: &Self) {
        debug_assert_eq!(self.len, other.len);
        for (block, other_block) in self.blocks.iter_mut().zip(&other.blocks) {
            *block &= other_block;
        }
    }

    /// Flip every bit.
    pub fn invert(&mut self) {
        for block in &mut self.blocks {
            *block = !*block;
        }

        // Keep the bits beyond `len` cleared.
        let tail = self.len % 64;
        if tail != 0
            && let Some(last) = self.blocks.last_mut()
        {
            *last &= (1 << tail) - 1;
        }
    }

    /// Find the first set bit at or after `start`.
    pub fn next_set_bit(&self, start: usize) -> Option<usize> {
        if start >= self.len {
            return None;
        }

        let mut block_index = start / 64;
        // Mask off bits before the starting position.
        let mut block = self.blocks[block_index] & !((1u64 << (start % 64)) - 1);

        loop {
            if block != 0 {
                let index = block_index * 64 + block.trailing_zeros() as usize;
                return (index < self.len).then_some(index);
            }

            block_index += 1;
            block = *self.blocks.get(block_index)?;
        }
    }

    /// Iterate over the indices of all set bits.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        let mut next = self.next_set_bit(0);
        std::iter::from_fn(move || {
            let index = next?;
            next = self.next_set_bit(index + 1);
            Some(index)
        })
    }

    pub fn count(&self) -> usize {
        self.blocks.iter().map(|block| block.count_ones() as usize).sum()
    }
}

/// A hashable key derived from an indexable tag value.
#[derive(PartialEq, Eq, Hash, Clone, Debug)]
pub enum IndexKey {
    String(String),
    Number(u64),
    Boolean(bool),
}

impl IndexKey {
    /// Derive a key from a value, if the value's type is indexable.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(_) => Some(Self::String(value.get_string()?.into())),
            // Normalize zero so -0.0 and 0.0 share a key, like `Value` equality.
            Value::Number(number) => {
                let number = if *number == 0. { 0. } else { *number };
                Some(Self::Number(number.to_bits()))
            },
            Value::Boolean(boolean) => Some(Self::Boolean(*boolean)),
            _ => None,
        }
    }
}

/// Index demands collected from the style's filters at load time.
///
/// Only values named here are indexed, which keeps the index from exploding
/// on high-cardinality fields.
#[derive(Default, Debug)]
pub struct IndexDescription {
    layers: HashMap<String, LayerDescription>,
}

#[derive(Default, Debug)]
struct LayerDescription {
    fields: HashMap<String, FieldDescription>,
    geometry_type: bool,
}

#[derive(Default, Debug)]
struct FieldDescription {
    values: HashSet<IndexKey>,
    has: bool,
}

impl IndexDescription {
    /// Request an index over `field == value` for a layer.
    pub fn add_value(&mut self, layer: &str, field: &str, key: IndexKey) {
        self.field_mut(layer, field).values.insert(key);
    }

    /// Request an index over `has(field)` for a layer.
    pub fn add_has(&mut self, layer: &str, field: &str) {
        self.field_mut(layer, field).has = true;
    }

    /// Request geometry type indexes for a layer.
    pub fn add_geometry_type(&mut self, layer: &str) {
        self.layers.entry(layer.into()).or_default().geometry_type = true;
    }

    pub fn has_layer(&self, layer: &str) -> bool {
        self.layers.contains_key(layer)
    }

    fn field_mut(&mut self, layer: &str, field: &str) -> &mut FieldDescription {
        self.layers.entry(layer.into()).or_default().fields.entry(field.into()).or_default()
    }

    fn layer(&self, layer: &str) -> Option<&LayerDescription> {
        self.layers.get(layer)
    }
}

/// Prebuilt bitsets for the MVT layers of a single tile.
#[derive(Default, Debug)]
pub struct FeatureIndex {
    layers: HashMap<usize, LayerIndex>,
}

#[derive(Default, Debug)]
struct LayerIndex {
    values: HashMap<(String, IndexKey), Bitset>,
    has: HashMap<String, Bitset>,
    geometry: HashMap<GeomType, Bitset>,
}

impl FeatureIndex {
    pub fn has_layer(&self, layer_index: usize) -> bool {
        self.layers.contains_key(&layer_index)
    }

    /// Build all requested bitsets for one MVT layer in a single pass.
    pub fn index_layer(&mut self, layer_index: usize, layer: &Layer, description: &IndexDescription) {
        if self.layers.contains_key(&layer_index) {
            return;
        }

        let Some(layer_description) = description.layer(&layer.name) else { return };

        let feature_count = layer.features.len();
        let mut index = LayerIndex::default();

        if layer_description.geometry_type {
            for geometry in [GeomType::Point, GeomType::Linestring, GeomType::Polygon] {
                index.geometry.insert(geometry, Bitset::new(feature_count));
            }
        }

        // Per-key cache of whether the field is described, and per-value
        // cache of the bitset it feeds, so the value table is only decoded
        // once per distinct entry.
        let mut fields: Vec<Option<FieldBuild>> = Vec::new();
        fields.resize_with(layer.keys.len(), || None);

        for (feature_index, feature) in layer.features.iter().enumerate() {
            if layer_description.geometry_type
                && let Some(raw) = feature.r#type
                && let Ok(geometry) = GeomType::try_from(raw)
                && let Some(bitset) = index.geometry.get_mut(&geometry)
            {
                bitset.set(feature_index);
            }

            for pair in feature.tags.chunks_exact(2) {
                let (key, value) = (pair[0] as usize, pair[1] as usize);
                if key >= layer.keys.len() || value >= layer.values.len() {
                    continue;
                }

                let field = fields[key].get_or_insert_with(|| {
                    let description = layer_description.fields.get(&layer.keys[key]);
                    FieldBuild {
                        described: description.is_some(),
                        has: description
                            .is_some_and(|description| description.has)
                            .then(|| Bitset::new(feature_count)),
                        values: HashMap::new(),
                    }
                });

                if !field.described {
                    continue;
                }

                if let Some(has) = &mut field.has {
                    has.set(feature_index);
                }

                let bitset = field.values.entry(value as u32).or_insert_with(|| {
                    let decoded = layer.values[value].to_value();
                    let field_name = &layer.keys[key];
                    let interesting = IndexKey::from_value(&decoded).is_some_and(|key| {
                        layer_description.fields[field_name].values.contains(&key)
                    });
                    interesting.then(|| Bitset::new(feature_count))
                });

                if let Some(bitset) = bitset {
                    bitset.set(feature_index);
                }
            }
        }

        // Demanded pairs which never occurred still get an empty bitset, so
        // lookups can distinguish "no matches" from "not indexed".
        for (field_name, field_description) in &layer_description.fields {
            if field_description.has {
                index.has.entry(field_name.clone()).or_insert_with(|| Bitset::new(feature_count));
            }
            for key in &field_description.values {
                index
                    .values
                    .entry((field_name.clone(), key.clone()))
                    .or_insert_with(|| Bitset::new(feature_count));
            }
        }

        // Move the per-field builds into the queryable index.
        for (key, field) in fields.into_iter().enumerate() {
            let Some(field) = field else { continue };
            let field_name = &layer.keys[key];

            if let Some(has) = field.has {
                index.has.insert(field_name.clone(), has);
            }

            for (value, bitset) in field.values {
                let Some(bitset) = bitset else { continue };
                let decoded = layer.values[value as usize].to_value();
                if let Some(index_key) = IndexKey::from_value(&decoded) {
                    index.values.insert((field_name.clone(), index_key), bitset);
                }
            }
        }

        self.layers.insert(layer_index, index);
    }

    /// Get the bitset of features where `field == value`.
    pub fn value_bitset(&self, layer_index: usize, field: &str, value: &Value) -> Option<&Bitset> {
        let key = IndexKey::from_value(value)?;
        self.layers.get(&layer_index)?.values.get(&(field.into(), key))
    }

    /// Get the bitset of features carrying `field`.
    pub fn has_bitset(&self, layer_index: usize, field: &str) -> Option<&Bitset> {
        self.layers.get(&layer_index)?.has.get(field)
    }

    /// Get the bitset of features with a specific geometry type.
    pub fn geometry_bitset(&self, layer_index: usize, geometry: GeomType) -> Option<&Bitset> {
        self.layers.get(&layer_index)?.geometry.get(&geometry)
    }
}

struct FieldBuild {
    described: bool,
    has: Option<Bitset>,
    values: HashMap<u32, Option<Bitset>>,
}
