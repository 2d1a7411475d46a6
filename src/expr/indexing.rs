//! Index-accelerated filter evaluation.
//!
//! Compilation leaves filters as ordinary expression trees; this module adds
//! the two index-related operations on top: collecting the index demands of
//! a filter at style load, and evaluating a filter to a bitset over all
//! features of a layer, consulting the prebuilt [`FeatureIndex`] for the
//! common predicate shapes.

use crate::expr::{Expression, Op, OpExpression};
use crate::index::{Bitset, IndexDescription, IndexKey};
use crate::mvt::proto::GeomType;
use crate::scope::RenderScope;
use crate::value::Value;

impl Expression {
    /// Record the (field, value) pairs this filter would benefit from
    /// indexing.
    pub(crate) fn collect_indexes(&self, layer_name: &str, description: &mut IndexDescription) {
        let Self::Op(op) = self else { return };

        match op.op {
            Op::Not | Op::All | Op::Any | Op::None => {
                for arg in &op.args {
                    arg.collect_indexes(layer_name, description);
                }
            },

            Op::Eq | Op::Ne if op.args.len() == 2 => {
                if let (Some(field), Some(value)) = (tag_field(op), literal(&op.args[1])) {
                    if let Some(key) = IndexKey::from_value(value) {
                        description.add_value(layer_name, field, key);
                    }
                } else if is_geometry_type(&op.args[0]) && literal(&op.args[1]).is_some() {
                    description.add_geometry_type(layer_name);
                }
            },

            Op::Has | Op::NotHas => {
                if let Some(field) = literal(&op.args[0]).and_then(Value::get_string) {
                    description.add_has(layer_name, field);
                }
            },

            Op::In | Op::NotIn => {
                let Some(field) = tag_field(op) else { return };

                for arg in &op.args[1..] {
                    let Some(value) = literal(arg) else { continue };
                    let elements = match value {
                        Value::Array(elements) => elements.as_slice(),
                        other => std::slice::from_ref(other),
                    };

                    for element in elements {
                        if let Some(key) = IndexKey::from_value(element) {
                            description.add_value(layer_name, field, key);
                        }
                    }
                }
            },

            _ => (),
        }
    }

    /// Evaluate the filter as a boolean for every feature of the scope's
    /// current layer.
    ///
    /// With a mask, only masked-in features are computed; everything else
    /// stays cleared. Uses the scope's feature index where the filter shape
    /// allows it and falls back to binding each feature individually.
    pub(crate) fn eval_bitset(&self, scope: &mut RenderScope<'_>, mask: Option<&Bitset>) -> Bitset {
        let feature_count = scope.layer_feature_count().unwrap_or(0);

        if let Self::Op(op) = self {
            match op.op {
                Op::All => {
                    // Each child narrows the mask of the next.
                    let mut result = match mask {
                        Some(mask) => mask.clone(),
                        None => {
                            let mut all = Bitset::new(feature_count);
                            all.invert();
                            all
                        },
                    };

                    for arg in &op.args {
                        result = arg.eval_bitset(scope, Some(&result));
                    }
                    return result;
                },

                Op::Any | Op::None => {
                    let mut result = Bitset::new(feature_count);
                    for arg in &op.args {
                        result.union(&arg.eval_bitset(scope, mask));
                    }

                    if op.op == Op::None {
                        result.invert();
                        if let Some(mask) = mask {
                            result.intersect(mask);
                        }
                    }
                    return result;
                },

                Op::Not => {
                    let mut result = op.args[0].eval_bitset(scope, mask);
                    result.invert();
                    if let Some(mask) = mask {
                        result.intersect(mask);
                    }
                    return result;
                },

                _ => {
                    if let Some(result) = indexed_bitset(op, scope, mask) {
                        return result;
                    }
                },
            }
        }

        // Fallback: bind every candidate feature and run the filter.
        let mut result = Bitset::new(feature_count);
        match mask {
            Some(mask) => {
                for index in mask.iter() {
                    if scope.read_feature(index) && self.eval_boolean(scope, false) {
                        result.set(index);
                    }
                }
            },
            None => {
                for index in 0..feature_count {
                    if scope.read_feature(index) && self.eval_boolean(scope, false) {
                        result.set(index);
                    }
                }
            },
        }

        result
    }
}

/// Answer an indexable predicate from the feature index, if possible.
fn indexed_bitset(
    op: &OpExpression,
    scope: &RenderScope<'_>,
    mask: Option<&Bitset>,
) -> Option<Bitset> {
    let layer_index = scope.layer_index()?;
    let feature_count = scope.layer_feature_count()?;

    let mut result = match op.op {
        Op::Eq | Op::Ne if op.args.len() == 2 => {
            let value = literal(&op.args[1])?;

            if let Some(field) = tag_field(op) {
                scope.index.value_bitset(layer_index, field, value)?.clone()
            } else if is_geometry_type(&op.args[0]) {
                match geometry_type_by_name(value) {
                    Some(geometry) => {
                        scope.index.geometry_bitset(layer_index, geometry)?.clone()
                    },
                    // Comparing against something that is not a shape name
                    // matches no feature.
                    None => Bitset::new(feature_count),
                }
            } else {
                return None;
            }
        },

        Op::Has | Op::NotHas => {
            let field = literal(&op.args[0]).and_then(Value::get_string)?;
            scope.index.has_bitset(layer_index, field)?.clone()
        },

        Op::In | Op::NotIn => {
            let field = tag_field(op)?;
            let mut result = Bitset::new(feature_count);

            for arg in &op.args[1..] {
                let value = literal(arg)?;
                let elements = match value {
                    Value::Array(elements) => elements.as_slice(),
                    other => std::slice::from_ref(other),
                };

                for element in elements {
                    result.union(scope.index.value_bitset(layer_index, field, element)?);
                }
            }

            result
        },

        _ => return None,
    };

    if matches!(op.op, Op::Ne | Op::NotHas | Op::NotIn) {
        result.invert();
    }
    if let Some(mask) = mask {
        result.intersect(mask);
    }

    Some(result)
}

/// The tag name read by a `get` on a literal key, the shape produced by the
/// compile-time sugar.
fn tag_field(op: &OpExpression) -> Option<&str> {
    match op.args.first()?.as_ref() {
        Expression::Op(OpExpression { op: Op::Get, args }) => {
            literal(args.first()?).and_then(Value::get_string)
        },
        _ => None,
    }
}

fn is_geometry_type(expression: &Expression) -> bool {
    matches!(expression, Expression::Op(OpExpression { op: Op::GeometryType, .. }))
}

fn literal(expression: &Expression) -> Option<&Value> {
    match expression {
        Expression::Literal(value) => Some(value),
        _ => None,
    }
}

fn geometry_type_by_name(value: &Value) -> Option<GeomType> {
    match value.get_string()? {
        "Point" => Some(GeomType::Point),
        "LineString" => Some(GeomType::Linestring),
        "Polygon" => Some(GeomType::Polygon),
        _ => None,
    }
}
