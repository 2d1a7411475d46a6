//! Expression evaluation.

use std::cmp::Ordering;
use std::env;

use crate::expr::{EvalError, EvalResult, Expression, MatchExpression, Op, OpExpression};
use crate::scope::RenderScope;
use crate::value::{Collator, FormatPart, ResolvedImage, Value};

impl Expression {
    /// Evaluate the expression against a render scope.
    ///
    /// Evaluation never mutates the tree; failures are non-fatal and handled
    /// by the nearest enclosing `coalesce` or by the calling layer.
    pub fn eval(&self, scope: &RenderScope<'_>) -> EvalResult {
        match self {
            Self::Literal(value) => Ok(value.clone()),
            Self::Op(op) => op.eval(scope),
            Self::Match(match_expression) => match_expression.eval(scope),
            Self::Interpolate(interpolate) => interpolate.eval(scope),
            Self::Step(step) => step.eval(scope),
            Self::Format(sections) => eval_format(sections, scope),
        }
    }
}

impl OpExpression {
    fn eval(&self, scope: &RenderScope<'_>) -> EvalResult {
        let args = &self.args;

        match self.op {
            Op::Not => {
                let value = boolean(&args[0].eval(scope)?)?;
                Ok(Value::Boolean(!value))
            },

            Op::Any | Op::None => {
                let inverted = self.op == Op::None;
                for arg in args {
                    if boolean(&arg.eval(scope)?)? {
                        return Ok(Value::Boolean(true ^ inverted));
                    }
                }
                Ok(Value::Boolean(false ^ inverted))
            },

            Op::All => {
                for arg in args {
                    if !boolean(&arg.eval(scope)?)? {
                        return Ok(Value::Boolean(false));
                    }
                }
                Ok(Value::Boolean(true))
            },

            Op::Get => {
                let key = args[0].eval(scope)?;
                let key = string(&key)?;
                Ok(scope.feature_tag(key).unwrap_or(Value::Null))
            },

            Op::Has | Op::NotHas => {
                let key = args[0].eval(scope)?;
                let key = string(&key)?;
                let has = scope.feature_tag(key).is_some();
                Ok(Value::Boolean(has ^ (self.op == Op::NotHas)))
            },

            Op::In | Op::NotIn => {
                let inverted = self.op == Op::NotIn;
                let needle = args[0].eval(scope)?;

                for arg in &args[1..] {
                    let candidate = arg.eval(scope)?;
                    // The haystack is either the inline argument list or a
                    // single array argument.
                    let found = candidate == needle
                        || candidate
                            .get_array()
                            .is_some_and(|array| array.contains(&needle));

                    if found {
                        return Ok(Value::Boolean(true ^ inverted));
                    }
                }

                Ok(Value::Boolean(false ^ inverted))
            },

            Op::Eq | Op::Ne | Op::Lt | Op::Gt | Op::Le | Op::Ge => self.eval_comparison(scope),

            Op::Case => {
                let mut pairs = args.chunks_exact(2);
                for pair in &mut pairs {
                    if boolean(&pair[0].eval(scope)?)? {
                        return pair[1].eval(scope);
                    }
                }

                match pairs.remainder() {
                    [fallback] => fallback.eval(scope),
                    _ => Err(EvalError("no case matched and there was no fallback")),
                }
            },

            Op::Coalesce => {
                for arg in args {
                    match arg.eval(scope) {
                        Ok(value) if !value.is_null() => return Ok(value),
                        // Failed or null branches fall through.
                        _ => (),
                    }
                }
                Ok(Value::Null)
            },

            Op::Concat => {
                let mut output = String::new();
                for arg in args {
                    output.push_str(&arg.eval(scope)?.as_string());
                }
                Ok(Value::from(output))
            },

            Op::Downcase => {
                let value = args[0].eval(scope)?;
                Ok(Value::from(string(&value)?.to_lowercase()))
            },

            Op::Upcase => {
                let value = args[0].eval(scope)?;
                Ok(Value::from(string(&value)?.to_uppercase()))
            },

            Op::ResolvedLocale => {
                let value = args[0].eval(scope)?;
                value.get_collator().ok_or(EvalError("expected a collator"))?;
                Ok(Value::from(resolved_locale()))
            },

            Op::Collator => {
                // A missing or null case-sensitive member means insensitive.
                let case_sensitive = args[0]
                    .eval(scope)
                    .ok()
                    .and_then(|value| value.get_boolean())
                    .unwrap_or(false);
                Ok(Value::Collator(Collator { case_sensitive }))
            },

            Op::Add | Op::Mul | Op::Min | Op::Max => {
                let mut result = finite_number(&args[0].eval(scope)?)?;
                for arg in &args[1..] {
                    let operand = finite_number(&arg.eval(scope)?)?;
                    result = match self.op {
                        Op::Add => result + operand,
                        Op::Mul => result * operand,
                        Op::Min => result.min(operand),
                        Op::Max => result.max(operand),
                        _ => unreachable!(),
                    };
                }
                Ok(Value::Number(result))
            },

            Op::Sub => {
                let first = finite_number(&args[0].eval(scope)?)?;
                match args.get(1) {
                    Some(arg) => Ok(Value::Number(first - finite_number(&arg.eval(scope)?)?)),
                    None => Ok(Value::Number(-first)),
                }
            },

            Op::Div | Op::Rem | Op::Pow => {
                let a = finite_number(&args[0].eval(scope)?)?;
                let b = finite_number(&args[1].eval(scope)?)?;

                match self.op {
                    // Division by zero produces NaN/infinity values, which
                    // fail once consumed as numbers; `to-string` and
                    // `to-boolean` classify them instead.
                    Op::Div => Ok(Value::Number(a / b)),
                    Op::Rem => Ok(Value::Number(a % b)),
                    Op::Pow => {
                        let result = a.powf(b);
                        if result.is_nan() {
                            return Err(EvalError("exponentiation has no real result"));
                        }
                        Ok(Value::Number(result))
                    },
                    _ => unreachable!(),
                }
            },

            Op::Abs
            | Op::Acos
            | Op::Asin
            | Op::Atan
            | Op::Ceil
            | Op::Cos
            | Op::Floor
            | Op::Ln
            | Op::Log10
            | Op::Log2
            | Op::Round
            | Op::Sin
            | Op::Sqrt
            | Op::Tan => {
                let operand = finite_number(&args[0].eval(scope)?)?;
                let result = match self.op {
                    Op::Abs => operand.abs(),
                    Op::Acos => operand.acos(),
                    Op::Asin => operand.asin(),
                    Op::Atan => operand.atan(),
                    Op::Ceil => operand.ceil(),
                    Op::Cos => operand.cos(),
                    Op::Floor => operand.floor(),
                    Op::Ln => operand.ln(),
                    Op::Log10 => operand.log10(),
                    Op::Log2 => operand.log2(),
                    // Round away from zero at the midpoint, like libm.
                    Op::Round => operand.round(),
                    Op::Sin => operand.sin(),
                    Op::Sqrt => operand.sqrt(),
                    Op::Tan => operand.tan(),
                    _ => unreachable!(),
                };

                if result.is_nan() {
                    return Err(EvalError("math operation outside its domain"));
                }
                Ok(Value::Number(result))
            },

            Op::Image => {
                let value = args[0].eval(scope)?;
                let sprite = match value.get_string() {
                    Some(name) => scope
                        .sprites()
                        .and_then(|sheet| sheet.get_sprite(name, scope.scale_factor))
                        .map(|sprite| ResolvedImage { name: name.into(), sprite: Some(sprite) }),
                    None => None,
                };

                Ok(sprite.map_or(Value::Null, Value::Image))
            },

            Op::GeometryType => {
                Ok(scope.geometry_type_name().map_or(Value::Null, Value::from))
            },

            Op::Id => Ok(scope.feature_id().map_or(Value::Null, |id| Value::Number(id as f64))),

            Op::Zoom => Ok(Value::Number(scope.zoom)),

            Op::At => {
                let index = finite_number(&args[0].eval(scope)?)?;
                let value = args[1].eval(scope)?;
                let array = value.get_array().ok_or(EvalError("expected an array"))?;

                if index < 0. || index.fract() != 0. || index as usize >= array.len() {
                    return Err(EvalError("array index out of bounds"));
                }
                Ok(array[index as usize].clone())
            },

            Op::IndexOf => self.eval_index_of(scope),

            Op::Length => {
                let value = args[0].eval(scope)?;
                match &value {
                    Value::String(_) => {
                        let length = value.get_string().unwrap_or_default().chars().count();
                        Ok(Value::Number(length as f64))
                    },
                    Value::Array(array) => Ok(Value::Number(array.len() as f64)),
                    _ => Err(EvalError("expected a string or array")),
                }
            },

            Op::Slice => self.eval_slice(scope),

            Op::TypeOf => Ok(Value::from(args[0].eval(scope)?.type_name())),

            Op::ToBoolean => {
                let value = args[0].eval(scope)?;
                let result = match &value {
                    Value::Null => false,
                    Value::Boolean(boolean) => *boolean,
                    Value::Number(number) => *number != 0. && !number.is_nan(),
                    Value::String(_) => !value.get_string().unwrap_or_default().is_empty(),
                    _ => true,
                };
                Ok(Value::Boolean(result))
            },

            Op::ToColor => {
                for arg in args {
                    if let Ok(value) = arg.eval(scope)
                        && let Some(color) = value.get_color()
                    {
                        return Ok(Value::Color(color));
                    }
                }
                Err(EvalError("no argument could be converted to a color"))
            },

            Op::ToNumber => {
                for arg in args {
                    let Ok(value) = arg.eval(scope) else { continue };
                    let number = match &value {
                        Value::Null => Some(0.),
                        Value::Boolean(boolean) => Some(*boolean as u8 as f64),
                        Value::Number(number) => Some(*number),
                        Value::String(_) => {
                            parse_json_number(value.get_string().unwrap_or_default())
                        },
                        _ => None,
                    };

                    if let Some(number) = number {
                        return Ok(Value::Number(number));
                    }
                }
                Err(EvalError("no argument could be converted to a number"))
            },

            Op::ToString => Ok(Value::from(args[0].eval(scope)?.as_string())),
        }
    }

    fn eval_comparison(&self, scope: &RenderScope<'_>) -> EvalResult {
        let args = &self.args;
        let a = args[0].eval(scope)?;
        let b = args[1].eval(scope)?;

        let ordering = if let Some(collator_arg) = args.get(2) {
            let collator = collator_arg
                .eval(scope)?
                .get_collator()
                .ok_or(EvalError("expected a collator"))?;
            collate(string(&a)?, string(&b)?, collator.case_sensitive)
        } else if matches!(self.op, Op::Eq | Op::Ne) {
            // Plain (in)equality is structural.
            let equal = a == b;
            return Ok(Value::Boolean(equal ^ (self.op == Op::Ne)));
        } else if let Some(a) = a.get_number() {
            let b = number(&b)?;
            a.partial_cmp(&b).ok_or(EvalError("numbers are not comparable"))?
        } else if let Some(a) = a.get_string() {
            collate(a, string(&b)?, true)
        } else {
            return Err(EvalError("expected comparable operands"));
        };

        let result = match self.op {
            Op::Eq => ordering == Ordering::Equal,
            Op::Ne => ordering != Ordering::Equal,
            Op::Lt => ordering == Ordering::Less,
            Op::Gt => ordering == Ordering::Greater,
            Op::Le => ordering != Ordering::Greater,
            Op::Ge => ordering != Ordering::Less,
            _ => unreachable!(),
        };
        Ok(Value::Boolean(result))
    }

    fn eval_index_of(&self, scope: &RenderScope<'_>) -> EvalResult {
        let args = &self.args;
        let needle = args[0].eval(scope)?;
        let haystack = args[1].eval(scope)?;

        let start = match args.get(2) {
            Some(arg) => {
                let start = finite_number(&arg.eval(scope)?)?;
                if start < 0. || start.fract() != 0. {
                    return Err(EvalError("expected a non-negative integer start"));
                }
                start as usize
            },
            None => 0,
        };

        match &haystack {
            Value::String(_) => {
                let haystack = haystack.get_string().unwrap_or_default();
                let needle = string(&needle)?;

                // Work in code points rather than bytes.
                let offset = haystack
                    .char_indices()
                    .nth(start)
                    .map_or(haystack.len(), |(offset, _)| offset);

                match haystack[offset..].find(needle) {
                    Some(found) => {
                        let index = haystack[..offset + found].chars().count();
                        Ok(Value::Number(index as f64))
                    },
                    None => Ok(Value::Number(-1.)),
                }
            },
            Value::Array(array) => {
                let found = array
                    .iter()
                    .enumerate()
                    .skip(start)
                    .find(|(_, element)| **element == needle);
                Ok(Value::Number(found.map_or(-1., |(index, _)| index as f64)))
            },
            _ => Err(EvalError("expected a string or array")),
        }
    }

    fn eval_slice(&self, scope: &RenderScope<'_>) -> EvalResult {
        let args = &self.args;
        let value = args[0].eval(scope)?;

        let length = match &value {
            Value::String(_) => value.get_string().unwrap_or_default().chars().count(),
            Value::Array(array) => array.len(),
            _ => return Err(EvalError("expected a string or array")),
        };

        // Negative indices count from the end; both ends clamp to the
        // value's bounds.
        let resolve = |arg: &Expression| -> Result<usize, EvalError> {
            let index = finite_number(&arg.eval(scope)?)?;
            if index.fract() != 0. {
                return Err(EvalError("expected an integer index"));
            }
            let index = if index < 0. { index + length as f64 } else { index };
            Ok(index.clamp(0., length as f64) as usize)
        };

        let start = resolve(&args[1])?;
        let end = match args.get(2) {
            Some(arg) => resolve(arg)?,
            None => length,
        };
        let end = end.max(start);

        match &value {
            Value::String(_) => {
                let input = value.get_string().unwrap_or_default();
                let sliced: String = input.chars().skip(start).take(end - start).collect();
                Ok(Value::from(sliced))
            },
            Value::Array(array) => Ok(Value::Array(array[start..end].to_vec())),
            _ => unreachable!(),
        }
    }
}

impl MatchExpression {
    fn eval(&self, scope: &RenderScope<'_>) -> EvalResult {
        let input = self.input.eval(scope)?;

        for arm in &self.arms {
            if arm.labels.contains(&input) {
                return arm.value.eval(scope);
            }
        }

        match &self.fallback {
            Some(fallback) => fallback.eval(scope),
            None => Err(EvalError("no match arm matched and there was no fallback")),
        }
    }
}

/// Evaluate a `format` expression into a formatted value.
fn eval_format(sections: &[super::FormatSection], scope: &RenderScope<'_>) -> EvalResult {
    let mut parts = Vec::with_capacity(sections.len());

    for section in sections {
        let value = section.text.eval(scope)?;
        let mut part = FormatPart::default();

        match &value {
            Value::String(_) => {
                let text = value.get_string().unwrap_or_default();
                if text.is_empty() {
                    continue;
                }
                part.text = text.into();
            },
            Value::Image(image) => {
                part.text = value.as_string();
                part.sprite = image.sprite.clone();
            },
            Value::Null => continue,
            _ => return Err(EvalError("expected a string or image in format")),
        }

        if let Some(expression) = &section.text_color {
            let value = expression.eval(scope)?;
            if !value.is_null() {
                part.text_color =
                    Some(value.get_color().ok_or(EvalError("expected a color"))?);
            }
        }

        if let Some(expression) = &section.font_scale {
            let value = expression.eval(scope)?;
            if !value.is_null() {
                part.font_scale =
                    Some(value.get_number().ok_or(EvalError("expected a number"))?);
            }
        }

        parts.push(part);
    }

    Ok(Value::Formatted(parts))
}

/// Compare two strings, optionally folding case.
///
/// Comparison is by Unicode scalar values, which yields a total and stable
/// order without locale tables.
fn collate(a: &str, b: &str, case_sensitive: bool) -> Ordering {
    if case_sensitive {
        a.cmp(b)
    } else {
        a.chars().flat_map(char::to_lowercase).cmp(b.chars().flat_map(char::to_lowercase))
    }
}

/// The runtime locale as a BCP-47-style tag.
fn resolved_locale() -> String {
    let locale = ["LC_ALL", "LC_MESSAGES", "LANG"]
        .iter()
        .find_map(|name| env::var(name).ok().filter(|value| !value.is_empty()))
        .unwrap_or_else(|| "C".into());

    // Strip a trailing encoding and use dashes between subtags.
    let locale = locale.split('.').next().unwrap_or(&locale);
    locale.replace('_', "-")
}

/// Parse a number the way JSON does, locale-independent.
fn parse_json_number(input: &str) -> Option<f64> {
    let input = input.trim();

    // Reject alphabetic forms like "inf" and "NaN" accepted by Rust's float
    // parser.
    let plain = input
        .bytes()
        .all(|byte| byte.is_ascii_digit() || matches!(byte, b'+' | b'-' | b'.' | b'e' | b'E'));
    if !plain {
        return None;
    }

    input.parse().ok().filter(|number: &f64| number.is_finite())
}

pub(crate) fn finite_number(value: &Value) -> Result<f64, EvalError> {
    match value.get_number() {
        Some(number) if number.is_finite() => Ok(number),
        Some(_) => Err(EvalError("number is not finite")),
        None => Err(EvalError("expected a number")),
    }
}

fn number(value: &Value) -> Result<f64, EvalError> {
    value.get_number().ok_or(EvalError("expected a number"))
}

fn boolean(value: &Value) -> Result<bool, EvalError> {
    value.get_boolean().ok_or(EvalError("expected a boolean"))
}

fn string(value: &Value) -> Result<&str, EvalError> {
    value.get_string().ok_or(EvalError("expected a string"))
}
