//! Dynamically typed values for the expression engine.

use std::sync::OnceLock;

use crate::Error;
use crate::color::Color;
use crate::sprite::Sprite;

/// A dynamically typed value produced and consumed by expressions.
///
/// Values are immutable once constructed; clones are deep. Equality is
/// structural, with numbers compared exactly.
#[derive(Clone, Default, Debug)]
pub enum Value {
    #[default]
    Null,
    Number(f64),
    Boolean(bool),
    String(StringValue),
    Color(Color),
    Collator(Collator),
    Image(ResolvedImage),
    Array(Vec<Value>),
    Formatted(Vec<FormatPart>),
}

impl Value {
    /// Convert a JSON literal into a value.
    ///
    /// Accepts scalars and arrays of literals; objects are rejected.
    pub fn from_json(json: &serde_json::Value) -> Result<Self, Error> {
        match json {
            serde_json::Value::Null => Ok(Self::Null),
            serde_json::Value::Bool(boolean) => Ok(Self::Boolean(*boolean)),
            serde_json::Value::Number(number) => match number.as_f64() {
                Some(number) => Ok(Self::Number(number)),
                None => Err(Error::InvalidExpression(format!("number {number} out of range"))),
            },
            serde_json::Value::String(string) => Ok(Self::from(string.as_str())),
            serde_json::Value::Array(array) => {
                let elements = array.iter().map(Self::from_json).collect::<Result<_, _>>()?;
                Ok(Self::Array(elements))
            },
            serde_json::Value::Object(_) => {
                Err(Error::InvalidExpression("objects cannot be literal values".into()))
            },
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn get_number(&self) -> Option<f64> {
        match self {
            Self::Number(number) => Some(*number),
            _ => None,
        }
    }

    pub fn get_boolean(&self) -> Option<bool> {
        match self {
            Self::Boolean(boolean) => Some(*boolean),
            _ => None,
        }
    }

    pub fn get_string(&self) -> Option<&str> {
        match self {
            Self::String(string) => Some(&string.text),
            _ => None,
        }
    }

    /// Get the value as a color.
    ///
    /// Strings are parsed as CSS colors on the first call; the result,
    /// including a failed parse, is cached for subsequent calls.
    pub fn get_color(&self) -> Option<Color> {
        match self {
            Self::Color(color) => Some(*color),
            Self::String(string) => *string.color.get_or_init(|| Color::parse(&string.text)),
            _ => None,
        }
    }

    pub fn get_collator(&self) -> Option<Collator> {
        match self {
            Self::Collator(collator) => Some(*collator),
            _ => None,
        }
    }

    pub fn get_image(&self) -> Option<&ResolvedImage> {
        match self {
            Self::Image(image) => Some(image),
            _ => None,
        }
    }

    pub fn get_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array(array) => Some(array),
            _ => None,
        }
    }

    pub fn get_formatted(&self) -> Option<&[FormatPart]> {
        match self {
            Self::Formatted(parts) => Some(parts),
            _ => None,
        }
    }

    /// The type name reported by the `typeof` operator.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Number(_) => "number",
            Self::Boolean(_) => "boolean",
            Self::String(_) => "string",
            Self::Color(_) => "color",
            Self::Collator(_) => "object",
            Self::Image(_) => "resolved-image",
            Self::Array(_) => "array",
            Self::Formatted(_) => "formatter",
        }
    }

    /// Canonical textual rendering, used by `to-string`, `concat` and format
    /// parts.
    pub fn as_string(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Number(number) => number_to_string(*number),
            Self::Boolean(true) => "true".into(),
            Self::Boolean(false) => "false".into(),
            Self::String(string) => string.text.clone(),
            Self::Color(color) => color.to_string(),
            Self::Collator(_) => String::new(),
            Self::Image(image) => image.name.clone(),
            Self::Array(array) => {
                let mut out = String::from("[");
                for (i, element) in array.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    element.write_json_fragment(&mut out);
                }
                out.push(']');
                out
            },
            Self::Formatted(parts) => parts.iter().map(|part| part.text.as_str()).collect(),
        }
    }

    /// Render an array element, escaping strings like JSON.
    fn write_json_fragment(&self, out: &mut String) {
        match self {
            Self::Null => out.push_str("null"),
            Self::Array(_) => out.push_str(&self.as_string()),
            Self::Number(_) | Self::Boolean(_) => out.push_str(&self.as_string()),
            _ => out.push_str(&serde_json::to_string(&self.as_string()).unwrap_or_default()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::String(a), Self::String(b)) => a.text == b.text,
            (Self::Color(a), Self::Color(b)) => a == b,
            (Self::Collator(a), Self::Collator(b)) => a == b,
            (Self::Image(a), Self::Image(b)) => a.name == b.name,
            (Self::Array(a), Self::Array(b)) => a == b,
            (Self::Formatted(a), Self::Formatted(b)) => a == b,
            _ => false,
        }
    }
}

impl From<f64> for Value {
    fn from(number: f64) -> Self {
        Self::Number(number)
    }
}

impl From<bool> for Value {
    fn from(boolean: bool) -> Self {
        Self::Boolean(boolean)
    }
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Self::String(StringValue { text: text.into(), color: OnceLock::new() })
    }
}

impl From<String> for Value {
    fn from(text: String) -> Self {
        Self::String(StringValue { text, color: OnceLock::new() })
    }
}

impl From<Color> for Value {
    fn from(color: Color) -> Self {
        Self::Color(color)
    }
}

impl From<Vec<Value>> for Value {
    fn from(array: Vec<Value>) -> Self {
        Self::Array(array)
    }
}

/// A string value with its cached color parse.
///
/// The cache only ever transitions from unset to parsed; a parse failure is
/// remembered just like a success.
#[derive(Clone, Debug)]
pub struct StringValue {
    text: String,
    color: OnceLock<Option<Color>>,
}

/// Locale-sensitive string comparison parameters.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub struct Collator {
    pub case_sensitive: bool,
}

/// An icon name resolved through a sprite sheet.
#[derive(Clone, Debug)]
pub struct ResolvedImage {
    pub name: String,
    pub sprite: Option<Sprite>,
}

/// One part of a formatted value.
#[derive(Clone, Default, Debug)]
pub struct FormatPart {
    pub text: String,
    pub sprite: Option<Sprite>,
    pub font_scale: Option<f64>,
    pub text_color: Option<Color>,
}

impl PartialEq for FormatPart {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text
            && self.font_scale == other.font_scale
            && self.text_color == other.text_color
            && match (&self.sprite, &other.sprite) {
                (Some(a), Some(b)) => a == b,
                (None, None) => true,
                _ => false,
            }
    }
}

/// Render a number the way the style spec's `to-string` does.
pub fn number_to_string(number: f64) -> String {
    if number.is_nan() {
        "NaN".into()
    } else if number == f64::INFINITY {
        "Infinity".into()
    } else if number == f64::NEG_INFINITY {
        "-Infinity".into()
    } else {
        // Rust's float formatting is the shortest round-trip representation.
        format!("{number}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structural_equality() {
        assert_eq!(Value::Null, Value::Null);
        assert_eq!(Value::from(10.), Value::from(10.));
        assert_ne!(Value::from(10.), Value::from("10"));
        assert_ne!(Value::from(10.), Value::from(20.));
        assert_eq!(Value::from("a"), Value::from("a"));

        let array1 = Value::from(vec![Value::from("Hello, world!"), Value::from(true)]);
        let array2 = Value::from(vec![Value::from("Hello, world!"), Value::from(true)]);
        assert_eq!(array1, array2);

        let array3 = Value::from(vec![Value::from(true), Value::from("Hello, world!")]);
        assert_ne!(array1, array3);
    }

    #[test]
    fn array_as_string() {
        let array = Value::from(vec![Value::from("Hello, world!"), Value::from(true)]);
        assert_eq!(array.as_string(), "[\"Hello, world!\",true]");

        let nested = Value::from(vec![
            Value::from(1.),
            Value::from(0.5),
            Value::Null,
            Value::from(true),
            Value::from(vec![Value::from("b")]),
        ]);
        assert_eq!(nested.as_string(), "[1,0.5,null,true,[\"b\"]]");
    }

    #[test]
    fn number_rendering() {
        assert_eq!(number_to_string(2.), "2");
        assert_eq!(number_to_string(0.5), "0.5");
        assert_eq!(number_to_string(f64::NAN), "NaN");
        assert_eq!(number_to_string(f64::INFINITY), "Infinity");
        assert_eq!(number_to_string(f64::NEG_INFINITY), "-Infinity");
    }

    #[test]
    fn color_cache() {
        let value = Value::from("gold");
        assert_eq!(value.get_color(), Color::parse("gold"));
        assert_eq!(value.get_color(), Color::parse("gold"));

        let invalid = Value::from("not a color");
        assert_eq!(invalid.get_color(), None);
        assert_eq!(invalid.get_color(), None);
    }

    #[test]
    fn json_literals() {
        let json: serde_json::Value = serde_json::from_str("[1, true, \"a\", null]").unwrap();
        let value = Value::from_json(&json).unwrap();
        let expected = Value::from(vec![
            Value::from(1.),
            Value::from(true),
            Value::from("a"),
            Value::Null,
        ]);
        assert_eq!(value, expected);

        let object: serde_json::Value = serde_json::from_str("{\"a\": 1}").unwrap();
        assert!(Value::from_json(&object).is_err());
    }
}
