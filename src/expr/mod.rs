//! Style expression compilation and evaluation.
//!
//! Expressions are compiled from their JSON form into immutable trees of
//! [`Expression`] nodes which can be evaluated against a [`RenderScope`].
//! Compilation failures surface as [`Error`](crate::Error); evaluation
//! failures use the lightweight [`EvalError`], since they are non-fatal and
//! bubble up at most to the nearest `coalesce` or to the layer's per-feature
//! render.

use std::fmt::{self, Display, Formatter};
use std::sync::Arc;

use crate::color::Color;
use crate::scope::RenderScope;
use crate::sprite::Sprite;
use crate::value::Value;

pub use interpolate::{Interpolate, InterpolationKind, Step, Stop};

mod eval;
mod indexing;
mod interpolate;
mod parse;

/// Failure of a single expression evaluation.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub struct EvalError(pub(crate) &'static str);

impl Display for EvalError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

pub(crate) type EvalResult = Result<Value, EvalError>;

/// A compiled style expression.
///
/// Trees are immutable after construction and safe to share across tile
/// renders; `let`-bound subexpressions are shared through the [`Arc`]s.
#[derive(Debug)]
pub enum Expression {
    /// A constant value.
    Literal(Value),
    /// An operator applied to child expressions.
    Op(OpExpression),
    /// Input matched against branch labels.
    Match(MatchExpression),
    /// Piecewise interpolation between stops.
    Interpolate(Interpolate),
    /// Piecewise-constant staircase over stops.
    Step(Step),
    /// Formatted text assembled from styled sections.
    Format(Vec<FormatSection>),
}

/// An operator node with its child expressions.
#[derive(Debug)]
pub struct OpExpression {
    pub(crate) op: Op,
    pub(crate) args: Vec<Arc<Expression>>,
}

/// A `match` expression with literal branch labels.
#[derive(Debug)]
pub struct MatchExpression {
    pub(crate) input: Arc<Expression>,
    pub(crate) arms: Vec<MatchArm>,
    pub(crate) fallback: Option<Arc<Expression>>,
}

#[derive(Debug)]
pub(crate) struct MatchArm {
    pub(crate) labels: Vec<Value>,
    pub(crate) value: Arc<Expression>,
}

/// One section of a `format` expression.
#[derive(Debug)]
pub struct FormatSection {
    pub(crate) text: Arc<Expression>,
    pub(crate) font_scale: Option<Arc<Expression>>,
    pub(crate) text_color: Option<Arc<Expression>>,
}

/// Operators taking a flat list of child expressions.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub(crate) enum Op {
    Not,
    None,
    Any,
    All,
    Has,
    NotHas,
    Get,
    In,
    NotIn,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    Case,
    Coalesce,
    Concat,
    Downcase,
    Upcase,
    ResolvedLocale,
    Collator,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    Abs,
    Acos,
    Asin,
    Atan,
    Ceil,
    Cos,
    Floor,
    Ln,
    Log10,
    Log2,
    Max,
    Min,
    Round,
    Sin,
    Sqrt,
    Tan,
    Image,
    GeometryType,
    Id,
    Zoom,
    At,
    IndexOf,
    Length,
    Slice,
    TypeOf,
    ToBoolean,
    ToColor,
    ToNumber,
    ToString,
}

impl Expression {
    /// Evaluate to a number, with `default` substituted on failure or
    /// non-finite results.
    pub fn eval_number(&self, scope: &RenderScope<'_>, default: f64) -> f64 {
        match self.eval(scope).ok().and_then(|value| value.get_number()) {
            Some(number) if number.is_finite() => number,
            _ => default,
        }
    }

    /// Evaluate to a boolean, with `default` substituted on failure.
    pub fn eval_boolean(&self, scope: &RenderScope<'_>, default: bool) -> bool {
        self.eval(scope).ok().and_then(|value| value.get_boolean()).unwrap_or(default)
    }

    /// Evaluate to a string, with `default` substituted on failure.
    pub fn eval_string(&self, scope: &RenderScope<'_>, default: &str) -> String {
        match self.eval(scope).ok() {
            Some(value) => match value.get_string() {
                Some(string) => string.into(),
                None => default.into(),
            },
            None => default.into(),
        }
    }

    /// Evaluate to a color, with `default` substituted on failure.
    pub fn eval_color(&self, scope: &RenderScope<'_>, default: Color) -> Color {
        self.eval(scope).ok().and_then(|value| value.get_color()).unwrap_or(default)
    }

    /// Evaluate to a sprite, resolving names through the scope's sprite
    /// sheet.
    pub fn eval_image(&self, scope: &RenderScope<'_>) -> Option<Sprite> {
        let value = self.eval(scope).ok()?;
        match &value {
            Value::Image(image) => image.sprite.clone(),
            Value::String(_) => {
                scope.sprites()?.get_sprite(value.get_string()?, scope.scale_factor)
            },
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc as StdArc;

    use super::*;
    use crate::Error;
    use crate::mvt::{Reader, test_tiles};
    use crate::sprite::SpriteSheet;

    fn compile(json: &str) -> Result<StdArc<Expression>, Error> {
        Expression::compile(&serde_json::from_str(json).unwrap())
    }

    fn filter_with_scope(scope: &RenderScope<'_>, json: &str) -> bool {
        compile(json).unwrap().eval_boolean(scope, false)
    }

    fn filter(json: &str) -> bool {
        filter_with_scope(&RenderScope::new(0., 1.), json)
    }

    fn eval(json: &str) -> EvalResult {
        compile(json).unwrap().eval(&RenderScope::new(0., 1.))
    }

    #[test]
    fn literal_round_trip() {
        for json in ["null", "10", "-0.5", "true", "false", "\"hello\"", "[\"a\", 1, null]"] {
            let parsed: serde_json::Value = serde_json::from_str(json).unwrap();
            let expression =
                Expression::compile(&serde_json::from_str(&format!("[\"literal\", {json}]")).unwrap())
                    .unwrap();
            let result = expression.eval(&RenderScope::new(0., 1.)).unwrap();
            assert_eq!(result, Value::from_json(&parsed).unwrap());
        }
    }

    #[test]
    fn number_array_literal() {
        let value = eval("[1, 2, 3, 4, 5]").unwrap();
        let array = value.get_array().unwrap();
        assert_eq!(array.len(), 5);
        for (i, element) in array.iter().enumerate() {
            assert_eq!(element.get_number(), Some(i as f64 + 1.));
        }
    }

    #[test]
    fn nested_array_literal_fails() {
        let result = compile("[\"in\", 2, [1, 2, 3, 4, 5]]");
        assert!(matches!(result, Err(Error::InvalidExpression(_))));
    }

    fn check_interpolate(json: &str) {
        let expression = compile(json).unwrap();

        // Exact stop values.
        for (zoom, expected) in [(12., 1.), (13., 2.), (14., 5.), (16., 9.)] {
            let scope = RenderScope::new(zoom, 1.);
            assert_eq!(expression.eval_number(&scope, -10000.), expected);
        }

        // Outliers clamp to the first and last stop.
        assert_eq!(expression.eval_number(&RenderScope::new(1., 1.), -10000.), 1.);
        assert_eq!(expression.eval_number(&RenderScope::new(100., 1.), -10000.), 9.);

        // In-between values interpolate.
        assert_eq!(expression.eval_number(&RenderScope::new(12.5, 1.), -10000.), 1.5);
        assert_eq!(expression.eval_number(&RenderScope::new(15., 1.), -10000.), 7.);
    }

    #[test]
    fn interpolate_legacy() {
        check_interpolate("{\"stops\": [[12, 1], [13, 2], [14, 5], [16, 9]]}");
    }

    #[test]
    fn interpolate_expression() {
        check_interpolate(
            "[\"interpolate\", [\"linear\"], [\"zoom\"], 12, 1, 13, 2, 14, 5, 16, 9]",
        );
    }

    #[test]
    fn interpolate_exponential() {
        let expression = compile(
            "[\"interpolate\", [\"exponential\", 2], [\"zoom\"], 0, 0, 10, 1]",
        )
        .unwrap();

        // Exponential interpolation reaches the halfway output late.
        let halfway = expression.eval_number(&RenderScope::new(5., 1.), -1.);
        assert!((halfway - (2f64.powf(5.) - 1.) / (2f64.powf(10.) - 1.)).abs() < 1e-12);
        assert_eq!(expression.eval_number(&RenderScope::new(0., 1.), -1.), 0.);
        assert_eq!(expression.eval_number(&RenderScope::new(10., 1.), -1.), 1.);
    }

    #[test]
    fn interpolate_cubic_bezier() {
        let expression = compile(
            "[\"interpolate\", [\"cubic-bezier\", 0.42, 0, 0.58, 1], [\"zoom\"], 0, 0, 10, 10]",
        )
        .unwrap();

        assert_eq!(expression.eval_number(&RenderScope::new(0., 1.), -1.), 0.);
        assert_eq!(expression.eval_number(&RenderScope::new(10., 1.), -1.), 10.);

        // The symmetric ease curve passes through the middle.
        let halfway = expression.eval_number(&RenderScope::new(5., 1.), -1.);
        assert!((halfway - 5.).abs() < 1e-4);

        // Ease-in-out starts slower than linear.
        let early = expression.eval_number(&RenderScope::new(2., 1.), -1.);
        assert!(early < 2.);
    }

    fn check_interpolate_color(json: &str) {
        let expression = compile(json).unwrap();
        let color = |zoom: f64| {
            expression.eval_color(&RenderScope::new(zoom, 1.), crate::Color::TRANSPARENT)
        };

        assert_eq!(color(12.), crate::Color::parse("#00224466").unwrap());
        assert_eq!(color(12.5), crate::Color::parse("#446688AA").unwrap());
        assert_eq!(color(13.), crate::Color::parse("#88AACCEE").unwrap());
    }

    #[test]
    fn interpolate_color_legacy() {
        check_interpolate_color("{\"stops\": [[12, \"#00224466\"], [13, \"#88AACCEE\"]]}");
    }

    #[test]
    fn interpolate_color_expression() {
        check_interpolate_color(
            "[\"interpolate\", [\"linear\"], [\"zoom\"], 12, \"#00224466\", 13, \"#88AACCEE\"]",
        );
    }

    #[test]
    fn basic_filters() {
        assert!(filter("true"));
        assert!(!filter("false"));
        assert!(!filter("[\"!\", true]"));
        assert!(filter("[\"!\", false]"));
        assert!(filter("[\"any\", false, true]"));
        assert!(!filter("[\"any\", false, false]"));
        assert!(filter("[\"none\", false, false]"));
        assert!(!filter("[\"none\", true, false]"));
        assert!(filter("[\"all\", true, true]"));
        assert!(!filter("[\"all\", false, true]"));

        assert!(!filter("[\"any\"]"));
        assert!(filter("[\"none\"]"));
        assert!(filter("[\"all\"]"));

        assert!(filter("[\"in\", 10, 20, 10, 13]"));
        assert!(filter("[\"!in\", 10, 20, 0, 13]"));
        assert!(filter("[\"==\", [\"literal\", []], [\"literal\", []]]"));
        assert!(filter(
            "[\"==\", [\"literal\", [10, true, \"A\", null]], [\"literal\", [10, true, \"A\", null]]]"
        ));
        assert!(filter("[\"in\", 13, [\"literal\", [10, 20, 0, 13]]]"));

        assert!(filter("[\"==\", null, null]"));
        assert!(filter("[\"==\", 10, 10]"));
        assert!(!filter("[\"==\", 10, 20]"));
        assert!(!filter("[\"==\", 10, \"10\"]"));
        assert!(!filter("[\"!=\", 10, 10]"));
        assert!(filter("[\"!=\", 10, 20]"));
        assert!(filter("[\"!=\", 10, \"10\"]"));
        assert!(filter("[\">\", 20, 10]"));
        assert!(!filter("[\">\", 10, 10]"));
        assert!(!filter("[\">\", 5, 10]"));
        assert!(filter("[\"<\", 10, 20]"));
        assert!(!filter("[\"<\", 10, 10]"));
        assert!(!filter("[\"<\", 10, 5]"));
        assert!(filter("[\">=\", 20, 10]"));
        assert!(filter("[\">=\", 10, 10]"));
        assert!(!filter("[\">=\", 5, 10]"));
        assert!(filter("[\"<=\", 10, 20]"));
        assert!(filter("[\"<=\", 10, 10]"));
        assert!(!filter("[\"<=\", 10, 5]"));
    }

    #[test]
    fn control_flow() {
        assert!(filter("[\"==\", [\"case\", true, 0, 1], 0]"));
        assert!(filter("[\"==\", [\"case\", false, 0, 1], 1]"));
        assert!(filter("[\"==\", [\"case\", false, 0, true, 2], 2]"));
        assert!(filter("[\"==\", [\"match\", \"a\", \"b\", 2, \"c\", 3, \"a\", 1, 0], 1]"));
        assert!(filter("[\"==\", [\"match\", \"b\", 2], 2]"));
        assert!(filter("[\"==\", [\"match\", 3, [1, 2], \"x\", [3, 4, 5], \"y\", \"z\"], \"y\"]"));

        assert!(filter("[\"==\", [\"coalesce\", null, [\"*\", 0, \"b\"], 2, 3], 2]"));
        assert!(filter("[\"==\", [\"coalesce\", null, [\"*\", 0, \"b\"]], null]"));
        assert!(filter("[\"==\", [\"coalesce\", \"red\"], \"red\"]"));
    }

    #[test]
    fn arithmetic() {
        assert!(filter("[\"==\", [\"+\", 3, 1, 7], 11]"));
        assert!(filter("[\"==\", [\"-\", 3, 1], 2]"));
        assert!(filter("[\"==\", [\"-\", 1], -1]"));
        assert!(filter("[\"==\", [\"*\", 5, 6, 7], 210]"));
        assert!(filter("[\"==\", [\"/\", 10, 4], 2.5]"));
        assert!(filter("[\"==\", -1, [\"%\", -21, 4]]"));

        assert!(filter("[\">=\", 2, [\"^\", [\"e\"], [\"ln2\"]]]"));
        assert!(filter("[\"<=\", 1.9999999999, [\"^\", [\"e\"], [\"ln2\"]]]"));
        assert!(filter("[\"==\", 1, [\"abs\", -1]]"));
        assert!(filter("[\"==\", 1, [\"abs\", 1]]"));
        assert!(filter("[\"==\", 0, [\"acos\", 1]]"));
        assert!(filter("[\"==\", 0, [\"asin\", 0]]"));
        assert!(filter("[\"==\", 0, [\"atan\", 0]]"));
        assert!(filter("[\"==\", 0, [\"ceil\", -0.5]]"));
        assert!(filter("[\"==\", -1, [\"cos\", [\"pi\"]]]"));
        assert!(filter("[\"==\", -1, [\"floor\", -0.5]]"));
        assert!(filter("[\"==\", 1, [\"ln\", [\"e\"]]]"));
        assert!(filter("[\"==\", 2, [\"log10\", 100]]"));
        assert!(filter("[\"==\", 6, [\"log2\", 64]]"));
        assert!(filter("[\"==\", 6, [\"max\", -10, 3, 6, -10000]]"));
        assert!(filter("[\"==\", -10000, [\"min\", -10, 3, 6, -10000]]"));
        assert!(filter("[\"==\", 0, [\"round\", 0.49999]]"));
        assert!(filter("[\"==\", 1, [\"round\", 0.5]]"));
        assert!(filter("[\">=\", 0.0000000000001, [\"sin\", [\"pi\"]]]"));
        assert!(filter("[\"==\", 12, [\"sqrt\", 144]]"));
        assert!(filter("[\">=\", 0.0000000000001, [\"tan\", [\"pi\"]]]"));

        // Domain errors fail evaluation.
        assert!(eval("[\"sqrt\", -1]").is_err());
        assert!(eval("[\"acos\", 2]").is_err());
        // NaN operands fail arithmetic instead of propagating.
        assert!(eval("[\"+\", [\"/\", 0, 0], 1]").is_err());
    }

    #[test]
    fn string_operators() {
        assert!(filter("[\"==\", [\"concat\", \"hello\", 10, \"world\", true], \"hello10worldtrue\"]"));
        assert!(filter("[\"==\", [\"downcase\", \"HeLlO, WoRlD!\"], \"hello, world!\"]"));
        assert!(filter("[\"==\", [\"upcase\", \"HeLlO, WoRlD!\"], \"HELLO, WORLD!\"]"));
        assert!(filter("[\">\", [\"literal\", \"oranges\"], \"apples\"]"));
        assert!(filter("[\"<\", [\"literal\", \"apples\"], \"oranges\"]"));
        assert!(filter("[\">=\", [\"literal\", \"oranges\"], \"apples\"]"));
        assert!(filter("[\"<=\", [\"literal\", \"apples\"], \"oranges\"]"));
        assert!(filter("[\">=\", [\"literal\", \"apples\"], \"apples\"]"));
        assert!(filter("[\"<=\", [\"literal\", \"oranges\"], \"oranges\"]"));
    }

    #[test]
    fn array_operators() {
        assert!(filter("[\"==\", [\"at\", 0, [\"literal\", [\"a\", \"b\", \"c\"]]], \"a\"]"));
        assert!(filter("[\"==\", [\"at\", 1, [\"literal\", [\"a\", \"b\", \"c\"]]], \"b\"]"));
        assert!(eval("[\"at\", 3, [\"literal\", [\"a\", \"b\", \"c\"]]]").is_err());
        assert!(filter("[\"==\", [\"index-of\", 2, [\"literal\", [1, 2, 3]]], 1]"));
        assert!(filter("[\"==\", [\"index-of\", 4, [\"literal\", [1, 2, 3]]], -1]"));
        assert!(filter("[\"==\", [\"index-of\", \"!\", \"Hello, \u{1F30E}!\"], 8]"));
        assert!(filter("[\"==\", [\"index-of\", \"world\", \"Hello, world!\"], 7]"));
        assert!(filter("[\"==\", [\"index-of\", \"WORLD\", \"Hello, world!\"], -1]"));
        assert!(filter("[\"==\", [\"index-of\", \"Hello\", \"Hello, world!\", 1], -1]"));
        assert!(filter("[\"==\", [\"length\", [\"literal\", []]], 0]"));
        assert!(filter("[\"==\", [\"length\", [\"literal\", [\"a\", \"b\", \"c\"]]], 3]"));
        assert!(filter("[\"==\", [\"length\", \"Hello, \u{1F30E}!\"], 9]"));
        assert!(filter(
            "[\"==\", [\"slice\", [\"literal\", [\"a\", \"b\", \"c\"]], 0, 2], [\"literal\", [\"a\", \"b\"]]]"
        ));
        assert!(filter(
            "[\"==\", [\"slice\", [\"literal\", [\"a\", \"b\", \"c\"]], 1, 2], [\"literal\", [\"b\"]]]"
        ));
        assert!(filter("[\"==\", [\"slice\", \"Hello, \u{1F30E}!\", 7], \"\u{1F30E}!\"]"));
        assert!(filter("[\"==\", [\"slice\", \"Hello, \u{1F30E}!\", 7, 8], \"\u{1F30E}\"]"));
    }

    #[test]
    fn slice_negative_indices() {
        assert!(filter(
            "[\"==\", [\"slice\", [\"literal\", [\"a\", \"b\", \"c\"]], -2], [\"literal\", [\"b\", \"c\"]]]"
        ));
        assert!(filter(
            "[\"==\", [\"slice\", [\"literal\", [\"a\", \"b\", \"c\"]], -3], [\"literal\", [\"a\", \"b\", \"c\"]]]"
        ));
        assert!(filter(
            "[\"==\", [\"slice\", [\"literal\", [\"a\", \"b\", \"c\"]], -4], [\"literal\", [\"a\", \"b\", \"c\"]]]"
        ));
        assert!(filter(
            "[\"==\", [\"slice\", [\"literal\", [\"a\", \"b\", \"c\"]], 0, -1], [\"literal\", [\"a\", \"b\"]]]"
        ));
        assert!(filter(
            "[\"==\", [\"slice\", [\"literal\", [\"a\", \"b\", \"c\"]], 0, -3], [\"literal\", []]]"
        ));
        assert!(filter(
            "[\"==\", [\"slice\", [\"literal\", [\"a\", \"b\", \"c\"]], 0, -4], [\"literal\", []]]"
        ));
        assert!(filter(
            "[\"==\", [\"slice\", [\"literal\", [\"a\", \"b\", \"c\"]], 3, 4], [\"literal\", []]]"
        ));
        assert!(filter("[\"==\", [\"slice\", \"abc\", -2], \"bc\"]"));
        assert!(filter("[\"==\", [\"slice\", \"abc\", -3], \"abc\"]"));
        assert!(filter("[\"==\", [\"slice\", \"abc\", -4], \"abc\"]"));
        assert!(filter("[\"==\", [\"slice\", \"abc\", 0, -1], \"ab\"]"));
        assert!(filter("[\"==\", [\"slice\", \"abc\", 0, -3], \"\"]"));
        assert!(filter("[\"==\", [\"slice\", \"abc\", 0, -4], \"\"]"));
        assert!(filter("[\"==\", [\"slice\", \"abc\", 3, 4], \"\"]"));
    }

    #[test]
    fn collators() {
        assert!(filter(
            "[\"==\", [\"literal\", \"hello\"], \"HELLO\", [\"collator\", {\"case-sensitive\": false}]]"
        ));
        assert!(filter(
            "[\"!=\", [\"literal\", \"hello\"], \"HELLO\", [\"collator\", {\"case-sensitive\": true}]]"
        ));
        assert!(filter("[\">\", [\"literal\", \"hello\"], \"a\", [\"collator\", {}]]"));
        assert!(filter("[\"<\", [\"literal\", \"a\"], \"hello\", [\"collator\", {}]]"));
        assert!(filter("[\"!=\", [\"resolved-locale\", [\"collator\", {}]], \"foo\"]"));
    }

    #[test]
    fn step() {
        assert!(filter("[\"==\", [\"step\", -10, \"a\", 1, \"b\", 2, \"c\"], \"a\"]"));
        assert!(filter("[\"==\", [\"step\", 1.5, \"a\", 1, \"b\", 2, \"c\"], \"b\"]"));
        assert!(filter("[\"==\", [\"step\", 2, \"a\", 1, \"b\", 2, \"c\"], \"c\"]"));
        assert!(filter("[\"==\", [\"step\", 3, \"a\", 1, \"b\", 2, \"c\"], \"c\"]"));
    }

    #[test]
    fn type_conversions() {
        assert!(filter("[\"==\", [\"to-boolean\", 0], false]"));
        assert!(filter("[\"==\", [\"to-boolean\", 1], true]"));
        assert!(filter("[\"==\", [\"to-boolean\", -2], true]"));
        assert!(filter("[\"==\", [\"to-boolean\", null], false]"));
        assert!(filter("[\"==\", [\"to-boolean\", \"\"], false]"));
        assert!(filter("[\"==\", [\"to-boolean\", \"hello\"], true]"));
        assert!(filter("[\"==\", [\"to-boolean\", [\"collator\", {}]], true]"));
        assert!(filter("[\"==\", [\"to-color\", \"red\"], [\"to-color\", \"rgb(255, 0, 0)\"]]"));
        assert!(filter(
            "[\"==\", [\"to-color\", \"not a color\", \"#FF0000\"], [\"to-color\", \"rgb(255, 0, 0)\"]]"
        ));
        assert!(filter("[\"==\", [\"to-number\", \"2\"], 2]"));
        assert!(filter("[\"==\", [\"to-number\", \"-.5\"], -0.5]"));
        assert!(filter("[\"==\", [\"to-number\", \"1e3\"], 1000]"));
        assert!(filter("[\"==\", [\"to-number\", null], 0]"));
        assert!(filter("[\"==\", [\"to-number\", false], 0]"));
        assert!(filter("[\"==\", [\"to-number\", true], 1]"));
        assert!(filter("[\"==\", [\"to-number\", \"not a number\", 10], 10]"));
        assert!(!filter("[\"==\", 2, \"2\"]"));
        assert!(filter("[\"==\", [\"to-string\", 2], \"2\"]"));
        assert!(filter("[\"==\", [\"to-string\", \"a\"], \"a\"]"));
        assert!(filter("[\"==\", [\"to-string\", true], \"true\"]"));
        assert!(filter("[\"==\", [\"to-string\", false], \"false\"]"));
        assert!(filter("[\"==\", [\"to-string\", null], \"\"]"));
        assert!(filter("[\"==\", [\"to-string\", [\"to-color\", \"gold\"]], \"rgba(255,215,0,1)\"]"));
        assert!(filter(
            "[\"==\", [\"to-string\", [\"to-color\", \"rgba(255, 1, 2, 0.1)\"]], \"rgba(255,1,2,0.1)\"]"
        ));
        assert!(filter(
            "[\"==\", [\"to-string\", [\"literal\", [1, 0.5, null, true, [\"b\"]]]], \"[1,0.5,null,true,[\\\"b\\\"]]\"]"
        ));

        assert!(filter("[\"==\", [\"typeof\", null], \"null\"]"));
        assert!(filter("[\"==\", [\"typeof\", 1], \"number\"]"));
        assert!(filter("[\"==\", [\"typeof\", true], \"boolean\"]"));
        assert!(filter("[\"==\", [\"typeof\", \"a\"], \"string\"]"));
        assert!(filter("[\"==\", [\"typeof\", [\"literal\", []]], \"array\"]"));
        assert!(filter("[\"==\", [\"typeof\", [\"to-color\", \"red\"]], \"color\"]"));
    }

    #[test]
    fn non_finite_numbers() {
        assert!(filter("[\"==\", [\"to-boolean\", [\"/\", 0, 0]], false]"));
        assert!(filter("[\"==\", [\"to-boolean\", [\"/\", 1, 0]], true]"));
        assert!(filter("[\"==\", [\"to-string\", [\"/\", 0, 0]], \"NaN\"]"));
        assert!(filter("[\"==\", [\"to-string\", [\"/\", 1, 0]], \"Infinity\"]"));
        assert!(filter("[\"==\", [\"to-string\", [\"/\", -1, 0]], \"-Infinity\"]"));
        assert!(filter("[\"==\", [\"to-string\", [\"%\", 0, 0]], \"NaN\"]"));
        assert!(filter("[\"==\", [\"to-string\", [\"%\", 1, 0]], \"NaN\"]"));
        assert!(filter("[\"==\", [\"to-string\", [\"%\", -1, 0]], \"NaN\"]"));
    }

    #[test]
    fn variable_binding() {
        assert!(filter(
            "[\"let\", \"a\", [\"-\", 15, 5], \"b\", 20, [\"==\", 30, [\"+\", [\"var\", \"a\"], [\"var\", \"b\"]]]]"
        ));

        // Inner bindings shadow outer ones.
        assert!(filter("[\"let\", \"a\", 10, [\"==\", 20, [\"let\", \"a\", 20, [\"var\", \"a\"]]]]"));
    }

    #[test]
    fn images() {
        let sheet = SpriteSheet::new();
        let atlas = StdArc::new(tiny_skia::Pixmap::new(32, 32).unwrap());
        let json = r#"{"sprite": {"x": 0, "y": 0, "width": 16, "height": 16}}"#;
        sheet.add_page(atlas, json, 1.).unwrap();

        let mut scope = RenderScope::new(0., 1.);
        scope.sprites = Some(&sheet);

        assert!(filter_with_scope(&scope, "[\"!=\", null, [\"image\", \"sprite\"]]"));
        assert!(filter_with_scope(&scope, "[\"==\", null, [\"image\", \"does-not-exist\"]]"));

        let image = compile("[\"image\", \"sprite\"]").unwrap().eval(&scope).unwrap();
        assert_eq!(image.get_image().unwrap().name, "sprite");
        assert!(image.get_image().unwrap().sprite.is_some());

        let sprite = compile("\"sprite\"").unwrap().eval_image(&scope);
        assert_eq!(sprite, sheet.get_sprite("sprite", 1.));
    }

    #[test]
    fn feature_filters() {
        let bytes = test_tiles::hello_world();
        let reader = Reader::new(&bytes).unwrap();
        let mut iter = reader.iter();
        assert!(iter.read_layer_by_name("helloworld"));
        assert!(iter.next_feature());

        let mut scope = RenderScope::new(10., 1.);
        scope.iter = Some(iter);

        assert!(filter_with_scope(&scope, "[\"==\", \"name\", \"Hello, world!\"]"));
        assert!(filter_with_scope(&scope, "[\"==\", [\"get\", \"name\"], \"Hello, world!\"]"));
        assert!(filter_with_scope(&scope, "[\"!=\", [\"get\", \"name\"], \"HELLO, WORLD!\"]"));
        assert!(!filter_with_scope(&scope, "[\"==\", \"name\", \"Goodbye, world!\"]"));
        assert!(filter_with_scope(&scope, "[\"has\", \"name\"]"));
        // Concat defeats the literal-key shape and tests the generic path.
        assert!(filter_with_scope(&scope, "[\"==\", [\"get\", [\"concat\", \"name\"]], \"Hello, world!\"]"));
        assert!(filter_with_scope(&scope, "[\"has\", [\"concat\", \"name\"]]"));
        assert!(!filter_with_scope(&scope, "[\"!has\", \"name\"]"));
        assert!(!filter_with_scope(&scope, "[\"!has\", [\"concat\", \"name\"]]"));
        assert!(!filter_with_scope(&scope, "[\"has\", \"name:en\"]"));
        assert!(filter_with_scope(&scope, "[\"!has\", \"name:en\"]"));
        assert!(filter_with_scope(&scope, "[\"==\", \"$type\", \"Point\"]"));
        assert!(filter_with_scope(&scope, "[\"!=\", \"$type\", \"Polygon\"]"));
        assert!(filter_with_scope(&scope, "[\"!=\", \"$type\", \"NotAShape\"]"));
        assert!(filter_with_scope(&scope, "[\"==\", [\"geometry-type\"], [\"concat\", \"Point\"]]"));
        assert!(filter_with_scope(&scope, "[\"==\", \"zoom\", 10]"));
        assert!(filter_with_scope(&scope, "[\"==\", [\"id\"], 7]"));
        assert!(filter_with_scope(
            &scope,
            "[\"in\", \"name\", [\"literal\", [\"Hello, world!\", true, 3]]]"
        ));
        assert!(filter_with_scope(
            &scope,
            "[\"!in\", \"name\", [\"literal\", [\"HELLO, WORLD!\", true, 3]]]"
        ));
    }

    fn expect_invalid(json: &str) {
        let result = compile(json);
        assert!(
            matches!(result, Err(Error::InvalidExpression(_))),
            "expected {json} to fail compilation"
        );
    }

    #[test]
    fn compile_errors() {
        expect_invalid("[\"not an operator\"]");
        expect_invalid("[\"in\"]");
        expect_invalid("[\"==\", 0, 1, 2, 3]");
        expect_invalid("[]");
        expect_invalid("[[]]");

        expect_invalid("[\"+\"]");
        expect_invalid("[\"-\", 1, 2, 3]");
        expect_invalid("[\"/\", 1, 2, 3]");
        expect_invalid("[\"abs\", 1, 2]");
        expect_invalid("[\"%\", 1]");

        expect_invalid("[\"var\", \"undefined-variable\"]");
        expect_invalid("[\"interpolate\", [\"linear\"], [\"zoom\"], 13, 2, 12, 1]");
        expect_invalid("[\"step\", [\"zoom\"], \"a\", 2, \"b\", 1, \"c\"]");

        // Recognized but unimplemented operators are distinct errors.
        assert!(matches!(
            compile("[\"feature-state\", \"hover\"]"),
            Err(Error::Unsupported(_))
        ));
    }

    #[test]
    fn format_string_sugar() {
        let bytes = test_tiles::hello_world();
        let reader = Reader::new(&bytes).unwrap();
        let mut iter = reader.iter();
        iter.read_layer_by_name("helloworld");
        iter.next_feature();

        let mut scope = RenderScope::new(10., 1.);
        scope.iter = Some(iter);

        let expression = compile("\"***** {name} *****\"").unwrap();
        assert_eq!(expression.eval_string(&scope, ""), "***** Hello, world! *****");

        expect_invalid("\"nested {{name}} braces\"");
        expect_invalid("\"unbalanced }name{ braces\"");

        // A string with only one kind of brace is a plain literal.
        let literal = compile("\"left { only\"").unwrap();
        assert_eq!(literal.eval_string(&RenderScope::new(0., 1.), ""), "left { only");
    }

    #[test]
    fn formatted_values() {
        let expression = compile(
            "[\"format\",\
               \"Hello \",\
               [\"concat\", \"world\", \"!\"], {\"font-scale\": 0.1},\
               \"\\n\", {\"text-color\": [\"coalesce\", \"red\"]},\
               null,\
               \"test\"\
             ]",
        )
        .unwrap();

        let value = expression.eval(&RenderScope::new(0., 1.)).unwrap();
        assert_eq!(value.as_string(), "Hello world!\ntest");

        let parts = value.get_formatted().unwrap();
        assert_eq!(parts.len(), 4);

        assert_eq!(parts[0].text, "Hello ");
        assert!(parts[0].sprite.is_none());
        assert_eq!(parts[0].font_scale, None);
        assert_eq!(parts[0].text_color, None);

        assert_eq!(parts[1].text, "world!");
        assert_eq!(parts[1].font_scale, Some(0.1));
        assert_eq!(parts[1].text_color, None);

        assert_eq!(parts[2].text, "\n");
        assert_eq!(parts[2].font_scale, None);
        assert_eq!(parts[2].text_color, crate::Color::parse("red"));

        assert_eq!(parts[3].text, "test");
        assert_eq!(parts[3].font_scale, None);
        assert_eq!(parts[3].text_color, None);
    }
}
