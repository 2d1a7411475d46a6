//! Compilation of JSON style expressions.

use std::collections::HashMap;
use std::f64::consts::{E, LN_2, PI};
use std::sync::Arc;

use serde_json::Value as Json;

use crate::Error;
use crate::expr::interpolate::{Interpolate, InterpolationKind, Step, Stop};
use crate::expr::{Expression, FormatSection, MatchArm, MatchExpression, Op, OpExpression};
use crate::value::Value;

/// Lexical `let` bindings available during compilation.
///
/// `var` references resolve at compile time by sharing the bound
/// subexpression, so no binding state exists at evaluation time.
struct Context<'a> {
    variables: HashMap<String, Arc<Expression>>,
    parent: Option<&'a Context<'a>>,
}

impl Context<'_> {
    fn lookup(&self, name: &str) -> Option<Arc<Expression>> {
        match self.variables.get(name) {
            Some(expression) => Some(expression.clone()),
            None => self.parent?.lookup(name),
        }
    }
}

impl Expression {
    /// Compile a JSON style property or filter into an expression.
    pub fn compile(json: &Json) -> Result<Arc<Self>, Error> {
        match json {
            Json::Null => Ok(Arc::new(Self::Literal(Value::Null))),
            Json::Bool(_) | Json::Number(_) => {
                Ok(Arc::new(Self::Literal(Value::from_json(json)?)))
            },
            Json::String(format) => from_format_string(format),
            // The legacy "function" form; input is always the zoom level.
            Json::Object(object) => {
                let base = object.get("base").and_then(Json::as_f64).unwrap_or(1.);
                let stops = match object.get("stops") {
                    Some(stops) => parse_legacy_stops(stops)?,
                    None => Vec::new(),
                };
                Ok(Arc::new(Self::Interpolate(Interpolate {
                    kind: InterpolationKind::Exponential(base),
                    input: None,
                    stops,
                })))
            },
            Json::Array(array) => {
                // An array starting with a non-string scalar is a literal,
                // like the number arrays used by text-offset.
                if array.len() > 1
                    && matches!(array[0], Json::Bool(_) | Json::Number(_))
                {
                    return Ok(Arc::new(Self::Literal(Value::from_json(json)?)));
                }

                from_operator_array(array, None)
            },
        }
    }
}

/// Compile an operator argument.
///
/// Unlike [`Expression::compile`], scalars compile to plain literals without
/// the `{field}` sugar, and arrays must be operator arrays.
fn compile_arg(json: &Json, ctx: Option<&Context<'_>>) -> Result<Arc<Expression>, Error> {
    match json {
        Json::Null => Ok(Arc::new(Expression::Literal(Value::Null))),
        Json::Bool(_) | Json::Number(_) | Json::String(_) => {
            Ok(Arc::new(Expression::Literal(Value::from_json(json)?)))
        },
        Json::Array(array) => from_operator_array(array, ctx),
        Json::Object(_) => Err(Error::InvalidExpression("expected a literal or array".into())),
    }
}

/// Compile an `["operator", …]` array.
fn from_operator_array(
    array: &[Json],
    ctx: Option<&Context<'_>>,
) -> Result<Arc<Expression>, Error> {
    let op = match array.first() {
        Some(Json::String(op)) => op.as_str(),
        _ => {
            return Err(Error::InvalidExpression(
                "expected first element of expression array to be a string".into(),
            ));
        },
    };
    let args = &array[1..];

    // Special forms which don't compile into a plain operator node.
    match op {
        "literal" => {
            check_arity(op, args.len(), Some(1), None, None)?;
            return Ok(Arc::new(Expression::Literal(Value::from_json(&args[0])?)));
        },
        "e" => return constant(op, args.len(), E),
        "pi" => return constant(op, args.len(), PI),
        "ln2" => return constant(op, args.len(), LN_2),
        "collator" => return parse_collator(args, ctx),
        "format" => return parse_format(args, ctx),
        "let" => return parse_let(args, ctx),
        "var" => return parse_var(args, ctx),
        "match" => return parse_match(args, ctx),
        "interpolate" => return parse_interpolate(args, ctx),
        "step" => return parse_step(args, ctx),
        _ => (),
    }

    let info = operator_info(op).ok_or_else(|| {
        if UNSUPPORTED_OPERATORS.contains(&op) {
            Error::Unsupported(format!("operator `{op}` is not implemented"))
        } else {
            Error::InvalidExpression(format!("unrecognized operator {op}"))
        }
    })?;
    check_arity(op, args.len(), info.exact, info.min, info.max)?;

    let mut expressions = Vec::with_capacity(args.len());
    for (i, arg) in args.iter().enumerate() {
        // For predicate operators, a leading string is sugar for reading a
        // feature tag; `["==", "class", "primary"]` compares `get(class)`.
        if i == 0
            && info.sugar
            && let Json::String(string) = arg
        {
            let expression = match string.as_str() {
                "zoom" => Expression::Op(OpExpression { op: Op::Zoom, args: Vec::new() }),
                "$type" => Expression::Op(OpExpression { op: Op::GeometryType, args: Vec::new() }),
                key => Expression::Op(OpExpression {
                    op: Op::Get,
                    args: vec![Arc::new(Expression::Literal(Value::from(key)))],
                }),
            };
            expressions.push(Arc::new(expression));
            continue;
        }

        expressions.push(compile_arg(arg, ctx)?);
    }

    Ok(Arc::new(Expression::Op(OpExpression { op: info.op, args: expressions })))
}

/// Operators which are recognized but intentionally not implemented.
const UNSUPPORTED_OPERATORS: &[&str] = &[
    "accumulated",
    "distance",
    "feature-state",
    "global-state",
    "heatmap-density",
    "is-supported-script",
    "line-progress",
    "number-format",
    "within",
];

struct OpInfo {
    op: Op,
    exact: Option<usize>,
    min: Option<usize>,
    max: Option<usize>,
    sugar: bool,
}

fn operator_info(name: &str) -> Option<OpInfo> {
    let exact = |op, n| OpInfo { op, exact: Some(n), min: None, max: None, sugar: false };
    let min = |op, n| OpInfo { op, exact: None, min: Some(n), max: None, sugar: false };
    let any = |op| OpInfo { op, exact: None, min: None, max: None, sugar: false };
    let comparison = |op| OpInfo { op, exact: None, min: Some(2), max: Some(3), sugar: true };

    let info = match name {
        "!" => exact(Op::Not, 1),
        "none" => any(Op::None),
        "any" => any(Op::Any),
        "all" => any(Op::All),
        "has" => exact(Op::Has, 1),
        "!has" => exact(Op::NotHas, 1),
        "get" => exact(Op::Get, 1),
        "in" => OpInfo { op: Op::In, exact: None, min: Some(1), max: None, sugar: true },
        "!in" => OpInfo { op: Op::NotIn, exact: None, min: Some(1), max: None, sugar: true },
        "==" => comparison(Op::Eq),
        "!=" => comparison(Op::Ne),
        "<" => comparison(Op::Lt),
        ">" => comparison(Op::Gt),
        "<=" => comparison(Op::Le),
        ">=" => comparison(Op::Ge),
        "case" => min(Op::Case, 1),
        "coalesce" => min(Op::Coalesce, 1),
        "concat" => min(Op::Concat, 1),
        "downcase" => exact(Op::Downcase, 1),
        "upcase" => exact(Op::Upcase, 1),
        "resolved-locale" => exact(Op::ResolvedLocale, 1),
        "+" => min(Op::Add, 1),
        "*" => min(Op::Mul, 1),
        "min" => min(Op::Min, 1),
        "max" => min(Op::Max, 1),
        "-" => OpInfo { op: Op::Sub, exact: None, min: Some(1), max: Some(2), sugar: false },
        "/" => exact(Op::Div, 2),
        "%" => exact(Op::Rem, 2),
        "^" => exact(Op::Pow, 2),
        "abs" => exact(Op::Abs, 1),
        "acos" => exact(Op::Acos, 1),
        "asin" => exact(Op::Asin, 1),
        "atan" => exact(Op::Atan, 1),
        "ceil" => exact(Op::Ceil, 1),
        "cos" => exact(Op::Cos, 1),
        "floor" => exact(Op::Floor, 1),
        "ln" => exact(Op::Ln, 1),
        "log10" => exact(Op::Log10, 1),
        "log2" => exact(Op::Log2, 1),
        "round" => exact(Op::Round, 1),
        "sin" => exact(Op::Sin, 1),
        "sqrt" => exact(Op::Sqrt, 1),
        "tan" => exact(Op::Tan, 1),
        "image" => exact(Op::Image, 1),
        "geometry-type" => exact(Op::GeometryType, 0),
        "id" => exact(Op::Id, 0),
        "zoom" => exact(Op::Zoom, 0),
        "at" => exact(Op::At, 2),
        "index-of" => OpInfo { op: Op::IndexOf, exact: None, min: Some(2), max: Some(3), sugar: false },
        "length" => exact(Op::Length, 1),
        "slice" => OpInfo { op: Op::Slice, exact: None, min: Some(2), max: Some(3), sugar: false },
        "typeof" => exact(Op::TypeOf, 1),
        "to-boolean" => exact(Op::ToBoolean, 1),
        "to-color" => min(Op::ToColor, 1),
        "to-number" => min(Op::ToNumber, 1),
        "to-string" => exact(Op::ToString, 1),
        _ => return None,
    };

    Some(info)
}

fn check_arity(
    op: &str,
    got: usize,
    exact: Option<usize>,
    min: Option<usize>,
    max: Option<usize>,
) -> Result<(), Error> {
    if let Some(exact) = exact
        && got != exact
    {
        return Err(Error::InvalidExpression(format!(
            "operator `{op}` expected exactly {exact} arguments, got {got}"
        )));
    }

    if let Some(min) = min
        && got < min
    {
        return Err(Error::InvalidExpression(format!(
            "operator `{op}` expected at least {min} arguments, got {got}"
        )));
    }

    if let Some(max) = max
        && got > max
    {
        return Err(Error::InvalidExpression(format!(
            "operator `{op}` expected at most {max} arguments, got {got}"
        )));
    }

    Ok(())
}

fn constant(op: &str, args: usize, value: f64) -> Result<Arc<Expression>, Error> {
    check_arity(op, args, Some(0), None, None)?;
    Ok(Arc::new(Expression::Literal(Value::Number(value))))
}

fn parse_collator(args: &[Json], ctx: Option<&Context<'_>>) -> Result<Arc<Expression>, Error> {
    check_arity("collator", args.len(), Some(1), None, None)?;

    let object = match &args[0] {
        Json::Object(object) => object,
        _ => return Err(Error::InvalidExpression("operator `collator` expected an object".into())),
    };

    let case_sensitive = match object.get("case-sensitive") {
        Some(json) => compile_arg(json, ctx)?,
        None => Arc::new(Expression::Literal(Value::Null)),
    };

    Ok(Arc::new(Expression::Op(OpExpression { op: Op::Collator, args: vec![case_sensitive] })))
}

fn parse_format(args: &[Json], ctx: Option<&Context<'_>>) -> Result<Arc<Expression>, Error> {
    check_arity("format", args.len(), None, Some(1), None)?;

    let mut sections = Vec::new();
    let mut iter = args.iter().peekable();

    while let Some(arg) = iter.next() {
        let text = compile_arg(arg, ctx)?;
        let mut section = FormatSection { text, font_scale: None, text_color: None };

        // An object following a section carries its style overrides.
        if let Some(Json::Object(options)) = iter.peek() {
            iter.next();

            if let Some(json) = options.get("font-scale") {
                section.font_scale = Some(compile_arg(json, ctx)?);
            }
            if let Some(json) = options.get("text-color") {
                section.text_color = Some(compile_arg(json, ctx)?);
            }
        }

        sections.push(section);
    }

    Ok(Arc::new(Expression::Format(sections)))
}

fn parse_let(args: &[Json], ctx: Option<&Context<'_>>) -> Result<Arc<Expression>, Error> {
    if args.len() % 2 != 1 {
        return Err(Error::InvalidExpression(format!(
            "operator `let` expected an odd number of arguments, got {}",
            args.len()
        )));
    }

    let mut child_ctx = Context { variables: HashMap::new(), parent: ctx };

    for pair in args[..args.len() - 1].chunks_exact(2) {
        let name = match &pair[0] {
            Json::String(name) => name.clone(),
            _ => {
                return Err(Error::InvalidExpression(
                    "expected variable name to be a string".into(),
                ));
            },
        };

        let expression = compile_arg(&pair[1], Some(&child_ctx))?;
        child_ctx.variables.insert(name, expression);
    }

    compile_arg(&args[args.len() - 1], Some(&child_ctx))
}

fn parse_var(args: &[Json], ctx: Option<&Context<'_>>) -> Result<Arc<Expression>, Error> {
    check_arity("var", args.len(), Some(1), None, None)?;

    let name = match &args[0] {
        Json::String(name) => name.as_str(),
        _ => return Err(Error::InvalidExpression("operator `var` expected a string".into())),
    };

    ctx.and_then(|ctx| ctx.lookup(name))
        .ok_or_else(|| Error::InvalidExpression(format!("variable `{name}` not found")))
}

fn parse_match(args: &[Json], ctx: Option<&Context<'_>>) -> Result<Arc<Expression>, Error> {
    check_arity("match", args.len(), None, Some(2), None)?;

    let input = compile_arg(&args[0], ctx)?;
    let mut arms = Vec::new();
    let mut fallback = None;

    let mut iter = args[1..].chunks_exact(2);
    for pair in &mut iter {
        // Labels are raw JSON values; an array label matches any element.
        let labels = match &pair[0] {
            Json::Array(labels) => {
                labels.iter().map(Value::from_json).collect::<Result<_, _>>()?
            },
            label => vec![Value::from_json(label)?],
        };

        arms.push(MatchArm { labels, value: compile_arg(&pair[1], ctx)? });
    }

    if let [json] = iter.remainder() {
        fallback = Some(compile_arg(json, ctx)?);
    }

    Ok(Arc::new(Expression::Match(MatchExpression { input, arms, fallback })))
}

fn parse_interpolate(args: &[Json], ctx: Option<&Context<'_>>) -> Result<Arc<Expression>, Error> {
    check_arity("interpolate", args.len(), None, Some(4), None)?;
    if args.len() % 2 != 0 {
        return Err(Error::InvalidExpression(
            "operator `interpolate` expected an even number of arguments".into(),
        ));
    }

    let kind = parse_interpolation_kind(&args[0])?;
    let input = compile_arg(&args[1], ctx)?;
    let stops = parse_stop_pairs("interpolate", &args[2..], ctx)?;

    Ok(Arc::new(Expression::Interpolate(Interpolate { kind, input: Some(input), stops })))
}

fn parse_interpolation_kind(json: &Json) -> Result<InterpolationKind, Error> {
    let error = || {
        Error::InvalidExpression(
            "expected interpolation to be [\"linear\"], [\"exponential\", base] or \
             [\"cubic-bezier\", x1, y1, x2, y2]"
                .into(),
        )
    };

    let array = json.as_array().ok_or_else(error)?;
    match array.first().and_then(Json::as_str) {
        Some("linear") if array.len() == 1 => Ok(InterpolationKind::Linear),
        Some("exponential") if array.len() == 2 => {
            let base = array[1].as_f64().ok_or_else(error)?;
            Ok(InterpolationKind::Exponential(base))
        },
        Some("cubic-bezier") if array.len() == 5 => {
            let mut control = [0.; 4];
            for (slot, json) in control.iter_mut().zip(&array[1..]) {
                *slot = json.as_f64().ok_or_else(error)?;
            }
            Ok(InterpolationKind::CubicBezier {
                x1: control[0],
                y1: control[1],
                x2: control[2],
                y2: control[3],
            })
        },
        _ => Err(error()),
    }
}

fn parse_step(args: &[Json], ctx: Option<&Context<'_>>) -> Result<Arc<Expression>, Error> {
    check_arity("step", args.len(), None, Some(2), None)?;
    if args.len() % 2 != 0 {
        return Err(Error::InvalidExpression(
            "operator `step` expected an even number of arguments".into(),
        ));
    }

    let input = compile_arg(&args[0], ctx)?;
    let default = compile_arg(&args[1], ctx)?;
    let stops = parse_stop_pairs("step", &args[2..], ctx)?;

    Ok(Arc::new(Expression::Step(Step { input, default, stops })))
}

/// Parse alternating stop input / output pairs, validating the sort order.
fn parse_stop_pairs(
    op: &str,
    args: &[Json],
    ctx: Option<&Context<'_>>,
) -> Result<Vec<Stop>, Error> {
    let mut stops: Vec<Stop> = Vec::with_capacity(args.len() / 2);

    for pair in args.chunks_exact(2) {
        let point = pair[0].as_f64().ok_or_else(|| {
            Error::InvalidExpression(format!("operator `{op}` expected a numeric stop input"))
        })?;

        if stops.last().is_some_and(|last| last.point >= point) {
            return Err(Error::InvalidExpression(format!(
                "operator `{op}` requires strictly ascending stop inputs"
            )));
        }

        stops.push(Stop { point, value: compile_arg(&pair[1], ctx)? });
    }

    Ok(stops)
}

/// Parse the legacy `{"stops": [[k, v], …]}` form.
fn parse_legacy_stops(json: &Json) -> Result<Vec<Stop>, Error> {
    let array = json
        .as_array()
        .ok_or_else(|| Error::MalformedStyle("expected \"stops\" to be an array".into()))?;

    let mut stops: Vec<Stop> = Vec::with_capacity(array.len());
    for stop in array {
        let pair = match stop.as_array() {
            Some(pair) if pair.len() == 2 => pair,
            _ => {
                return Err(Error::InvalidExpression(
                    "expected element of \"stops\" to have exactly 2 elements".into(),
                ));
            },
        };

        let point = pair[0].as_f64().ok_or_else(|| {
            Error::InvalidExpression("expected element 1 of \"stops\" to be a number".into())
        })?;

        if stops.last().is_some_and(|last| last.point >= point) {
            return Err(Error::InvalidExpression(
                "\"stops\" requires strictly ascending inputs".into(),
            ));
        }

        stops.push(Stop { point, value: Arc::new(Expression::Literal(Value::from_json(&pair[1])?)) });
    }

    Ok(stops)
}

/// Compile a plain string, expanding `{field}` placeholders into a `concat`
/// of literal fragments and tag lookups.
fn from_format_string(format: &str) -> Result<Arc<Expression>, Error> {
    if !format.contains('{') || !format.contains('}') {
        return Ok(Arc::new(Expression::Literal(Value::from(format))));
    }

    // The braces must be balanced and not nested.
    let mut balance = 0i32;
    for character in format.chars() {
        match character {
            '{' => balance += 1,
            '}' => balance -= 1,
            _ => (),
        }

        if balance != 0 && balance != 1 {
            return Err(Error::InvalidExpression(format!(
                "format string `{format}` is nested or unbalanced"
            )));
        }
    }
    if balance != 0 {
        return Err(Error::InvalidExpression(format!(
            "format string `{format}` is nested or unbalanced"
        )));
    }

    let mut args: Vec<Arc<Expression>> = Vec::new();
    for (i, part) in format.split(['{', '}']).enumerate() {
        if i % 2 == 0 {
            // Literal fragment between placeholders.
            if !part.is_empty() {
                args.push(Arc::new(Expression::Literal(Value::from(part))));
            }
        } else {
            let key = Arc::new(Expression::Literal(Value::from(part)));
            args.push(Arc::new(Expression::Op(OpExpression { op: Op::Get, args: vec![key] })));
        }
    }

    Ok(Arc::new(Expression::Op(OpExpression { op: Op::Concat, args })))
}
