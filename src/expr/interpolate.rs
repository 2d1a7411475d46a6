//! Piecewise interpolation and step expressions.

use std::sync::Arc;

use crate::expr::{EvalError, EvalResult, Expression};
use crate::scope::RenderScope;
use crate::value::Value;

/// A single stop: an input key and its output expression.
#[derive(Debug)]
pub struct Stop {
    pub(crate) point: f64,
    pub(crate) value: Arc<Expression>,
}

/// How interpolation maps the input position between two stops.
#[derive(PartialEq, Copy, Clone, Debug)]
pub enum InterpolationKind {
    Linear,
    /// Exponential remapping; a base of exactly 1 is linear.
    Exponential(f64),
    /// A cubic Bézier easing curve through `(0, 0)` and `(1, 1)`.
    CubicBezier { x1: f64, y1: f64, x2: f64, y2: f64 },
}

/// Continuous interpolation between sorted stops.
///
/// Without an input expression the scope's zoom level is used, which is the
/// behavior of the legacy `{"stops": …}` form.
#[derive(Debug)]
pub struct Interpolate {
    pub(crate) kind: InterpolationKind,
    pub(crate) input: Option<Arc<Expression>>,
    pub(crate) stops: Vec<Stop>,
}

impl Interpolate {
    pub(crate) fn eval(&self, scope: &RenderScope<'_>) -> EvalResult {
        let input = match &self.input {
            Some(expression) => super::eval::finite_number(&expression.eval(scope)?)?,
            None => scope.zoom,
        };

        let (first, rest) = match self.stops.split_first() {
            Some(split) => split,
            None => return Err(EvalError("interpolation without stops")),
        };

        if input < first.point {
            return first.value.eval(scope);
        }

        let mut last = first;
        for next in rest {
            if input < next.point {
                let lower = last.value.eval(scope)?;
                let upper = next.value.eval(scope)?;
                let t = self.kind.position(last.point, next.point, input);
                return Ok(lerp(&lower, &upper, t));
            }

            last = next;
        }

        last.value.eval(scope)
    }
}

impl InterpolationKind {
    /// Map the input to a `0..=1` position between two stop keys.
    fn position(&self, lower: f64, upper: f64, input: f64) -> f64 {
        let linear = (input - lower) / (upper - lower);

        match *self {
            Self::Linear => linear,
            Self::Exponential(base) if base == 1. => linear,
            Self::Exponential(base) => {
                let progress = input - lower;
                let range = upper - lower;
                (base.powf(progress) - 1.) / (base.powf(range) - 1.)
            },
            Self::CubicBezier { x1, y1, x2, y2 } => cubic_bezier(x1, y1, x2, y2, linear),
        }
    }
}

/// Interpolate between two output values.
///
/// Numbers and colors interpolate; any other type steps down to the lower
/// stop.
fn lerp(lower: &Value, upper: &Value, t: f64) -> Value {
    if let (Some(a), Some(b)) = (lower.get_number(), upper.get_number()) {
        return Value::Number((b - a) * t + a);
    }

    if let (Some(a), Some(b)) = (lower.get_color(), upper.get_color()) {
        return Value::Color(a.lerp(b, t as f32));
    }

    lower.clone()
}

/// Evaluate the standard cubic Bézier easing curve at `x`.
///
/// The curve runs from `(0, 0)` to `(1, 1)` with the given control points.
/// The parameter for a given x position is found with a bisection solver.
fn cubic_bezier(x1: f64, y1: f64, x2: f64, y2: f64, x: f64) -> f64 {
    if x <= 0. {
        return 0.;
    }
    if x >= 1. {
        return 1.;
    }

    let component = |a: f64, b: f64, t: f64| {
        // The Bernstein form with p0 = 0 and p3 = 1.
        3. * a * t * (1. - t) * (1. - t) + 3. * b * t * t * (1. - t) + t * t * t
    };

    // x(t) is monotonic for control points within [0, 1], so bisect.
    let mut low = 0f64;
    let mut high = 1f64;
    let mut t = x;
    while high - low > 1e-6 {
        if component(x1, x2, t) < x {
            low = t;
        } else {
            high = t;
        }
        t = (low + high) / 2.;
    }

    component(y1, y2, t)
}

/// A staircase over sorted stops.
#[derive(Debug)]
pub struct Step {
    pub(crate) input: Arc<Expression>,
    pub(crate) default: Arc<Expression>,
    pub(crate) stops: Vec<Stop>,
}

impl Step {
    pub(crate) fn eval(&self, scope: &RenderScope<'_>) -> EvalResult {
        let input = super::eval::finite_number(&self.input.eval(scope)?)?;

        // The output of the greatest stop at or below the input.
        let mut result = &self.default;
        for stop in &self.stops {
            if input < stop.point {
                break;
            }
            result = &stop.value;
        }

        result.eval(scope)
    }
}
