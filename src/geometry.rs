//! Shared geometry types for tile-space coordinates.
//!
//! All coordinates are in normalized tile space, where `(0, 0)` is the
//! top-left and `(1, 1)` the bottom-right corner of the tile.

use std::ops::{Add, AddAssign, Mul, Sub, SubAssign};

/// 2D position in normalized tile space.
#[derive(PartialEq, Copy, Clone, Default, Debug)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn length(self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    pub fn distance(self, other: Self) -> f32 {
        (other - self).length()
    }

    /// Scale to unit length, or zero for degenerate vectors.
    pub fn normalized(self) -> Self {
        let length = self.length();
        if length == 0. { Self::default() } else { Self::new(self.x / length, self.y / length) }
    }

    /// Z component of the cross product with another vector.
    pub fn cross(self, other: Self) -> f32 {
        self.x * other.y - self.y * other.x
    }

    pub fn dot(self, other: Self) -> f32 {
        self.x * other.x + self.y * other.y
    }

    /// Clockwise perpendicular vector.
    pub fn perpendicular(self) -> Self {
        Self::new(-self.y, self.x)
    }

    pub fn lerp(self, other: Self, t: f32) -> Self {
        self + (other - self) * t
    }
}

impl From<(f32, f32)> for Point {
    fn from((x, y): (f32, f32)) -> Self {
        Self { x, y }
    }
}

impl Add<Point> for Point {
    type Output = Self;

    fn add(mut self, other: Point) -> Self {
        self.x += other.x;
        self.y += other.y;
        self
    }
}

impl AddAssign<Point> for Point {
    fn add_assign(&mut self, other: Point) {
        self.x += other.x;
        self.y += other.y;
    }
}

impl Sub<Point> for Point {
    type Output = Self;

    fn sub(mut self, other: Point) -> Self {
        self.x -= other.x;
        self.y -= other.y;
        self
    }
}

impl SubAssign<Point> for Point {
    fn sub_assign(&mut self, other: Point) {
        self.x -= other.x;
        self.y -= other.y;
    }
}

impl Mul<f32> for Point {
    type Output = Self;

    fn mul(mut self, scale: f32) -> Self {
        self.x *= scale;
        self.y *= scale;
        self
    }
}

/// An open or closed sequence of connected points.
#[derive(PartialEq, Clone, Default, Debug)]
pub struct LineString {
    pub points: Vec<Point>,
}

impl LineString {
    pub fn new(points: Vec<Point>) -> Self {
        Self { points }
    }

    pub fn length(&self) -> f32 {
        self.points.windows(2).map(|pair| pair[0].distance(pair[1])).sum()
    }

    /// Axis-aligned bounding box as `(min, max)`.
    pub fn bounds(&self) -> Option<(Point, Point)> {
        let first = *self.points.first()?;
        let mut min = first;
        let mut max = first;

        for point in &self.points[1..] {
            min.x = min.x.min(point.x);
            min.y = min.y.min(point.y);
            max.x = max.x.max(point.x);
            max.y = max.y.max(point.y);
        }

        Some((min, max))
    }

    pub fn center(&self) -> Option<Point> {
        let (min, max) = self.bounds()?;
        Some(Point::new((min.x + max.x) / 2., (min.y + max.y) / 2.))
    }

    /// Find the point and unit tangent at a distance along the line.
    pub fn point_at(&self, distance: f32) -> Option<(Point, Point)> {
        let mut remaining = distance.max(0.);

        for pair in self.points.windows(2) {
            let segment_length = pair[0].distance(pair[1]);
            if remaining <= segment_length && segment_length > 0. {
                let tangent = (pair[1] - pair[0]).normalized();
                return Some((pair[0].lerp(pair[1], remaining / segment_length), tangent));
            }
            remaining -= segment_length;
        }

        None
    }

    /// Simplify the line using the Douglas-Peucker algorithm.
    pub fn simplify(&self, tolerance: f32) -> Self {
        if self.points.len() < 3 {
            return self.clone();
        }

        let mut keep = vec![false; self.points.len()];
        keep[0] = true;
        keep[self.points.len() - 1] = true;
        douglas_peucker(&self.points, 0, self.points.len() - 1, tolerance, &mut keep);

        let points = self
            .points
            .iter()
            .zip(&keep)
            .filter_map(|(point, keep)| keep.then_some(*point))
            .collect();
        Self { points }
    }

    /// Split the line into runs which curve monotonically in one direction.
    ///
    /// A new run starts whenever the sign of the turn between consecutive
    /// segments flips. Shared vertices are duplicated so every run is a
    /// usable line on its own.
    pub fn split_monotone(&self) -> Vec<Self> {
        if self.points.len() < 3 {
            return vec![self.clone()];
        }

        let mut runs = Vec::new();
        let mut start = 0;
        let mut direction = 0f32;

        for i in 1..self.points.len() - 1 {
            let incoming = self.points[i] - self.points[i - 1];
            let outgoing = self.points[i + 1] - self.points[i];
            let turn = incoming.cross(outgoing);

            if turn != 0. {
                if direction != 0. && turn.signum() != direction {
                    runs.push(Self::new(self.points[start..=i].to_vec()));
                    start = i;
                    direction = 0.;
                } else {
                    direction = turn.signum();
                }
            }
        }

        runs.push(Self::new(self.points[start..].to_vec()));
        runs
    }
}

fn douglas_peucker(points: &[Point], start: usize, end: usize, tolerance: f32, keep: &mut [bool]) {
    if end <= start + 1 {
        return;
    }

    // Find the point furthest from the start-end chord.
    let mut max_distance = 0.;
    let mut max_index = start;
    for i in start + 1..end {
        let distance = perpendicular_distance(points[i], points[start], points[end]);
        if distance > max_distance {
            max_distance = distance;
            max_index = i;
        }
    }

    if max_distance > tolerance {
        keep[max_index] = true;
        douglas_peucker(points, start, max_index, tolerance, keep);
        douglas_peucker(points, max_index, end, tolerance, keep);
    }
}

/// Distance of a point from the infinite line through `start` and `end`.
fn perpendicular_distance(point: Point, start: Point, end: Point) -> f32 {
    let line = end - start;
    let length = line.length();
    if length == 0. {
        return point.distance(start);
    }

    (line.cross(point - start) / length).abs()
}
