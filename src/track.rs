//! Closed track centerline built from chained quadratic Bezier segments.
//!
//! Control points come in pairs: segment `i` runs from point `2i` through
//! control point `2i + 1` to point `2i + 2`, wrapping around at the end so
//! the curve is closed. The curve parameter `t` covers `[0, num_segments)`,
//! its integer part selecting the segment and its fractional part the
//! position inside it.
//!
//! The track lives in the ground plane: a 2D point `(x, y)` is the world
//! point `(x, 0, y)`.

use std::fs;
use std::path::Path;

use nalgebra::{Point3, Vector2};
use serde::Deserialize;

use crate::error::{SimError, SimResult};

/// Track width used when nothing else is configured.
pub const DEFAULT_TRACK_WIDTH: f64 = 12.0;

const TANGENT_EPSILON: f64 = 0.001;

const NEWTON_SEEDS: usize = 11;
const NEWTON_ITERATIONS: usize = 5;
const NEWTON_STEP_TOLERANCE: f64 = 1e-6;
const NEWTON_CURVATURE_EPSILON: f64 = 1e-9;

/// On-disk track format. Unknown keys are ignored.
#[derive(Deserialize, Debug)]
struct TrackFile {
    points: Vec<[f64; 2]>,
}

/// A closed quadratic Bezier chain with a constant width.
#[derive(Clone, Debug)]
pub struct Track {
    points: Vec<Vector2<f64>>,
    num_segments: usize,
    width: f64,
}

impl Track {
    /// Builds a track from control points. An empty or odd-length list gives
    /// a track with zero segments.
    pub fn new(points: Vec<Vector2<f64>>, width: f64) -> Self {
        let num_segments = if points.len() % 2 == 0 {
            points.len() / 2
        } else {
            0
        };

        Track {
            points,
            num_segments,
            width,
        }
    }

    pub fn from_pairs(points: &[[f64; 2]], width: f64) -> Self {
        Track::new(
            points.iter().map(|p| Vector2::new(p[0], p[1])).collect(),
            width,
        )
    }

    /// Parses `{"points": [[x, y], ...]}`.
    pub fn from_json_str(json: &str, width: f64) -> SimResult<Self> {
        let file: TrackFile = serde_json::from_str(json)?;
        Ok(Track::from_pairs(&file.points, width))
    }

    pub fn load(path: impl AsRef<Path>, width: f64) -> SimResult<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|source| SimError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Track::from_json_str(&json, width)
    }

    /// Circle of `radius` around the origin, counter-clockwise, one Bezier
    /// segment per `360° / segments`.
    pub fn circle(radius: f64, segments: usize, width: f64) -> Self {
        let mut points = Vec::with_capacity(segments * 2);
        if segments >= 3 {
            let span = std::f64::consts::TAU / segments as f64;
            let control_radius = radius / (span / 2.0).cos();
            for k in 0..segments {
                let start = k as f64 * span;
                let mid = start + span / 2.0;
                points.push(Vector2::new(start.cos(), start.sin()) * radius);
                points.push(Vector2::new(mid.cos(), mid.sin()) * control_radius);
            }
        }
        Track::new(points, width)
    }

    pub fn points(&self) -> &[Vector2<f64>] {
        &self.points
    }

    pub fn num_segments(&self) -> usize {
        self.num_segments
    }

    pub fn is_empty(&self) -> bool {
        self.num_segments == 0
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn half_width(&self) -> f64 {
        self.width / 2.0
    }

    /// Wraps any parameter into `[0, num_segments)`.
    pub fn wrap(&self, t: f64) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        let wrapped = t.rem_euclid(self.num_segments as f64);
        // rem_euclid can round up to the modulus itself for tiny negatives.
        if wrapped >= self.num_segments as f64 {
            0.0
        } else {
            wrapped
        }
    }

    fn segment(&self, index: usize) -> (Vector2<f64>, Vector2<f64>, Vector2<f64>) {
        let n = self.points.len();
        (
            self.points[index * 2],
            self.points[index * 2 + 1],
            self.points[(index * 2 + 2) % n],
        )
    }

    fn split(&self, t: f64) -> (usize, f64) {
        let whole = t.floor();
        let segment = (whole as i64).rem_euclid(self.num_segments as i64) as usize;
        (segment, t - whole)
    }

    /// Centerline position at `t`. Zero on an empty track.
    pub fn position(&self, t: f64) -> Vector2<f64> {
        if self.is_empty() {
            return Vector2::zeros();
        }
        let (segment, u) = self.split(t);
        let (p0, p1, p2) = self.segment(segment);
        bezier(&p0, &p1, &p2, u)
    }

    /// Unit direction of travel at `t`, by forward difference.
    pub fn tangent(&self, t: f64) -> Vector2<f64> {
        let delta = self.position(t + TANGENT_EPSILON) - self.position(t);
        delta.try_normalize(0.0).unwrap_or_else(Vector2::zeros)
    }

    /// Tangent rotated a quarter turn counter-clockwise.
    pub fn normal(&self, t: f64) -> Vector2<f64> {
        let tangent = self.tangent(t);
        Vector2::new(-tangent.y, tangent.x)
    }

    /// Parameter of the centerline point nearest to `point`.
    ///
    /// Every segment is searched on its own with a seeded Newton iteration
    /// on the derivative of the squared distance, and the overall best is
    /// kept. Returns 0 on an empty track.
    pub fn closest_t(&self, point: &Vector2<f64>) -> f64 {
        if self.is_empty() {
            return 0.0;
        }

        let mut best_t = 0.0;
        let mut best_dist2 = f64::INFINITY;
        for segment in 0..self.num_segments {
            let (p0, p1, p2) = self.segment(segment);
            let (u, dist2) = closest_on_segment(&p0, &p1, &p2, point);
            if dist2 < best_dist2 {
                best_dist2 = dist2;
                best_t = segment as f64 + u;
            }
        }

        self.wrap(best_t)
    }

    /// Distance from `point` to the nearest centerline point.
    pub fn distance_to_centerline(&self, point: &Vector2<f64>) -> f64 {
        let t = self.closest_t(point);
        (point - self.position(t)).norm()
    }

    /// Pairs of track-edge points ahead of `current_t`.
    ///
    /// For each of `count` samples spaced `spacing` apart in `t`, emits the
    /// `+normal` edge then the `-normal` edge, at ground height.
    pub fn waypoints(&self, current_t: f64, count: usize, spacing: f64) -> Vec<Point3<f64>> {
        let mut out = Vec::with_capacity(count * 2);
        if self.is_empty() {
            return out;
        }

        let half = self.half_width();
        for i in 0..count {
            let t = self.wrap(current_t + i as f64 * spacing);
            let center = self.position(t);
            let offset = self.normal(t) * half;
            let positive = center + offset;
            let negative = center - offset;
            out.push(Point3::new(positive.x, 0.0, positive.y));
            out.push(Point3::new(negative.x, 0.0, negative.y));
        }
        out
    }
}

fn bezier(p0: &Vector2<f64>, p1: &Vector2<f64>, p2: &Vector2<f64>, u: f64) -> Vector2<f64> {
    let inv = 1.0 - u;
    p0 * (inv * inv) + p1 * (2.0 * inv * u) + p2 * (u * u)
}

/// Best local parameter on one segment and its squared distance to `point`.
fn closest_on_segment(
    p0: &Vector2<f64>,
    p1: &Vector2<f64>,
    p2: &Vector2<f64>,
    point: &Vector2<f64>,
) -> (f64, f64) {
    // B(u) = a u² + b u + p0
    let a = p0 - p1 * 2.0 + p2;
    let b = (p1 - p0) * 2.0;
    let offset = |u: f64| a * (u * u) + b * u + p0 - point;

    let mut best_u = 0.0;
    let mut best_dist2 = f64::INFINITY;
    let mut consider = |u: f64, d: &Vector2<f64>| {
        let dist2 = d.norm_squared();
        if dist2 < best_dist2 {
            best_dist2 = dist2;
            best_u = u;
        }
    };

    for seed in 0..NEWTON_SEEDS {
        let mut u = seed as f64 / (NEWTON_SEEDS - 1) as f64;
        consider(u, &offset(u));

        for _ in 0..NEWTON_ITERATIONS {
            let d = offset(u);
            let d1 = a * (2.0 * u) + b;
            // Half of the first and second derivatives of |d|².
            let slope = d.dot(&d1);
            let curvature = d1.dot(&d1) + d.dot(&(a * 2.0));
            if curvature.abs() < NEWTON_CURVATURE_EPSILON {
                break;
            }

            let next = (u - slope / curvature).clamp(0.0, 1.0);
            let step = next - u;
            u = next;
            consider(u, &offset(u));

            if step.abs() < NEWTON_STEP_TOLERANCE {
                break;
            }
        }
    }

    (best_u, best_dist2)
}
