//! Planar geometry in a projected, metric coordinate system.
//! All coordinate math uses f64.

use serde::{Deserialize, Serialize};

use crate::error::GeometryError;

/// Coordinates closer than this are treated as coincident.
pub const EPSILON: f64 = 1e-9;

/// A location in projected coordinates (metres).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(self, other: Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    fn coincides(self, other: Point) -> bool {
        (self.x - other.x).abs() <= EPSILON && (self.y - other.y).abs() <= EPSILON
    }
}

/// Axis-aligned bounding extent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    /// Bounding box of a point set. Returns None for an empty set.
    pub fn of(points: &[Point]) -> Option<Self> {
        let first = points.first()?;
        let mut bb = Self { min_x: first.x, min_y: first.y, max_x: first.x, max_y: first.y };
        for p in &points[1..] {
            bb.min_x = bb.min_x.min(p.x);
            bb.min_y = bb.min_y.min(p.y);
            bb.max_x = bb.max_x.max(p.x);
            bb.max_y = bb.max_y.max(p.y);
        }
        Some(bb)
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Length of the longer side.
    pub fn long_side(&self) -> f64 {
        self.width().max(self.height())
    }
}

/// A simple polygon described by its exterior ring.
/// The ring is stored open: the closing vertex is not repeated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    exterior: Vec<Point>,
}

impl Polygon {
    /// Build a polygon from ring vertices, dropping a repeated closing vertex
    /// and consecutive duplicates.
    pub fn new(ring: Vec<Point>) -> Self {
        let mut exterior: Vec<Point> = Vec::with_capacity(ring.len());
        for p in ring {
            if exterior.last().map_or(true, |last| !last.coincides(p)) {
                exterior.push(p);
            }
        }
        while exterior.len() > 1 && exterior[0].coincides(exterior[exterior.len() - 1]) {
            exterior.pop();
        }
        Self { exterior }
    }

    /// Axis-aligned rectangle.
    pub fn rectangle(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self::new(vec![
            Point::new(min_x, min_y),
            Point::new(max_x, min_y),
            Point::new(max_x, max_y),
            Point::new(min_x, max_y),
        ])
    }

    pub fn exterior(&self) -> &[Point] {
        &self.exterior
    }

    /// Check that the ring can be tiled and sampled.
    pub fn validate(&self) -> Result<(), GeometryError> {
        if self.exterior.iter().any(|p| !p.is_finite()) {
            return Err(GeometryError::NonFinite);
        }
        if self.exterior.len() < 3 {
            return Err(GeometryError::TooFewVertices(self.exterior.len()));
        }
        if self.area() <= EPSILON {
            return Err(GeometryError::ZeroArea);
        }
        if self.is_self_intersecting() {
            return Err(GeometryError::SelfIntersecting);
        }
        Ok(())
    }

    /// Whether two non-adjacent edges touch or cross. Quadratic in the
    /// vertex count.
    fn is_self_intersecting(&self) -> bool {
        let ring = &self.exterior;
        let n = ring.len();
        let edge = |i: usize| (ring[i], ring[(i + 1) % n]);
        (0..n).any(|i| {
            // Edge n-1 shares a vertex with edge 0.
            let last = if i == 0 { n - 1 } else { n };
            (i + 2..last).any(|j| {
                let (a, b) = edge(i);
                let (c, d) = edge(j);
                segments_intersect(a, b, c, d)
            })
        })
    }

    pub fn bbox(&self) -> Option<BoundingBox> {
        BoundingBox::of(&self.exterior)
    }

    /// Unsigned area (shoelace formula).
    pub fn area(&self) -> f64 {
        let n = self.exterior.len();
        if n < 3 {
            return 0.0;
        }
        let twice: f64 = (0..n)
            .map(|i| {
                let a = self.exterior[i];
                let b = self.exterior[(i + 1) % n];
                a.x * b.y - b.x * a.y
            })
            .sum();
        twice.abs() / 2.0
    }

    /// Even-odd containment test. Points exactly on the boundary may go
    /// either way; use `distance_to` when the boundary must count.
    pub fn contains(&self, p: Point) -> bool {
        let n = self.exterior.len();
        let mut inside = false;
        let mut j = n.wrapping_sub(1);
        for i in 0..n {
            let a = self.exterior[i];
            let b = self.exterior[j];
            if (a.y > p.y) != (b.y > p.y) {
                let x_cross = (b.x - a.x) * (p.y - a.y) / (b.y - a.y) + a.x;
                if p.x < x_cross {
                    inside = !inside;
                }
            }
            j = i;
        }
        inside
    }

    /// Distance from `p` to the polygon area; 0 inside or on the boundary.
    pub fn distance_to(&self, p: Point) -> f64 {
        if self.contains(p) {
            return 0.0;
        }
        ring_distance(&self.exterior, p, true)
    }

    /// Clip to an axis-aligned box (Sutherland–Hodgman).
    /// Returns None when nothing with positive area is left.
    ///
    /// Concave input that the box cuts into several parts comes back as one
    /// ring joined by zero-width bridges along the box edge; its area is
    /// still exact.
    pub fn clip_to(&self, bb: &BoundingBox) -> Option<Polygon> {
        let mut ring = self.exterior.clone();
        ring = clip_half_plane(&ring, |p| p.x >= bb.min_x, |a, b| intersect_x(a, b, bb.min_x));
        ring = clip_half_plane(&ring, |p| p.x <= bb.max_x, |a, b| intersect_x(a, b, bb.max_x));
        ring = clip_half_plane(&ring, |p| p.y >= bb.min_y, |a, b| intersect_y(a, b, bb.min_y));
        ring = clip_half_plane(&ring, |p| p.y <= bb.max_y, |a, b| intersect_y(a, b, bb.max_y));

        let clipped = remove_spikes(Polygon::new(ring));
        (clipped.exterior.len() >= 3 && clipped.area() > EPSILON).then_some(clipped)
    }
}

/// Drop vertices where the ring doubles back on itself along a line.
/// These are the zero-width bridges clipping leaves behind; without them the
/// bounding box reflects the piece's real extent.
fn remove_spikes(mut poly: Polygon) -> Polygon {
    loop {
        let ring = &poly.exterior;
        let n = ring.len();
        if n < 3 {
            return poly;
        }
        let spike = (0..n).find(|&i| {
            let prev = ring[(i + n - 1) % n];
            let cur = ring[i];
            let next = ring[(i + 1) % n];
            let (ax, ay) = (cur.x - prev.x, cur.y - prev.y);
            let (bx, by) = (next.x - cur.x, next.y - cur.y);
            (ax * by - ay * bx).abs() <= EPSILON && ax * bx + ay * by <= 0.0
        });
        match spike {
            Some(i) => {
                let mut ring = std::mem::take(&mut poly.exterior);
                ring.remove(i);
                poly = Polygon::new(ring);
            }
            None => return poly,
        }
    }
}

fn clip_half_plane<F, I>(ring: &[Point], inside: F, intersect: I) -> Vec<Point>
where
    F: Fn(Point) -> bool,
    I: Fn(Point, Point) -> Point,
{
    let mut out = Vec::with_capacity(ring.len() + 2);
    let Some(&last) = ring.last() else {
        return out;
    };
    let mut prev = last;
    for &cur in ring {
        match (inside(prev), inside(cur)) {
            (true, true) => out.push(cur),
            (true, false) => out.push(intersect(prev, cur)),
            (false, true) => {
                out.push(intersect(prev, cur));
                out.push(cur);
            }
            (false, false) => {}
        }
        prev = cur;
    }
    out
}

fn intersect_x(a: Point, b: Point, x: f64) -> Point {
    let t = (x - a.x) / (b.x - a.x);
    Point::new(x, a.y + t * (b.y - a.y))
}

fn intersect_y(a: Point, b: Point, y: f64) -> Point {
    let t = (y - a.y) / (b.y - a.y);
    Point::new(a.x + t * (b.x - a.x), y)
}

/// Twice the signed area of the triangle `a`, `b`, `p`.
fn orient(a: Point, b: Point, p: Point) -> f64 {
    (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x)
}

/// Whether segments `a`–`b` and `c`–`d` cross or touch.
fn segments_intersect(a: Point, b: Point, c: Point, d: Point) -> bool {
    let (o1, o2) = (orient(a, b, c), orient(a, b, d));
    let (o3, o4) = (orient(c, d, a), orient(c, d, b));
    if o1 * o2 < 0.0 && o3 * o4 < 0.0 {
        return true;
    }
    segment_distance(a, b, c) <= EPSILON
        || segment_distance(a, b, d) <= EPSILON
        || segment_distance(c, d, a) <= EPSILON
        || segment_distance(c, d, b) <= EPSILON
}

/// Distance from `p` to the segment `a`–`b`.
pub fn segment_distance(a: Point, b: Point, p: Point) -> f64 {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let len_sq = dx * dx + dy * dy;
    if len_sq <= EPSILON * EPSILON {
        return a.distance(p);
    }
    let t = (((p.x - a.x) * dx + (p.y - a.y) * dy) / len_sq).clamp(0.0, 1.0);
    Point::new(a.x + t * dx, a.y + t * dy).distance(p)
}

fn ring_distance(vertices: &[Point], p: Point, closed: bool) -> f64 {
    match vertices {
        [] => f64::INFINITY,
        [only] => only.distance(p),
        _ => {
            let open = vertices
                .windows(2)
                .map(|w| segment_distance(w[0], w[1], p))
                .fold(f64::INFINITY, f64::min);
            if closed {
                open.min(segment_distance(vertices[vertices.len() - 1], vertices[0], p))
            } else {
                open
            }
        }
    }
}

/// A source-layer geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates", rename_all = "snake_case")]
pub enum Geometry {
    Point(Point),
    LineString(Vec<Point>),
    Polygon(Polygon),
}

impl Geometry {
    /// Minimum distance from `p`; 0 when `p` lies on or inside the geometry.
    pub fn distance_to(&self, p: Point) -> f64 {
        match self {
            Geometry::Point(q) => q.distance(p),
            Geometry::LineString(line) => ring_distance(line, p, false),
            Geometry::Polygon(poly) => poly.distance_to(p),
        }
    }

    pub fn intersects(&self, p: Point) -> bool {
        self.distance_to(p) <= EPSILON
    }

    pub fn bbox(&self) -> Option<BoundingBox> {
        match self {
            Geometry::Point(q) => BoundingBox::of(std::slice::from_ref(q)),
            Geometry::LineString(line) => BoundingBox::of(line),
            Geometry::Polygon(poly) => poly.bbox(),
        }
    }
}
