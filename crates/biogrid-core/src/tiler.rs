//! Bounded-size recursive subdivision of a polygon.
//!
//! A piece whose bounding extent is longer than `max_dimension` is cut along
//! its longer axis into `ceil(long / max_dimension)` equal slabs; each slab's
//! share of the polygon is tiled again. Slabs partition the plane, so pieces
//! never overlap in area and together cover the input.

use crate::error::GeometryError;
use crate::geometry::{BoundingBox, Polygon};

/// Recursion guard.
pub const MAX_DEPTH: usize = 250;

/// Pieces this small are never split further.
pub const MIN_EXTENT: f64 = 1e-6;

/// Relative slack on the bound, absorbing clipping round-off.
const BOUND_SLACK: f64 = 1e-9;

/// Split `polygon` into pieces whose longer bounding side is at most
/// `max_dimension`. A polygon already within bound comes back as `[polygon]`.
pub fn tile(polygon: &Polygon, max_dimension: f64) -> Result<Vec<Polygon>, GeometryError> {
    if !max_dimension.is_finite() || max_dimension <= 0.0 {
        return Err(GeometryError::InvalidThreshold(max_dimension));
    }
    polygon.validate()?;

    let mut pieces = Vec::new();
    split(polygon.clone(), max_dimension, 0, &mut pieces);
    Ok(pieces)
}

fn split(polygon: Polygon, max_dimension: f64, depth: usize, out: &mut Vec<Polygon>) {
    let Some(bb) = polygon.bbox() else {
        return;
    };
    let long = bb.long_side();
    if long <= max_dimension * (1.0 + BOUND_SLACK) || long <= MIN_EXTENT || depth >= MAX_DEPTH {
        out.push(polygon);
        return;
    }

    let n = ((long / max_dimension).ceil() as usize).max(2);
    for slab in slabs(&bb, n) {
        // Zero-area remnants are dropped by the clip.
        if let Some(piece) = polygon.clip_to(&slab) {
            split(piece, max_dimension, depth + 1, out);
        }
    }
}

/// `n` equal slabs across the longer axis of `bb`. The last slab ends exactly
/// on the box edge.
fn slabs(bb: &BoundingBox, n: usize) -> Vec<BoundingBox> {
    let along_x = bb.width() >= bb.height();
    let (lo, hi) = if along_x { (bb.min_x, bb.max_x) } else { (bb.min_y, bb.max_y) };
    let step = (hi - lo) / n as f64;

    (0..n)
        .map(|i| {
            let a = lo + step * i as f64;
            let b = if i + 1 == n { hi } else { lo + step * (i + 1) as f64 };
            if along_x {
                BoundingBox { min_x: a, max_x: b, ..*bb }
            } else {
                BoundingBox { min_y: a, max_y: b, ..*bb }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Point;
    use approx::assert_relative_eq;

    fn assert_bounded_cover(input: &Polygon, pieces: &[Polygon], d: f64) {
        let total: f64 = pieces.iter().map(Polygon::area).sum();
        assert_relative_eq!(total, input.area(), max_relative = 1e-9);
        for piece in pieces {
            let bb = piece.bbox().unwrap();
            assert!(bb.long_side() <= d * (1.0 + 1e-6), "piece long side {} > {d}", bb.long_side());
            assert!(piece.area() > 0.0);
        }
    }

    #[test]
    fn rectangle_900_by_300_gives_three_squares() {
        let rect = Polygon::rectangle(0.0, 0.0, 900.0, 300.0);
        let pieces = tile(&rect, 300.0).unwrap();
        assert_eq!(pieces.len(), 3);
        assert_bounded_cover(&rect, &pieces, 300.0);
    }

    #[test]
    fn polygon_within_bound_is_returned_unchanged() {
        let rect = Polygon::rectangle(100.0, 100.0, 350.0, 300.0);
        assert_eq!(tile(&rect, 300.0).unwrap(), vec![rect]);
    }

    #[test]
    fn tall_rectangle_splits_along_y() {
        let rect = Polygon::rectangle(0.0, 0.0, 100.0, 1000.0);
        let pieces = tile(&rect, 300.0).unwrap();
        assert_eq!(pieces.len(), 4);
        assert_bounded_cover(&rect, &pieces, 300.0);
        for piece in &pieces {
            assert_relative_eq!(piece.bbox().unwrap().width(), 100.0);
        }
    }

    #[test]
    fn concave_polygon_is_covered() {
        // U shape, 1000 wide, 800 tall, with a notch from the top.
        let u = Polygon::new(vec![
            Point::new(0.0, 0.0),
            Point::new(1000.0, 0.0),
            Point::new(1000.0, 800.0),
            Point::new(700.0, 800.0),
            Point::new(700.0, 200.0),
            Point::new(300.0, 200.0),
            Point::new(300.0, 800.0),
            Point::new(0.0, 800.0),
        ]);
        let pieces = tile(&u, 250.0).unwrap();
        assert!(pieces.len() > 1);
        assert_bounded_cover(&u, &pieces, 250.0);
    }

    #[test]
    fn star_polygon_is_covered_for_several_bounds() {
        let star = Polygon::new(
            (0..16)
                .map(|i| {
                    let angle = i as f64 * std::f64::consts::TAU / 16.0;
                    let r = if i % 2 == 0 { 1200.0 } else { 450.0 };
                    Point::new(5000.0 + r * angle.cos(), 7000.0 + r * angle.sin())
                })
                .collect(),
        );
        for d in [100.0, 300.0, 777.0, 5000.0] {
            let pieces = tile(&star, d).unwrap();
            assert_bounded_cover(&star, &pieces, d);
        }
    }

    #[test]
    fn invalid_inputs_are_rejected() {
        let rect = Polygon::rectangle(0.0, 0.0, 10.0, 10.0);
        assert_eq!(tile(&rect, 0.0), Err(GeometryError::InvalidThreshold(0.0)));
        assert!(matches!(tile(&rect, f64::NAN), Err(GeometryError::InvalidThreshold(_))));

        let flat = Polygon::rectangle(0.0, 0.0, 10.0, 0.0);
        assert!(tile(&flat, 5.0).is_err());
    }

    #[test]
    fn crossing_ring_is_rejected() {
        let bowtie = Polygon::new(vec![
            Point::new(0.0, 0.0),
            Point::new(100.0, 60.0),
            Point::new(100.0, 0.0),
            Point::new(0.0, 20.0),
        ]);
        assert_eq!(tile(&bowtie, 30.0), Err(GeometryError::SelfIntersecting));
    }
}
