//! Box placements for the drop phase.
//!
//! Boxes are placed by rejection sampling inside fixed bounds. A candidate is
//! rejected when it is closer than one box edge to an already placed box on
//! every axis at once.

use nalgebra::{Isometry3, Matrix3, Rotation3, Translation3, UnitQuaternion, Vector3};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Error, Result};

/// Consecutive rejections allowed for a single box before giving up.
pub const MAX_PLACEMENT_ATTEMPTS: usize = 100;

const FAST_BOX_POSES: &str = include_str!("../../data/fast_box_poses.yaml");

/// Half-open sampling ranges `[low, high)` per axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementBounds {
    pub x: [f64; 2],
    pub y: [f64; 2],
    pub z: [f64; 2],
}

impl Default for PlacementBounds {
    fn default() -> Self {
        Self {
            x: [2.0, 3.5],
            y: [-1.2, 0.7],
            z: [0.5, 5.0],
        }
    }
}

impl PlacementBounds {
    pub fn contains(&self, p: &Vector3<f64>) -> bool {
        let inside = |v: f64, [lo, hi]: [f64; 2]| lo <= v && v < hi;
        inside(p.x, self.x) && inside(p.y, self.y) && inside(p.z, self.z)
    }

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Vector3<f64> {
        Vector3::new(
            rng.gen_range(self.x[0]..self.x[1]),
            rng.gen_range(self.y[0]..self.y[1]),
            rng.gen_range(self.z[0]..self.z[1]),
        )
    }
}

/// True when `a` and `b` are closer than `edge` on all three axes.
pub fn overlaps(a: &Vector3<f64>, b: &Vector3<f64>, edge: f64) -> bool {
    (a.x - b.x).abs() < edge && (a.y - b.y).abs() < edge && (a.z - b.z).abs() < edge
}

/// Places `count` boxes of edge length `edge` inside `bounds`.
///
/// Fails with [`Error::BoxPlacement`] when [`MAX_PLACEMENT_ATTEMPTS`]
/// consecutive candidates for one box are rejected.
pub fn randomize_box_positions<R: Rng + ?Sized>(
    count: usize,
    bounds: &PlacementBounds,
    edge: f64,
    rng: &mut R,
) -> Result<Vec<Vector3<f64>>> {
    let mut placed: Vec<Vector3<f64>> = Vec::with_capacity(count);
    for index in 0..count {
        let mut rejected = 0;
        loop {
            let candidate = bounds.sample(rng);
            if !placed.iter().any(|p| overlaps(&candidate, p, edge)) {
                placed.push(candidate);
                break;
            }
            rejected += 1;
            if rejected >= MAX_PLACEMENT_ATTEMPTS {
                return Err(Error::BoxPlacement {
                    index,
                    attempts: rejected,
                });
            }
        }
        debug!(index, rejected, "placed box");
    }
    Ok(placed)
}

/// Translation-only poses for randomized positions.
pub fn positions_to_poses(positions: &[Vector3<f64>]) -> Vec<Isometry3<f64>> {
    positions
        .iter()
        .map(|p| Isometry3::from_parts(Translation3::from(*p), UnitQuaternion::identity()))
        .collect()
}

#[derive(Debug, Deserialize)]
struct PoseRecord {
    rotation: [[f64; 3]; 3],
    translation: [f64; 3],
}

#[derive(Debug, Deserialize)]
struct PoseList {
    poses: Vec<PoseRecord>,
}

/// Precomputed settled poses, used instead of running the drop phase.
pub fn fast_box_poses() -> Result<Vec<Isometry3<f64>>> {
    let list: PoseList = serde_yaml::from_str(FAST_BOX_POSES)?;
    Ok(list
        .poses
        .iter()
        .map(|record| {
            let r = record.rotation;
            let m = Matrix3::new(
                r[0][0], r[0][1], r[0][2], r[1][0], r[1][1], r[1][2], r[2][0], r[2][1], r[2][2],
            );
            let rotation = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(m));
            let t = record.translation;
            Isometry3::from_parts(Translation3::new(t[0], t[1], t[2]), rotation)
        })
        .collect())
}
