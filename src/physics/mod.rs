//! Scripted box drop, push and settle.
//!
//! [`ScenarioDriver`] owns the timeline and talks to any [`PhysicsEngine`].
//! [`BoxPileEngine`] is a small engine that treats boxes as axis-aligned
//! point masses inside the trailer. Orientation is carried through but never
//! integrated.

mod engine;

use nalgebra::{Isometry3, Vector3};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::randomizer::{fast_box_poses, positions_to_poses, randomize_box_positions, PlacementBounds};
use crate::scene::{box_model_name, ROBOT_BASE_MODEL, ROOF_MODEL};
use crate::{Error, Result};

pub use engine::{BoxPileEngine, EngineOptions};

/// Body handles are model instance names, e.g. `Boxes/Box_3`.
pub trait PhysicsEngine {
    fn time(&self) -> f64;

    /// Integrates forward until the clock reaches `t`. Going backwards is a no-op.
    fn advance_to(&mut self, t: f64) -> Result<()>;

    fn set_free_body_pose(&mut self, body: &str, pose: Isometry3<f64>) -> Result<()>;

    fn free_body_pose(&self, body: &str) -> Result<Isometry3<f64>>;

    /// World-frame force applied at the body origin until cleared.
    fn apply_force(&mut self, body: &str, force: Vector3<f64>) -> Result<()>;

    fn clear_forces(&mut self);

    /// Freezes the body at its current pose.
    fn lock_body(&mut self, body: &str) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseTimes {
    /// Boxes fall freely until this time.
    pub drop_end: f64,
    pub push_duration: f64,
    pub push_force: [f64; 3],
    /// Boxes settle without external force until this time.
    pub settle_end: f64,
    /// End of the whole run, after region generation.
    pub total: f64,
    /// Step taken when the precomputed poses are used.
    pub fixed_pose_step: f64,
    /// Height the roof is lifted to while boxes drop in.
    pub roof_lift: f64,
}

impl Default for PhaseTimes {
    fn default() -> Self {
        Self {
            drop_end: 1.15,
            push_duration: 1.0,
            push_force: [1000.0, 0.0, 0.0],
            settle_end: 1.15 + 7.1,
            total: 1.15 + 7.1 + 2.5,
            fixed_pose_step: 0.001,
            roof_lift: 100.0,
        }
    }
}

/// Where the boxes start.
#[derive(Debug, Clone)]
pub enum BoxPlacement {
    /// Rejection sampled positions dropped from above the trailer.
    Random { bounds: PlacementBounds, edge: f64 },
    /// Poses captured from an earlier run.
    Fixed(Vec<Isometry3<f64>>),
}

impl BoxPlacement {
    pub fn precomputed() -> Result<Self> {
        Ok(Self::Fixed(fast_box_poses()?))
    }

    fn is_random(&self) -> bool {
        matches!(self, Self::Random { .. })
    }
}

/// Runs the drop/push/settle script against an engine.
pub struct ScenarioDriver<E> {
    engine: E,
    times: PhaseTimes,
    robot_pose: Isometry3<f64>,
    num_boxes: usize,
}

impl<E: PhysicsEngine> ScenarioDriver<E> {
    pub fn new(engine: E, times: PhaseTimes, robot_pose: Isometry3<f64>, num_boxes: usize) -> Self {
        Self {
            engine,
            times,
            robot_pose,
            num_boxes,
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn into_engine(self) -> E {
        self.engine
    }

    /// Places the boxes, runs every phase and returns the settled box poses.
    pub fn settle_boxes<R: Rng + ?Sized>(
        &mut self,
        placement: &BoxPlacement,
        rng: &mut R,
    ) -> Result<Vec<Isometry3<f64>>> {
        let randomize = placement.is_random();
        let roof_home = self.engine.free_body_pose(ROOF_MODEL)?;
        if randomize {
            let lifted = Isometry3::translation(0.0, 0.0, self.times.roof_lift) * roof_home;
            self.engine.set_free_body_pose(ROOF_MODEL, lifted)?;
        }

        self.engine.set_free_body_pose(ROBOT_BASE_MODEL, self.robot_pose)?;
        self.engine.lock_body(ROBOT_BASE_MODEL)?;

        let poses = match placement {
            BoxPlacement::Random { bounds, edge } => {
                let positions = randomize_box_positions(self.num_boxes, bounds, *edge, rng)?;
                positions_to_poses(&positions)
            }
            BoxPlacement::Fixed(poses) => {
                if poses.len() < self.num_boxes {
                    return Err(Error::DimensionMismatch {
                        expected: self.num_boxes,
                        actual: poses.len(),
                    });
                }
                poses[..self.num_boxes].to_vec()
            }
        };
        for (i, pose) in poses.into_iter().enumerate() {
            self.engine.set_free_body_pose(&box_model_name(i), pose)?;
        }

        if randomize {
            info!(until = self.times.drop_end, "dropping boxes");
            self.engine.advance_to(self.times.drop_end)?;
        }

        self.engine.set_free_body_pose(ROOF_MODEL, roof_home)?;
        self.engine.lock_body(ROOF_MODEL)?;

        if randomize {
            let force = Vector3::from(self.times.push_force);
            for i in 0..self.num_boxes {
                self.engine.apply_force(&box_model_name(i), force)?;
            }
            let push_end = self.times.drop_end + self.times.push_duration;
            info!(until = push_end, "pushing boxes to the back wall");
            self.engine.advance_to(push_end)?;
            self.engine.clear_forces();
            info!(until = self.times.settle_end, "settling boxes");
            self.engine.advance_to(self.times.settle_end)?;
        } else {
            self.engine.advance_to(self.times.fixed_pose_step)?;
        }

        let settled = self.box_poses()?;
        debug!(count = settled.len(), time = self.engine.time(), "captured box poses");
        Ok(settled)
    }

    pub fn box_poses(&self) -> Result<Vec<Isometry3<f64>>> {
        (0..self.num_boxes)
            .map(|i| self.engine.free_body_pose(&box_model_name(i)))
            .collect()
    }

    /// Advances to the end of the run.
    pub fn finish(&mut self) -> Result<()> {
        self.engine.advance_to(self.times.total)
    }
}
