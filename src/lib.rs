//! # unload is a library for truck-unloading scenes and configuration-space coverage.
//! unload = box piles + convex collision-free regions for the unloading arm

#![deny(unsafe_code)]

pub mod checker;
pub mod config;
mod error;
pub mod kinematics;
pub mod physics;
pub mod planning;
pub mod polytope;
pub mod randomizer;
pub mod region_file;
pub mod robot;
pub mod scene;
pub mod viz;

pub use checker::{CollisionChecker, FnChecker, SceneCollisionChecker};
pub use config::Settings;
pub use error::{Error, Result};
pub use kinematics::KinematicChain;
pub use physics::{BoxPileEngine, PhysicsEngine, ScenarioDriver};
pub use polytope::HPolyhedron;
pub use region_file::RegionCollection;
pub use robot::RobotModel;
