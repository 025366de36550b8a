//! Configuration-space collision checking.
//!
//! Checkers answer "is this joint configuration free" and carry an optional
//! set of configuration-space obstacles. A configuration inside any obstacle
//! region counts as colliding, whatever the underlying geometry says.

use nalgebra::{DVector, Isometry3, Point3, Vector3};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::kinematics::KinematicChain;
use crate::polytope::HPolyhedron;
use crate::scene::{Cuboid, TrailerGeometry};

/// Joint-space distance between interpolated checks along an edge.
pub const DEFAULT_EDGE_STEP_SIZE: f64 = 0.125;

pub trait CollisionChecker {
    fn is_collision_free(&self, q: &DVector<f64>) -> bool;

    /// Replaces the configuration-space obstacles.
    fn set_obstacles(&mut self, regions: Vec<HPolyhedron>);

    fn obstacles(&self) -> &[HPolyhedron];

    fn edge_step_size(&self) -> f64;

    /// Checks the straight segment from `a` to `b`, endpoints included.
    fn is_edge_collision_free(&self, a: &DVector<f64>, b: &DVector<f64>) -> bool {
        if a.len() != b.len() {
            return false;
        }
        let step = self.edge_step_size();
        let distance = (b - a).norm();
        let steps = if step > 0.0 {
            ((distance / step).ceil() as usize).max(1)
        } else {
            1
        };
        (0..=steps).all(|i| {
            let t = i as f64 / steps as f64;
            self.is_collision_free(&a.lerp(b, t))
        })
    }
}

fn in_any_obstacle(obstacles: &[HPolyhedron], q: &DVector<f64>) -> bool {
    obstacles.iter().any(|region| region.contains(q, 0.0))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckerSettings {
    pub edge_step_size: f64,
    /// Radius of the spheres swept along every link.
    pub link_radius: f64,
    pub self_collision: bool,
}

impl Default for CheckerSettings {
    fn default() -> Self {
        Self {
            edge_step_size: DEFAULT_EDGE_STEP_SIZE,
            link_radius: 0.1,
            self_collision: false,
        }
    }
}

/// Arm links as capsules between consecutive joint frames, checked against
/// oriented boxes.
#[derive(Debug, Clone)]
pub struct SceneCollisionChecker {
    chain: KinematicChain,
    environment: Vec<Cuboid>,
    settings: CheckerSettings,
    obstacles: Vec<HPolyhedron>,
}

impl SceneCollisionChecker {
    pub fn new(chain: KinematicChain, environment: Vec<Cuboid>, settings: CheckerSettings) -> Self {
        Self {
            chain,
            environment,
            settings,
            obstacles: vec![],
        }
    }

    /// Trailer panels plus one cube of edge `box_edge` per box pose.
    pub fn for_unloading(
        chain: KinematicChain,
        trailer: &TrailerGeometry,
        box_poses: &[Isometry3<f64>],
        box_edge: f64,
        settings: CheckerSettings,
    ) -> Self {
        let mut environment: Vec<Cuboid> =
            trailer.panels().into_iter().map(|(_, panel)| panel).collect();
        environment.extend(
            box_poses
                .iter()
                .map(|pose| Cuboid::new(*pose, Vector3::repeat(box_edge / 2.0))),
        );
        debug!(
            panels = environment.len() - box_poses.len(),
            boxes = box_poses.len(),
            "scene collision geometry"
        );
        Self::new(chain, environment, settings)
    }

    pub fn chain(&self) -> &KinematicChain {
        &self.chain
    }

    pub fn environment(&self) -> &[Cuboid] {
        &self.environment
    }

    fn link_segments(&self, q: &DVector<f64>) -> Option<Vec<(Point3<f64>, Point3<f64>)>> {
        let origins = self.chain.frame_origins(q).ok()?;
        Some(origins.windows(2).map(|w| (w[0], w[1])).collect())
    }

    fn hits_environment(&self, segments: &[(Point3<f64>, Point3<f64>)]) -> bool {
        let r = self.settings.link_radius;
        segments.iter().any(|(a, b)| {
            let length = (b - a).norm();
            let samples = ((length / r).ceil() as usize).max(1);
            (0..=samples).any(|i| {
                let p = a + (b - a) * (i as f64 / samples as f64);
                self.environment.iter().any(|cuboid| cuboid.distance(&p) < r)
            })
        })
    }

    /// Links closer than two radii along the chain are never tested
    /// against each other.
    fn hits_itself(&self, segments: &[(Point3<f64>, Point3<f64>)]) -> bool {
        let reach = 2.0 * self.settings.link_radius;
        let lengths: Vec<f64> = segments.iter().map(|(a, b)| (b - a).norm()).collect();
        for i in 0..segments.len() {
            let mut gap = 0.0;
            for j in (i + 1)..segments.len() {
                if j > i + 1 {
                    gap += lengths[j - 1];
                }
                if gap < reach {
                    continue;
                }
                let (a0, a1) = &segments[i];
                let (b0, b1) = &segments[j];
                if segment_distance(a0, a1, b0, b1) < reach {
                    return true;
                }
            }
        }
        false
    }
}

impl CollisionChecker for SceneCollisionChecker {
    fn is_collision_free(&self, q: &DVector<f64>) -> bool {
        if in_any_obstacle(&self.obstacles, q) {
            return false;
        }
        let Some(segments) = self.link_segments(q) else {
            return false;
        };
        if self.hits_environment(&segments) {
            return false;
        }
        !(self.settings.self_collision && self.hits_itself(&segments))
    }

    fn set_obstacles(&mut self, regions: Vec<HPolyhedron>) {
        self.obstacles = regions;
    }

    fn obstacles(&self) -> &[HPolyhedron] {
        &self.obstacles
    }

    fn edge_step_size(&self) -> f64 {
        self.settings.edge_step_size
    }
}

/// Closest distance between segments `[p0, p1]` and `[q0, q1]`.
fn segment_distance(p0: &Point3<f64>, p1: &Point3<f64>, q0: &Point3<f64>, q1: &Point3<f64>) -> f64 {
    let d1 = p1 - p0;
    let d2 = q1 - q0;
    let r = p0 - q0;
    let a = d1.dot(&d1);
    let e = d2.dot(&d2);
    let f = d2.dot(&r);
    let eps = 1e-12;

    let (s, t) = if a <= eps && e <= eps {
        (0.0, 0.0)
    } else if a <= eps {
        (0.0, (f / e).clamp(0.0, 1.0))
    } else {
        let c = d1.dot(&r);
        if e <= eps {
            ((-c / a).clamp(0.0, 1.0), 0.0)
        } else {
            let b = d1.dot(&d2);
            let denom = a * e - b * b;
            let mut s = if denom > eps {
                ((b * f - c * e) / denom).clamp(0.0, 1.0)
            } else {
                0.0
            };
            let mut t = (b * s + f) / e;
            if t < 0.0 {
                t = 0.0;
                s = (-c / a).clamp(0.0, 1.0);
            } else if t > 1.0 {
                t = 1.0;
                s = ((b - c) / a).clamp(0.0, 1.0);
            }
            (s, t)
        }
    };
    let closest_p = p0 + d1 * s;
    let closest_q = q0 + d2 * t;
    (closest_p - closest_q).norm()
}

/// Wraps a predicate, for tests and for plugging in an external backend.
pub struct FnChecker<F> {
    predicate: F,
    obstacles: Vec<HPolyhedron>,
    edge_step_size: f64,
}

impl<F> FnChecker<F>
where
    F: Fn(&DVector<f64>) -> bool,
{
    pub fn new(predicate: F) -> Self {
        Self {
            predicate,
            obstacles: vec![],
            edge_step_size: DEFAULT_EDGE_STEP_SIZE,
        }
    }

    pub fn with_edge_step_size(mut self, step: f64) -> Self {
        self.edge_step_size = step;
        self
    }
}

impl<F> CollisionChecker for FnChecker<F>
where
    F: Fn(&DVector<f64>) -> bool,
{
    fn is_collision_free(&self, q: &DVector<f64>) -> bool {
        !in_any_obstacle(&self.obstacles, q) && (self.predicate)(q)
    }

    fn set_obstacles(&mut self, regions: Vec<HPolyhedron>) {
        self.obstacles = regions;
    }

    fn obstacles(&self) -> &[HPolyhedron] {
        &self.obstacles
    }

    fn edge_step_size(&self) -> f64 {
        self.edge_step_size
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::robot::RobotModel;
    use approx::assert_relative_eq;

    const Q_NOMINAL: [f64; 6] = [0.0, -2.2, 2.2, 0.0, 1.57, 0.0];

    fn arm() -> KinematicChain {
        RobotModel::default_arm()
            .unwrap()
            .chain("base_link", "arm_eef")
            .unwrap()
            .with_base_pose(Isometry3::translation(0.0, 0.0, 0.58))
    }

    #[test]
    fn test_segment_distance() {
        let o = Point3::origin();
        let x = Point3::new(1.0, 0.0, 0.0);
        // parallel
        let d = segment_distance(&o, &x, &Point3::new(0.0, 1.0, 0.0), &Point3::new(1.0, 1.0, 0.0));
        assert_relative_eq!(d, 1.0, epsilon = 1e-12);
        // crossing above
        let d = segment_distance(
            &o,
            &x,
            &Point3::new(0.5, -1.0, 0.5),
            &Point3::new(0.5, 1.0, 0.5),
        );
        assert_relative_eq!(d, 0.5, epsilon = 1e-12);
        // degenerate against endpoint region
        let d = segment_distance(&Point3::new(3.0, 0.0, 0.0), &Point3::new(3.0, 0.0, 0.0), &o, &x);
        assert_relative_eq!(d, 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_nominal_is_free_in_empty_trailer() {
        let checker = SceneCollisionChecker::for_unloading(
            arm(),
            &TrailerGeometry::default(),
            &[],
            0.5,
            CheckerSettings::default(),
        );
        assert_eq!(checker.environment().len(), 5);
        assert!(checker.is_collision_free(&DVector::from_column_slice(&Q_NOMINAL)));
    }

    #[test]
    fn test_arm_into_floor() {
        let checker = SceneCollisionChecker::for_unloading(
            arm(),
            &TrailerGeometry::default(),
            &[],
            0.5,
            CheckerSettings::default(),
        );
        // upper arm folded back down, forearm pointing at the floor
        let q = DVector::from_column_slice(&[0.0, -3.316, -1.396, 0.0, 0.0, 0.0]);
        assert!(!checker.is_collision_free(&q));
    }

    #[test]
    fn test_box_in_reach() {
        // a box around the tip of the upright arm
        let zero = DVector::zeros(6);
        let tip = arm().tip_pose(&zero).unwrap();
        let checker = SceneCollisionChecker::for_unloading(
            arm(),
            &TrailerGeometry::default(),
            &[tip],
            0.5,
            CheckerSettings::default(),
        );
        assert!(!checker.is_collision_free(&zero));
    }

    #[test]
    fn test_self_collision() {
        // folded back so the forearm passes through the base column
        let q = DVector::from_column_slice(&Q_NOMINAL);
        let settings = CheckerSettings {
            self_collision: true,
            ..Default::default()
        };
        let checker = SceneCollisionChecker::new(arm(), vec![], settings);
        assert!(!checker.is_collision_free(&q));
        assert!(checker.is_collision_free(&DVector::zeros(6)));
        let relaxed = SceneCollisionChecker::new(arm(), vec![], CheckerSettings::default());
        assert!(relaxed.is_collision_free(&q));
    }

    #[test]
    fn test_wrong_dimension_collides() {
        let checker = SceneCollisionChecker::new(arm(), vec![], CheckerSettings::default());
        assert!(!checker.is_collision_free(&DVector::zeros(2)));
    }

    #[test]
    fn test_obstacles_override() {
        let mut checker = FnChecker::new(|_: &DVector<f64>| true);
        let q = DVector::from_column_slice(&[0.5, 0.5]);
        assert!(checker.is_collision_free(&q));
        let region = HPolyhedron::make_box(&DVector::zeros(2), &DVector::from_element(2, 1.0)).unwrap();
        checker.set_obstacles(vec![region]);
        assert!(!checker.is_collision_free(&q));
        assert!(checker.is_collision_free(&DVector::from_column_slice(&[2.0, 2.0])));
        checker.set_obstacles(vec![]);
        assert!(checker.obstacles().is_empty());
        assert!(checker.is_collision_free(&q));
    }

    #[test]
    fn test_edge_check() {
        // wall at x in [1, 1.1]
        let checker = FnChecker::new(|q: &DVector<f64>| !(1.0..=1.1).contains(&q[0]));
        let a = DVector::from_column_slice(&[0.0, 0.0]);
        let b = DVector::from_column_slice(&[2.0, 0.0]);
        let c = DVector::from_column_slice(&[0.9, 0.5]);
        assert!(!checker.is_edge_collision_free(&a, &b));
        assert!(checker.is_edge_collision_free(&a, &c));
        assert!(checker.is_edge_collision_free(&a, &a));
    }
}
