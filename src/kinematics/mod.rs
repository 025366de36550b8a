use std::f64::consts::PI;

use nalgebra::{DVector, Isometry3, Point3, Translation3, Unit, UnitQuaternion, Vector3};

use crate::polytope::HPolyhedron;
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum JointMotion {
    Revolute(Unit<Vector3<f64>>),
    Prismatic(Unit<Vector3<f64>>),
    Fixed,
}

#[derive(Debug, Clone)]
pub struct ChainJoint {
    pub name: String,
    pub child_link: String,
    /// Joint frame in the parent link frame.
    pub origin: Isometry3<f64>,
    pub motion: JointMotion,
    pub lower: f64,
    pub upper: f64,
}

impl ChainJoint {
    pub fn is_movable(&self) -> bool {
        self.motion != JointMotion::Fixed
    }

    fn transform(&self, position: f64) -> Isometry3<f64> {
        match &self.motion {
            JointMotion::Revolute(axis) => {
                self.origin * UnitQuaternion::from_axis_angle(axis, position)
            }
            JointMotion::Prismatic(axis) => {
                self.origin * Translation3::from(axis.into_inner() * position)
            }
            JointMotion::Fixed => self.origin,
        }
    }
}

/// Serial chain with one position per movable joint.
#[derive(Debug, Clone)]
pub struct KinematicChain {
    joints: Vec<ChainJoint>,
    base_pose: Isometry3<f64>,
}

impl KinematicChain {
    pub fn new(joints: Vec<ChainJoint>) -> Self {
        Self {
            joints,
            base_pose: Isometry3::identity(),
        }
    }

    /// Places the chain base in the world, e.g. the robot welded on its pedestal.
    pub fn with_base_pose(mut self, base_pose: Isometry3<f64>) -> Self {
        self.base_pose = base_pose;
        self
    }

    pub fn base_pose(&self) -> &Isometry3<f64> {
        &self.base_pose
    }

    pub fn dof(&self) -> usize {
        self.joints.iter().filter(|j| j.is_movable()).count()
    }

    pub fn joint_names(&self) -> Vec<&str> {
        self.joints
            .iter()
            .filter(|j| j.is_movable())
            .map(|j| j.name.as_str())
            .collect()
    }

    /// Lower and upper position limits; continuous joints get `[-pi, pi]`.
    pub fn position_limits(&self) -> (DVector<f64>, DVector<f64>) {
        let movable: Vec<_> = self.joints.iter().filter(|j| j.is_movable()).collect();
        let mut lower = DVector::zeros(movable.len());
        let mut upper = DVector::zeros(movable.len());
        for (i, joint) in movable.iter().enumerate() {
            if joint.lower < joint.upper {
                lower[i] = joint.lower;
                upper[i] = joint.upper;
            } else {
                lower[i] = -PI;
                upper[i] = PI;
            }
        }
        (lower, upper)
    }

    /// The joint-limit box as a region.
    pub fn domain(&self) -> Result<HPolyhedron> {
        let (lower, upper) = self.position_limits();
        HPolyhedron::make_box(&lower, &upper)
    }

    /// World pose of the base followed by the frame of every link in the chain.
    pub fn forward_kinematics(&self, q: &DVector<f64>) -> Result<Vec<Isometry3<f64>>> {
        if q.len() != self.dof() {
            return Err(Error::DimensionMismatch {
                expected: self.dof(),
                actual: q.len(),
            });
        }
        let mut poses = Vec::with_capacity(self.joints.len() + 1);
        let mut pose = self.base_pose;
        poses.push(pose);
        let mut positions = q.iter();
        for joint in &self.joints {
            let position = if joint.is_movable() {
                positions.next().copied().unwrap_or(0.0)
            } else {
                0.0
            };
            pose *= joint.transform(position);
            poses.push(pose);
        }
        Ok(poses)
    }

    pub fn tip_pose(&self, q: &DVector<f64>) -> Result<Isometry3<f64>> {
        let poses = self.forward_kinematics(q)?;
        Ok(poses.last().copied().unwrap_or(self.base_pose))
    }

    /// Origins of every frame returned by [`forward_kinematics`](Self::forward_kinematics).
    pub fn frame_origins(&self, q: &DVector<f64>) -> Result<Vec<Point3<f64>>> {
        Ok(self
            .forward_kinematics(q)?
            .iter()
            .map(|pose| Point3::from(pose.translation.vector))
            .collect())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::robot::RobotModel;
    use approx::assert_relative_eq;
    use core::f64::consts::FRAC_PI_2;

    fn arm() -> KinematicChain {
        RobotModel::default_arm()
            .unwrap()
            .chain("base_link", "arm_eef")
            .unwrap()
    }

    #[test]
    fn test_fk_zero() {
        let chain = arm();
        let tip = chain.tip_pose(&DVector::zeros(6)).unwrap();
        assert_relative_eq!(tip.translation.vector.x, 0.625, epsilon = 1e-12);
        assert_relative_eq!(tip.translation.vector.y, 0.0, epsilon = 1e-12);
        assert_relative_eq!(tip.translation.vector.z, 0.855, epsilon = 1e-12);
    }

    #[test]
    fn test_fk_base_rotation() {
        let chain = arm();
        let q = DVector::from_column_slice(&[FRAC_PI_2, 0., 0., 0., 0., 0.]);
        let tip = chain.tip_pose(&q).unwrap();
        assert_relative_eq!(tip.translation.vector.x, 0.0, epsilon = 1e-12);
        assert_relative_eq!(tip.translation.vector.y, 0.625, epsilon = 1e-12);
        assert_relative_eq!(tip.translation.vector.z, 0.855, epsilon = 1e-12);
    }

    #[test]
    fn test_fk_shoulder() {
        // pitching the shoulder by pi/2 about y lays the upper arm along +x
        let chain = arm();
        let q = DVector::from_column_slice(&[0., FRAC_PI_2, 0., 0., 0., 0.]);
        let origins = chain.frame_origins(&q).unwrap();
        // base, a1, a2, a3, ...
        let elbow = origins[3];
        assert_relative_eq!(elbow.x, 0.025 + 0.455, epsilon = 1e-12);
        assert_relative_eq!(elbow.z, 0.4, epsilon = 1e-12);
    }

    #[test]
    fn test_base_pose() {
        let chain = arm().with_base_pose(Isometry3::translation(0.0, 0.0, 0.58));
        let tip = chain.tip_pose(&DVector::zeros(6)).unwrap();
        assert_relative_eq!(tip.translation.vector.z, 1.435, epsilon = 1e-12);
    }

    #[test]
    fn test_limits_and_domain() {
        let chain = arm();
        let (lower, upper) = chain.position_limits();
        assert_eq!(lower.len(), 6);
        assert_relative_eq!(lower[0], -2.967);
        assert_relative_eq!(upper[1], 0.785);
        let domain = chain.domain().unwrap();
        let nominal = DVector::from_column_slice(&[0.0, -2.2, 2.2, 0.0, 1.57, 0.0]);
        assert!(domain.contains(&nominal, 0.0));
    }

    #[test]
    fn test_dimension_mismatch() {
        let chain = arm();
        assert!(matches!(
            chain.forward_kinematics(&DVector::zeros(3)),
            Err(Error::DimensionMismatch {
                expected: 6,
                actual: 3
            })
        ));
    }
}
