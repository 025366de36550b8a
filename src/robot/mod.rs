use std::{
    collections::{HashMap, HashSet},
    path::Path,
};

use nalgebra::{Isometry3, Translation3, Unit, UnitQuaternion, Vector3};
use petgraph::visit::Bfs;
use urdf_rs::{read_file, read_from_string};

use crate::kinematics::{ChainJoint, JointMotion, KinematicChain};
use crate::{Error, Result};

/// The arm that ships with the crate.
pub const DEFAULT_ARM_URDF: &str = include_str!("../../data/robot_arm.urdf");

#[derive(Debug, Clone)]
pub struct Link {
    pub name: String,
    /// Joint connecting this link to its parent, `None` for the root.
    pub joint: Option<urdf_rs::Joint>,
    /// Pose of the link frame in its parent frame at zero joint positions.
    pub local_zero_pose: Isometry3<f64>,
    /// Pose of the link frame in the robot root frame at zero joint positions.
    pub global_zero_pose: Isometry3<f64>,
}

#[derive(Debug, Clone)]
pub struct RobotModel {
    // link index graph, parent -> child
    graph: petgraph::graphmap::DiGraphMap<usize, ()>,
    link_map: HashMap<usize, Link>,
    pub root_index: usize,
    pub leaf_indices: Vec<usize>,
    pub name: String,
}

impl RobotModel {
    pub fn from_urdf(path: impl AsRef<Path>) -> Result<RobotModel> {
        let robot = read_file(path)?;
        parse_robot(robot)
    }

    pub fn from_urdf_str(urdf: &str) -> Result<RobotModel> {
        let robot = read_from_string(urdf)?;
        parse_robot(robot)
    }

    pub fn default_arm() -> Result<RobotModel> {
        Self::from_urdf_str(DEFAULT_ARM_URDF)
    }

    fn bfs(&self, start: usize) -> Vec<usize> {
        let bfs = Bfs::new(&self.graph, start);
        let iter = BfsIter {
            graph: &self.graph,
            bfs,
        };
        iter.collect()
    }

    pub fn get_link(&self, index: usize) -> Option<&Link> {
        self.link_map.get(&index)
    }

    pub fn link_index(&self, name: &str) -> Option<usize> {
        self.link_map
            .iter()
            .find(|(_, link)| link.name == name)
            .map(|(index, _)| *index)
    }

    pub fn num_links(&self) -> usize {
        self.link_map.len()
    }

    pub fn parent(&self, index: usize) -> Option<usize> {
        self.graph
            .neighbors_directed(index, petgraph::Direction::Incoming)
            .next()
    }

    pub fn children(&self, index: usize) -> Vec<usize> {
        self.graph
            .neighbors_directed(index, petgraph::Direction::Outgoing)
            .collect()
    }

    /// Serial chain of joints from link `base` to link `tip`.
    pub fn chain(&self, base: &str, tip: &str) -> Result<KinematicChain> {
        let start = self
            .link_index(base)
            .ok_or_else(|| Error::MissingLink(base.to_string()))?;
        let end = self
            .link_index(tip)
            .ok_or_else(|| Error::MissingLink(tip.to_string()))?;

        let mut path = vec![];
        let mut current = end;
        while current != start {
            path.push(current);
            current = self
                .parent(current)
                .ok_or_else(|| Error::MissingLink(format!("{base} is not an ancestor of {tip}")))?;
        }
        path.reverse();

        let mut joints = Vec::with_capacity(path.len());
        for index in path {
            let link = &self.link_map[&index];
            let Some(joint) = link.joint.as_ref() else {
                continue;
            };
            joints.push(ChainJoint {
                name: joint.name.clone(),
                child_link: link.name.clone(),
                origin: link.local_zero_pose,
                motion: joint_motion(joint),
                lower: joint.limit.lower,
                upper: joint.limit.upper,
            });
        }
        Ok(KinematicChain::new(joints))
    }
}

struct BfsIter<'a> {
    graph: &'a petgraph::graphmap::DiGraphMap<usize, ()>,
    bfs: Bfs<usize, HashSet<usize>>,
}

impl<'a> Iterator for BfsIter<'a> {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        self.bfs.next(self.graph)
    }
}

fn parse_robot(robot: urdf_rs::Robot) -> Result<RobotModel> {
    let index_of: HashMap<String, usize> = robot
        .links
        .iter()
        .enumerate()
        .map(|(index, link)| (link.name.clone(), index))
        .collect();

    let mut graph = petgraph::graphmap::DiGraphMap::new();
    for index in index_of.values() {
        graph.add_node(*index);
    }

    // child index -> joint
    let mut parent_joint: HashMap<usize, urdf_rs::Joint> = HashMap::new();
    for joint in &robot.joints {
        let parent = *index_of
            .get(&joint.parent.link)
            .ok_or_else(|| Error::MissingLink(joint.parent.link.clone()))?;
        let child = *index_of
            .get(&joint.child.link)
            .ok_or_else(|| Error::MissingLink(joint.child.link.clone()))?;
        graph.add_edge(parent, child, ());
        parent_joint.insert(child, joint.clone());
    }

    let root = (0..robot.links.len())
        .find(|index| !parent_joint.contains_key(index))
        .ok_or_else(|| Error::MissingLink("no root link".to_string()))?;

    let leaf_indices = (0..robot.links.len())
        .filter(|index| {
            graph
                .neighbors_directed(*index, petgraph::Direction::Outgoing)
                .next()
                .is_none()
        })
        .collect();

    let link_map = robot
        .links
        .into_iter()
        .enumerate()
        .map(|(i, l)| {
            let joint = parent_joint.remove(&i);
            let local_zero_pose = joint
                .as_ref()
                .map(|j| origin_to_isometry(&j.origin))
                .unwrap_or_else(Isometry3::identity);
            (
                i,
                Link {
                    name: l.name,
                    joint,
                    local_zero_pose,
                    global_zero_pose: Isometry3::identity(),
                },
            )
        })
        .collect::<HashMap<_, _>>();

    let mut model = RobotModel {
        graph,
        link_map,
        name: robot.name,
        root_index: root,
        leaf_indices,
    };

    for link in model.bfs(root) {
        if let Some(parent) = model.parent(link) {
            let parent_pose = model.link_map[&parent].global_zero_pose;
            if let Some(entry) = model.link_map.get_mut(&link) {
                entry.global_zero_pose = parent_pose * entry.local_zero_pose;
            }
        }
    }
    Ok(model)
}

fn joint_motion(joint: &urdf_rs::Joint) -> JointMotion {
    let axis = Vector3::new(joint.axis.xyz[0], joint.axis.xyz[1], joint.axis.xyz[2]);
    match joint.joint_type {
        urdf_rs::JointType::Revolute | urdf_rs::JointType::Continuous => {
            match Unit::try_new(axis, 1e-12) {
                Some(axis) => JointMotion::Revolute(axis),
                None => JointMotion::Fixed,
            }
        }
        urdf_rs::JointType::Prismatic => match Unit::try_new(axis, 1e-12) {
            Some(axis) => JointMotion::Prismatic(axis),
            None => JointMotion::Fixed,
        },
        _ => JointMotion::Fixed,
    }
}

fn origin_to_isometry(origin: &urdf_rs::Pose) -> Isometry3<f64> {
    let rpy = origin.rpy.0;
    let xyz = origin.xyz.0;
    Isometry3::from_parts(
        Translation3::new(xyz[0], xyz[1], xyz[2]),
        UnitQuaternion::from_euler_angles(rpy[0], rpy[1], rpy[2]),
    )
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_default_arm_tree() {
        let model = RobotModel::default_arm().unwrap();
        assert_eq!(model.name, "unload_arm");
        assert_eq!(model.num_links(), 8);
        let root = model.get_link(model.root_index).unwrap();
        assert_eq!(root.name, "base_link");
        assert_eq!(model.leaf_indices.len(), 1);
        let leaf = model.get_link(model.leaf_indices[0]).unwrap();
        assert_eq!(leaf.name, "arm_eef");
        assert_eq!(model.children(model.root_index).len(), 1);
    }

    #[test]
    fn test_global_zero_pose() {
        let model = RobotModel::default_arm().unwrap();
        let eef = model.get_link(model.link_index("arm_eef").unwrap()).unwrap();
        let p = eef.global_zero_pose.translation.vector;
        assert_relative_eq!(p.x, 0.625, epsilon = 1e-12);
        assert_relative_eq!(p.z, 0.855, epsilon = 1e-12);
    }

    #[test]
    fn test_chain() {
        let model = RobotModel::default_arm().unwrap();
        let chain = model.chain("base_link", "arm_eef").unwrap();
        assert_eq!(chain.dof(), 6);
        assert_eq!(
            chain.joint_names(),
            vec!["arm_a1", "arm_a2", "arm_a3", "arm_a4", "arm_a5", "arm_a6"]
        );
    }

    #[test]
    fn test_missing_link() {
        let model = RobotModel::default_arm().unwrap();
        assert!(matches!(
            model.chain("base_link", "gripper"),
            Err(Error::MissingLink(_))
        ));
        // reversed chain has no path
        assert!(model.chain("arm_eef", "base_link").is_err());
    }
}
