//! Scene descriptions as typed directive lists.
//!
//! A [`Scene`] serialises to the model-directive YAML layout understood by
//! multibody front ends:
//!
//! ```yaml
//! directives:
//! - add_model:
//!     name: robot_base
//!     file: file:///abs/robot_base.urdf
//! - add_weld:
//!     parent: robot_base::base
//!     child: kuka::base_link
//! model_drivers:
//!   kuka: !ForceDriver {}
//! ```

mod trailer;

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub use trailer::{Cuboid, TrailerGeometry};

pub const WORLD_FRAME: &str = "world";
pub const ROBOT_BASE_MODEL: &str = "robot_base";
pub const ARM_MODEL: &str = "kuka";
pub const ROOF_MODEL: &str = "Truck_Trailer_Roof";
pub const ARM_JOINTS: [&str; 6] = ["arm_a1", "arm_a2", "arm_a3", "arm_a4", "arm_a5", "arm_a6"];

/// Model instance name of box `index`.
pub fn box_model_name(index: usize) -> String {
    format!("Boxes/Box_{index}")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Directive {
    AddModel {
        name: String,
        file: String,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        default_joint_positions: BTreeMap<String, Vec<f64>>,
    },
    AddWeld {
        parent: String,
        child: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ModelDriver {
    /// Exposes desired state and acceleration inputs on the station.
    ForceDriver {},
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    #[serde(with = "serde_yaml::with::singleton_map_recursive")]
    pub directives: Vec<Directive>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub model_drivers: BTreeMap<String, ModelDriver>,
}

impl Scene {
    pub fn model_names(&self) -> impl Iterator<Item = &str> {
        self.directives.iter().filter_map(|d| match d {
            Directive::AddModel { name, .. } => Some(name.as_str()),
            Directive::AddWeld { .. } => None,
        })
    }

    pub fn has_model(&self, name: &str) -> bool {
        self.model_names().any(|n| n == name)
    }

    /// True when some directive welds a frame of `model` to a parent.
    pub fn is_welded(&self, model: &str) -> bool {
        self.directives.iter().any(|d| match d {
            Directive::AddWeld { child, .. } => {
                split_scoped(child).map(|(m, _)| m == model).unwrap_or(false)
            }
            Directive::AddModel { .. } => false,
        })
    }

    /// Checks names, file URIs, weld references and driver targets.
    pub fn validate(&self) -> Result<()> {
        let mut models: HashSet<&str> = HashSet::new();
        let mut welded_children: HashSet<&str> = HashSet::new();
        for directive in &self.directives {
            match directive {
                Directive::AddModel {
                    name,
                    file,
                    default_joint_positions,
                } => {
                    if name.is_empty() {
                        return Err(Error::Scene("model with an empty name".into()));
                    }
                    if !models.insert(name.as_str()) {
                        return Err(Error::Scene(format!("duplicate model name {name}")));
                    }
                    if !(file.starts_with("file://") || file.starts_with("package://")) {
                        return Err(Error::Scene(format!(
                            "model {name} has an invalid file URI {file:?}"
                        )));
                    }
                    if let Some(joint) = default_joint_positions.iter().find_map(|(joint, v)| {
                        (joint.is_empty() || v.is_empty()).then_some(joint)
                    }) {
                        return Err(Error::Scene(format!(
                            "model {name} has an invalid default position for joint {joint:?}"
                        )));
                    }
                }
                Directive::AddWeld { parent, child } => {
                    if parent != WORLD_FRAME {
                        let (model, _) = split_scoped(parent).ok_or_else(|| {
                            Error::Scene(format!("weld parent {parent:?} is not model::frame"))
                        })?;
                        if !models.contains(model) {
                            return Err(Error::Scene(format!(
                                "weld parent {parent} references unknown model {model}"
                            )));
                        }
                    }
                    let (model, _) = split_scoped(child).ok_or_else(|| {
                        Error::Scene(format!("weld child {child:?} is not model::frame"))
                    })?;
                    if !models.contains(model) {
                        return Err(Error::Scene(format!(
                            "weld child {child} references unknown model {model}"
                        )));
                    }
                    if !welded_children.insert(model) {
                        return Err(Error::Scene(format!("model {model} is welded twice")));
                    }
                }
            }
        }
        if let Some(name) = self.model_drivers.keys().find(|n| !models.contains(n.as_str())) {
            return Err(Error::Scene(format!("driver for unknown model {name}")));
        }
        Ok(())
    }

    pub fn to_yaml(&self) -> Result<String> {
        self.validate()?;
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let scene: Scene = serde_yaml::from_str(yaml)?;
        scene.validate()?;
        Ok(scene)
    }
}

fn split_scoped(name: &str) -> Option<(&str, &str)> {
    let (model, frame) = name.split_once("::")?;
    (!model.is_empty() && !frame.is_empty()).then_some((model, frame))
}

/// Assembles a [`Scene`] directive by directive.
#[derive(Debug, Clone, Default)]
pub struct SceneBuilder {
    scene: Scene,
}

impl SceneBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_model(mut self, name: impl Into<String>, file: impl Into<String>) -> Self {
        self.scene.directives.push(Directive::AddModel {
            name: name.into(),
            file: file.into(),
            default_joint_positions: BTreeMap::new(),
        });
        self
    }

    pub fn add_model_with_positions(
        mut self,
        name: impl Into<String>,
        file: impl Into<String>,
        positions: impl IntoIterator<Item = (String, f64)>,
    ) -> Self {
        self.scene.directives.push(Directive::AddModel {
            name: name.into(),
            file: file.into(),
            default_joint_positions: positions.into_iter().map(|(j, q)| (j, vec![q])).collect(),
        });
        self
    }

    pub fn add_weld(mut self, parent: impl Into<String>, child: impl Into<String>) -> Self {
        self.scene.directives.push(Directive::AddWeld {
            parent: parent.into(),
            child: child.into(),
        });
        self
    }

    pub fn add_driver(mut self, model: impl Into<String>, driver: ModelDriver) -> Self {
        self.scene.model_drivers.insert(model.into(), driver);
        self
    }

    pub fn build(self) -> Result<Scene> {
        self.scene.validate()?;
        Ok(self.scene)
    }
}

/// Model files referenced by the unloading scenes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenePaths {
    pub robot_base: PathBuf,
    pub robot_arm: PathBuf,
    pub trailer_floor: PathBuf,
    pub trailer_back: PathBuf,
    pub trailer_right_side: PathBuf,
    pub trailer_left_side: PathBuf,
    pub trailer_roof: PathBuf,
    pub box_model: PathBuf,
}

impl Default for ScenePaths {
    fn default() -> Self {
        Self {
            robot_base: "data/unload-gen0/robot_base.urdf".into(),
            robot_arm: "data/robot_arm.urdf".into(),
            trailer_floor: "data/Truck_Trailer_Floor.sdf".into(),
            trailer_back: "data/Truck_Trailer_Back.sdf".into(),
            trailer_right_side: "data/Truck_Trailer_Right_Side.sdf".into(),
            trailer_left_side: "data/Truck_Trailer_Left_Side.sdf".into(),
            trailer_roof: "data/Truck_Trailer_Roof.sdf".into(),
            box_model: "data/Box_0_5_0_5_0_5.sdf".into(),
        }
    }
}

/// `file://` URI of `path`, made absolute against the working directory.
pub fn file_uri(path: &Path) -> Result<String> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        let cwd = std::env::current_dir().map_err(|e| Error::io(path, e))?;
        cwd.join(path)
    };
    Ok(format!("file://{}", absolute.display()))
}

/// Which variant of the unloading scene to assemble.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneKind {
    /// Full station: arm driven by a force driver, roof free so it can be
    /// lifted away while boxes drop in.
    Simulation,
    /// Collision model for region generation: no driver, roof welded.
    Iris,
}

/// The truck-unloading scene with `num_boxes` boxes.
pub fn unloading_scene(
    paths: &ScenePaths,
    q_nominal: &[f64],
    num_boxes: usize,
    kind: SceneKind,
) -> Result<Scene> {
    let positions = ARM_JOINTS
        .iter()
        .zip(q_nominal)
        .map(|(joint, q)| (joint.to_string(), *q));

    let mut builder = SceneBuilder::new()
        .add_model(ROBOT_BASE_MODEL, file_uri(&paths.robot_base)?)
        .add_model_with_positions(ARM_MODEL, file_uri(&paths.robot_arm)?, positions)
        .add_weld(format!("{ROBOT_BASE_MODEL}::base"), format!("{ARM_MODEL}::base_link"));

    for (name, file) in [
        ("Truck_Trailer_Floor", &paths.trailer_floor),
        ("Truck_Trailer_Right_Side", &paths.trailer_right_side),
        ("Truck_Trailer_Left_Side", &paths.trailer_left_side),
    ] {
        builder = builder
            .add_model(name, file_uri(file)?)
            .add_weld(WORLD_FRAME, format!("{name}::{name}"));
    }

    builder = builder.add_model(ROOF_MODEL, file_uri(&paths.trailer_roof)?);
    if kind == SceneKind::Iris {
        builder = builder.add_weld(WORLD_FRAME, format!("{ROOF_MODEL}::{ROOF_MODEL}"));
    }

    builder = builder
        .add_model("Truck_Trailer_Back", file_uri(&paths.trailer_back)?)
        .add_weld(WORLD_FRAME, "Truck_Trailer_Back::Truck_Trailer_Back");

    let box_uri = file_uri(&paths.box_model)?;
    for i in 0..num_boxes {
        builder = builder.add_model(box_model_name(i), box_uri.clone());
    }

    if kind == SceneKind::Simulation {
        builder = builder.add_driver(ARM_MODEL, ModelDriver::ForceDriver {});
    }
    builder.build()
}

/// The arm alone, welded to the world; used for the controller plant.
pub fn robot_only_scene(paths: &ScenePaths, q_nominal: &[f64]) -> Result<Scene> {
    let positions = ARM_JOINTS
        .iter()
        .zip(q_nominal)
        .map(|(joint, q)| (joint.to_string(), *q));
    SceneBuilder::new()
        .add_model_with_positions(ARM_MODEL, file_uri(&paths.robot_arm)?, positions)
        .add_weld(WORLD_FRAME, format!("{ARM_MODEL}::base_link"))
        .build()
}

#[cfg(test)]
mod test {
    use super::*;

    const Q_NOMINAL: [f64; 6] = [0.0, -2.2, 2.2, 0.0, 1.57, 0.0];

    #[test]
    fn test_unloading_scene() {
        let scene =
            unloading_scene(&ScenePaths::default(), &Q_NOMINAL, 3, SceneKind::Simulation).unwrap();
        assert!(scene.has_model("Boxes/Box_2"));
        assert!(!scene.has_model("Boxes/Box_3"));
        assert!(!scene.is_welded(ROOF_MODEL));
        assert!(scene.is_welded("Truck_Trailer_Back"));
        assert_eq!(scene.model_drivers.len(), 1);

        let yaml = scene.to_yaml().unwrap();
        assert!(yaml.contains("add_model:"));
        assert!(yaml.contains("add_weld:"));
        assert!(yaml.contains("!ForceDriver"));
        assert!(yaml.contains("arm_a2:"));
    }

    #[test]
    fn test_iris_scene_welds_roof() {
        let scene = unloading_scene(&ScenePaths::default(), &Q_NOMINAL, 1, SceneKind::Iris).unwrap();
        assert!(scene.is_welded(ROOF_MODEL));
        assert!(scene.model_drivers.is_empty());
        assert!(!scene.to_yaml().unwrap().contains("ForceDriver"));
    }

    #[test]
    fn test_yaml_round_trip() {
        let scene =
            unloading_scene(&ScenePaths::default(), &Q_NOMINAL, 2, SceneKind::Simulation).unwrap();
        let yaml = scene.to_yaml().unwrap();
        assert_eq!(Scene::from_yaml(&yaml).unwrap(), scene);
    }

    #[test]
    fn test_duplicate_model() {
        let result = SceneBuilder::new()
            .add_model("a", "file:///a.sdf")
            .add_model("a", "file:///b.sdf")
            .build();
        assert!(matches!(result, Err(Error::Scene(_))));
    }

    #[test]
    fn test_dangling_weld() {
        let result = SceneBuilder::new()
            .add_model("a", "file:///a.sdf")
            .add_weld("world", "b::link")
            .build();
        assert!(matches!(result, Err(Error::Scene(_))));

        let result = SceneBuilder::new()
            .add_model("a", "file:///a.sdf")
            .add_weld("a", "a::link")
            .build();
        assert!(matches!(result, Err(Error::Scene(_))));
    }

    #[test]
    fn test_double_weld() {
        let result = SceneBuilder::new()
            .add_model("a", "file:///a.sdf")
            .add_weld("world", "a::link")
            .add_weld("world", "a::link")
            .build();
        assert!(matches!(result, Err(Error::Scene(_))));
    }

    #[test]
    fn test_bad_uri_and_driver() {
        let result = SceneBuilder::new().add_model("a", "a.sdf").build();
        assert!(matches!(result, Err(Error::Scene(_))));

        let result = SceneBuilder::new()
            .add_model("a", "file:///a.sdf")
            .add_driver("b", ModelDriver::ForceDriver {})
            .build();
        assert!(matches!(result, Err(Error::Scene(_))));
    }

    #[test]
    fn test_robot_only() {
        let scene = robot_only_scene(&ScenePaths::default(), &Q_NOMINAL).unwrap();
        assert_eq!(scene.model_names().collect::<Vec<_>>(), vec![ARM_MODEL]);
        assert!(scene.is_welded(ARM_MODEL));
    }
}
