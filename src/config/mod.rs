//! Run settings, loaded from YAML. Every field has a default, so a settings
//! file only needs the values it changes.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use nalgebra::Isometry3;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::checker::CheckerSettings;
use crate::physics::{EngineOptions, PhaseTimes};
use crate::planning::{CliqueCoverOptions, PostProcessOptions, PrmOptions, RoundOptions};
use crate::randomizer::PlacementBounds;
use crate::scene::{ScenePaths, TrailerGeometry, ARM_JOINTS};
use crate::{Error, Result};

/// Environment variable naming a settings file.
pub const CONFIG_ENV_VAR: &str = "UNLOAD_CONFIG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Translation of the robot base in the world frame.
    pub robot_pose: [f64; 3],
    pub q_nominal: Vec<f64>,
    pub num_boxes: usize,
    pub box_edge: f64,
    /// Drop boxes at random instead of loading the precomputed poses.
    pub randomize_boxes: bool,
    pub placement: PlacementBounds,
    pub phases: PhaseTimes,
    pub engine: EngineOptions,
    pub trailer: TrailerGeometry,
    pub paths: ScenePaths,
    pub checker: CheckerSettings,
    pub rounds: Vec<RoundOptions>,
    pub clique_cover: CliqueCoverOptions,
    pub postprocess: PostProcessOptions,
    /// Also inflate regions along a roadmap, written next to the other outputs.
    pub run_prm: bool,
    pub prm: PrmOptions,
    pub region_file: PathBuf,
    pub output_dir: PathBuf,
    /// Samples per region for the end-effector point clouds.
    pub visualization_samples: usize,
    pub visualization_seed: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            robot_pose: [0.0, 0.0, 0.58],
            q_nominal: vec![0.0, -2.2, 2.2, 0.0, 1.57, 0.0],
            num_boxes: 40,
            box_edge: 0.5,
            randomize_boxes: true,
            placement: PlacementBounds::default(),
            phases: PhaseTimes::default(),
            engine: EngineOptions::default(),
            trailer: TrailerGeometry::default(),
            paths: ScenePaths::default(),
            checker: CheckerSettings::default(),
            rounds: RoundOptions::default_rounds(),
            clique_cover: CliqueCoverOptions::default(),
            postprocess: PostProcessOptions::default(),
            run_prm: false,
            prm: PrmOptions::default(),
            region_file: "data/iris_source_regions.yaml".into(),
            output_dir: "out".into(),
            visualization_samples: 50_000,
            visualization_seed: 42,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        if self.q_nominal.len() != ARM_JOINTS.len() {
            return Err(Error::Config(format!(
                "q_nominal has {} entries, the arm has {} joints",
                self.q_nominal.len(),
                ARM_JOINTS.len()
            )));
        }
        if self.box_edge <= 0.0 {
            return Err(Error::Config(format!("box_edge must be positive, got {}", self.box_edge)));
        }
        for (name, value) in [
            ("checker.link_radius", self.checker.link_radius),
            ("checker.edge_step_size", self.checker.edge_step_size),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(Error::Config(format!("{name} must be positive and finite, got {value}")));
            }
        }
        for (axis, [lo, hi]) in [
            ("x", self.placement.x),
            ("y", self.placement.y),
            ("z", self.placement.z),
        ] {
            if lo >= hi {
                return Err(Error::Config(format!("empty placement range on {axis}: [{lo}, {hi})")));
            }
        }
        let phases = &self.phases;
        if !(phases.drop_end + phases.push_duration <= phases.settle_end && phases.settle_end <= phases.total) {
            return Err(Error::Config("phase times must satisfy drop + push <= settle <= total".into()));
        }
        if self.rounds.is_empty() {
            return Err(Error::Config("at least one generation round is required".into()));
        }
        if self.rounds[0].use_prior && !self.region_file.exists() {
            return Err(Error::Config(format!(
                "first round uses prior regions but {} does not exist",
                self.region_file.display()
            )));
        }
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let settings: Self = serde_yaml::from_str(yaml)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let settings = Self::from_yaml_str(&yaml)?;
        info!(path = %path.display(), "loaded settings");
        Ok(settings)
    }

    /// Settings from `path` when given, the defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_yaml_file(path),
            None => {
                let settings = Self::default();
                settings.validate()?;
                Ok(settings)
            }
        }
    }

    /// Reads the file named by `UNLOAD_CONFIG`, if set.
    pub fn from_env() -> Result<Self> {
        let path = env::var_os(CONFIG_ENV_VAR).map(PathBuf::from);
        Self::load(path.as_deref())
    }

    pub fn robot_pose(&self) -> Isometry3<f64> {
        let [x, y, z] = self.robot_pose;
        Isometry3::translation(x, y, z)
    }

    /// Engine options with the box edge taken from these settings.
    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            box_edge: self.box_edge,
            ..self.engine.clone()
        }
    }

    pub fn prm_region_file(&self) -> PathBuf {
        self.output_dir.join("iris_regions_prm.yaml")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        settings.validate().unwrap();
        assert_eq!(settings.num_boxes, 40);
        assert_eq!(settings.rounds.len(), 2);
        assert_eq!(settings.rounds[0].minimum_clique_size, 18);
        assert!(settings.rounds[1].use_prior);
        assert_eq!(settings.robot_pose().translation.vector.z, 0.58);
        assert_eq!(settings.engine_options().box_edge, 0.5);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let settings = Settings::from_yaml_str(
            "num_boxes: 12\nbox_edge: 0.4\nclique_cover:\n  iteration_limit: 5\nphases:\n  drop_end: 1.0\n",
        )
        .unwrap();
        assert_eq!(settings.num_boxes, 12);
        assert_eq!(settings.engine_options().box_edge, 0.4);
        assert_eq!(settings.clique_cover.iteration_limit, 5);
        assert_eq!(settings.clique_cover.minimum_clique_size, 7);
        assert_eq!(settings.phases.drop_end, 1.0);
        assert_eq!(settings.phases.push_duration, 1.0);
        assert_eq!(settings.q_nominal, Settings::default().q_nominal);
    }

    #[test]
    fn test_rounds_from_yaml() {
        let settings = Settings::from_yaml_str(
            "rounds:\n  - minimum_clique_size: 9\n    coverage_threshold: 0.2\n",
        )
        .unwrap();
        assert_eq!(settings.rounds.len(), 1);
        assert_eq!(settings.rounds[0].minimum_clique_size, 9);
        assert!(!settings.rounds[0].use_prior);
    }

    #[test]
    fn test_invalid_settings() {
        for yaml in [
            "q_nominal: [0.0, 1.0]",
            "box_edge: 0.0",
            "placement:\n  x: [1.0, 1.0]\n  y: [0.0, 1.0]\n  z: [0.0, 1.0]",
            "phases:\n  settle_end: 0.5",
            "rounds: []",
            "checker:\n  link_radius: 0.0",
            "checker:\n  link_radius: .nan",
            "checker:\n  edge_step_size: 0.0",
            "checker:\n  edge_step_size: -0.1",
        ] {
            assert!(
                matches!(Settings::from_yaml_str(yaml), Err(Error::Config(_))),
                "{yaml}"
            );
        }
        assert!(matches!(Settings::from_yaml_str("num_boxes: many"), Err(Error::Yaml(_))));
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.yaml");
        let mut settings = Settings::default();
        settings.num_boxes = 3;
        settings.output_dir = dir.path().join("out");
        fs::write(&path, serde_yaml::to_string(&settings).unwrap()).unwrap();

        assert_eq!(Settings::load(Some(&path)).unwrap(), settings);
        assert_eq!(Settings::load(None).unwrap(), Settings::default());
        assert!(matches!(
            Settings::from_yaml_file(dir.path().join("missing.yaml")),
            Err(Error::Io { .. })
        ));
    }
}
