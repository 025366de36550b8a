//! Region collections and their YAML file format.
//!
//! ```yaml
//! set0:
//!   A: [[1.0, 0.0], [-1.0, 0.0]]
//!   b: [1.0, 0.0]
//!   dim: 2
//! ```
//!
//! `dim` may be left out when `A` has at least one row.
//! Files are always read and written whole.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::polytope::HPolyhedron;
use crate::{Error, Result};

#[derive(Debug, Serialize, Deserialize)]
struct RegionRecord {
    #[serde(rename = "A")]
    a: Vec<Vec<f64>>,
    b: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dim: Option<usize>,
}

/// Regions keyed by unique label.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegionCollection {
    regions: BTreeMap<String, HPolyhedron>,
}

impl RegionCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Labels regions `{prefix}0`, `{prefix}1`, ... in order.
    pub fn from_regions(prefix: &str, regions: impl IntoIterator<Item = HPolyhedron>) -> Self {
        let regions = regions
            .into_iter()
            .enumerate()
            .map(|(i, region)| (format!("{prefix}{i}"), region))
            .collect();
        Self { regions }
    }

    /// Replaces any region already stored under `label`.
    pub fn insert(&mut self, label: impl Into<String>, region: HPolyhedron) -> Option<HPolyhedron> {
        self.regions.insert(label.into(), region)
    }

    pub fn get(&self, label: &str) -> Option<&HPolyhedron> {
        self.regions.get(label)
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.regions.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &HPolyhedron)> {
        self.regions.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn regions(&self) -> impl Iterator<Item = &HPolyhedron> {
        self.regions.values()
    }

    pub fn into_regions(self) -> Vec<HPolyhedron> {
        self.regions.into_values().collect()
    }

    /// True when `q` lies in at least one region.
    pub fn contains(&self, q: &DVector<f64>, tol: f64) -> bool {
        self.regions.values().any(|r| r.contains(q, tol))
    }

    pub fn to_yaml(&self) -> Result<String> {
        let records: BTreeMap<&str, RegionRecord> = self
            .regions
            .iter()
            .map(|(label, region)| {
                (
                    label.as_str(),
                    RegionRecord {
                        a: region.rows(),
                        b: region.b().iter().copied().collect(),
                        dim: Some(region.ambient_dimension()),
                    },
                )
            })
            .collect();
        Ok(serde_yaml::to_string(&records)?)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let records: BTreeMap<String, RegionRecord> = serde_yaml::from_str(yaml)?;
        let mut regions = BTreeMap::new();
        for (label, record) in records {
            let dim = match (record.dim, record.a.first()) {
                (Some(dim), _) => dim,
                (None, Some(row)) => row.len(),
                (None, None) => {
                    return Err(Error::RegionFile(format!("{label} has no faces and no dim")));
                }
            };
            regions.insert(label, HPolyhedron::from_rows(&record.a, &record.b, dim)?);
        }
        Ok(Self { regions })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let collection = Self::from_yaml(&yaml)?;
        info!(path = %path.display(), regions = collection.len(), "loaded regions");
        Ok(collection)
    }

    /// Writes the whole collection, replacing the file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
            }
        }
        fs::write(path, self.to_yaml()?).map_err(|e| Error::io(path, e))?;
        debug!(path = %path.display(), regions = self.len(), "saved regions");
        Ok(())
    }
}

impl FromIterator<(String, HPolyhedron)> for RegionCollection {
    fn from_iter<I: IntoIterator<Item = (String, HPolyhedron)>>(iter: I) -> Self {
        Self {
            regions: iter.into_iter().collect(),
        }
    }
}
