//! Diagnostic simplification of weakly connected regions.
//!
//! The output is a separate collection. Saved region files are never
//! replaced by simplified copies.

use std::collections::BTreeMap;

use petgraph::graph::{NodeIndex, UnGraph};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::polytope::{HPolyhedron, SimplifyOptions};
use crate::region_file::RegionCollection;
use crate::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostProcessOptions {
    /// Neighbours with fewer intersections than this fraction of the average
    /// count as fragile.
    pub edge_count_ratio: f64,
    pub simplify: SimplifyOptions,
}

impl Default for PostProcessOptions {
    fn default() -> Self {
        Self {
            edge_count_ratio: 0.5,
            simplify: SimplifyOptions::default(),
        }
    }
}

/// Regions joined when they share an interior point.
#[derive(Debug, Clone)]
pub struct IntersectionGraph {
    pub graph: UnGraph<String, ()>,
    nodes: BTreeMap<String, NodeIndex>,
}

impl IntersectionGraph {
    pub fn degree(&self, label: &str) -> Option<usize> {
        self.nodes
            .get(label)
            .map(|&node| self.graph.neighbors(node).count())
    }

    /// Degree of every region, by label.
    pub fn degrees(&self) -> BTreeMap<String, usize> {
        self.nodes
            .iter()
            .map(|(label, &node)| (label.clone(), self.graph.neighbors(node).count()))
            .collect()
    }

    pub fn neighbors(&self, label: &str) -> Vec<&str> {
        let Some(&node) = self.nodes.get(label) else {
            return vec![];
        };
        let mut labels: Vec<&str> = self
            .graph
            .neighbors(node)
            .map(|n| self.graph[n].as_str())
            .collect();
        labels.sort_unstable();
        labels
    }

    pub fn average_degree(&self) -> f64 {
        if self.nodes.is_empty() {
            return 0.0;
        }
        2.0 * self.graph.edge_count() as f64 / self.nodes.len() as f64
    }

    pub fn num_intersections(&self) -> usize {
        self.graph.edge_count()
    }
}

pub fn pairwise_intersections(collection: &RegionCollection) -> Result<IntersectionGraph> {
    let mut graph = UnGraph::new_undirected();
    let mut nodes = BTreeMap::new();
    let entries: Vec<(&str, &HPolyhedron)> = collection.iter().collect();
    for (label, _) in &entries {
        nodes.insert(label.to_string(), graph.add_node(label.to_string()));
    }
    for (i, (label_i, region_i)) in entries.iter().enumerate() {
        for (label_j, region_j) in &entries[i + 1..] {
            if region_i.intersects(region_j)? {
                graph.add_edge(nodes[*label_i], nodes[*label_j], ());
            }
        }
    }
    debug!(
        regions = entries.len(),
        intersections = graph.edge_count(),
        "intersection graph"
    );
    Ok(IntersectionGraph { graph, nodes })
}

/// Reduces the face count of every region that touches a fragile neighbour
/// while keeping it intersecting those neighbours. Other regions are copied.
pub fn simplify_low_connectivity(
    collection: &RegionCollection,
    options: &PostProcessOptions,
) -> Result<RegionCollection> {
    let intersections = pairwise_intersections(collection)?;
    let degrees = intersections.degrees();
    let threshold = options.edge_count_ratio * intersections.average_degree();

    let mut simplified = RegionCollection::new();
    let mut changed = 0;
    for (label, region) in collection.iter() {
        let fragile: Vec<HPolyhedron> = intersections
            .neighbors(label)
            .into_iter()
            .filter(|n| (degrees[*n] as f64) < threshold)
            .filter_map(|n| collection.get(n).cloned())
            .collect();
        if fragile.is_empty() {
            simplified.insert(label, region.clone());
            continue;
        }
        let reduced = region.simplify(&options.simplify, &fragile)?;
        debug!(
            label,
            fragile = fragile.len(),
            faces = region.num_faces(),
            reduced = reduced.num_faces(),
            "simplified"
        );
        simplified.insert(label, reduced);
        changed += 1;
    }
    info!(
        regions = collection.len(),
        simplified = changed,
        threshold,
        "post-processing done"
    );
    Ok(simplified)
}
