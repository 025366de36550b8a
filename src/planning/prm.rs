//! Probabilistic roadmap and region inflation along its edges.

use std::collections::BTreeSet;
use std::f64::consts::FRAC_PI_4;

use nalgebra::DVector;
use petgraph::graph::{NodeIndex, UnGraph};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::coverage::estimate_coverage;
use super::grower::{GrowOptions, RegionGrower};
use crate::checker::CollisionChecker;
use crate::polytope::HPolyhedron;
use crate::region_file::RegionCollection;
use crate::{Error, Result};

/// Colliding draws tolerated per roadmap vertex before sampling gives up.
const MAX_REJECTIONS: usize = 1000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrmOptions {
    pub num_samples: usize,
    /// Largest joint-space distance between connected vertices, in radians.
    pub radius: f64,
    pub coverage_threshold: f64,
    pub num_points_per_coverage_check: usize,
    pub random_seed: u64,
    pub grow_options: GrowOptions,
}

impl Default for PrmOptions {
    fn default() -> Self {
        Self {
            num_samples: 1000,
            radius: FRAC_PI_4,
            coverage_threshold: 0.35,
            num_points_per_coverage_check: 500,
            random_seed: 1234,
            grow_options: GrowOptions::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Prm {
    pub points: Vec<DVector<f64>>,
    pub graph: UnGraph<usize, ()>,
}

impl Prm {
    /// Samples collision-free vertices by hit-and-run inside `domain` and
    /// joins pairs closer than the radius whose segment is free.
    pub fn build(
        checker: &dyn CollisionChecker,
        domain: &HPolyhedron,
        options: &PrmOptions,
    ) -> Result<Prm> {
        let mut rng = ChaCha8Rng::seed_from_u64(options.random_seed);
        let mut points = Vec::with_capacity(options.num_samples);
        let mut last = domain.chebyshev_center()?;
        'vertices: while points.len() < options.num_samples {
            let mut rejections = 0;
            loop {
                last = domain.uniform_sample(&mut rng, &last, 1)?;
                if checker.is_collision_free(&last) {
                    points.push(last.clone());
                    continue 'vertices;
                }
                rejections += 1;
                if rejections >= MAX_REJECTIONS {
                    warn!(
                        sampled = points.len(),
                        wanted = options.num_samples,
                        "no collision-free sample found, roadmap is short"
                    );
                    break 'vertices;
                }
            }
        }

        let mut graph = UnGraph::with_capacity(points.len(), 0);
        let nodes: Vec<NodeIndex> = (0..points.len()).map(|i| graph.add_node(i)).collect();
        for i in 0..points.len() {
            for j in (i + 1)..points.len() {
                if (&points[i] - &points[j]).norm() <= options.radius
                    && checker.is_edge_collision_free(&points[i], &points[j])
                {
                    graph.add_edge(nodes[i], nodes[j], ());
                }
            }
        }
        info!(vertices = points.len(), edges = graph.edge_count(), "roadmap built");
        Ok(Prm { points, graph })
    }

    pub fn num_vertices(&self) -> usize {
        self.points.len()
    }

    pub fn num_edges(&self) -> usize {
        self.graph.edge_count()
    }

    /// Neighbour indices of vertex `i`, ascending.
    pub fn neighbors(&self, i: usize) -> BTreeSet<usize> {
        self.graph
            .neighbors(NodeIndex::new(i))
            .map(|n| self.graph[n])
            .collect()
    }
}

/// Walks the roadmap from vertex 0 along unused edges and grows a region
/// from each traversed edge whose endpoints are both uncovered. A vertex
/// without unused edges hands over to the next index. Stops at the coverage
/// threshold or after the last vertex.
pub fn inflate_along_roadmap(
    prm: &Prm,
    checker: &dyn CollisionChecker,
    grower: &dyn RegionGrower,
    domain: &HPolyhedron,
    options: &PrmOptions,
) -> Result<RegionCollection> {
    let mut unused: Vec<BTreeSet<usize>> = (0..prm.num_vertices()).map(|i| prm.neighbors(i)).collect();
    let mut collection = RegionCollection::new();
    let mut regions: Vec<HPolyhedron> = vec![];
    let mut coverage = 0.0;
    let mut current = 0;

    while coverage < options.coverage_threshold {
        if current >= prm.num_vertices() {
            info!(coverage, regions = regions.len(), "roadmap exhausted");
            break;
        }
        let Some(next) = unused[current].pop_first() else {
            current += 1;
            continue;
        };
        unused[next].remove(&current);

        let (p, q) = (&prm.points[current], &prm.points[next]);
        let covered = regions
            .iter()
            .any(|region| region.contains(p, 1e-9) || region.contains(q, 1e-9));
        if !covered {
            let clique = [p.clone(), q.clone()];
            match grower.grow_region(checker, &clique, domain, &options.grow_options) {
                Ok(region) => {
                    debug!(from = current, to = next, faces = region.num_faces(), "grew region");
                    collection.insert(format!("{current},{next}"), region.clone());
                    regions.push(region);
                    coverage = estimate_coverage(
                        &regions,
                        checker,
                        domain,
                        options.num_points_per_coverage_check,
                        options.random_seed,
                    )?;
                    info!(regions = regions.len(), coverage, "coverage");
                }
                Err(Error::SeedInCollision) => {
                    warn!(from = current, to = next, "edge midpoint is in collision, skipping");
                }
                Err(e) => return Err(e),
            }
        }
        current = next;
    }
    Ok(collection)
}
