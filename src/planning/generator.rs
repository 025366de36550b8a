//! Clique-cover driven region generation.
//!
//! Each iteration samples uncovered collision-free configurations, joins the
//! mutually visible ones into cliques and grows one region per clique, with
//! the regions found so far (slightly shrunk) acting as obstacles. The loop
//! ends once the sampled coverage reaches the threshold or the iteration
//! budget runs out.

use std::path::Path;

use nalgebra::DVector;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::coverage::estimate_coverage;
use super::grower::{GrowOptions, RegionGrower};
use super::visibility::{greedy_clique_cover, VisibilityGraph};
use crate::checker::CollisionChecker;
use crate::polytope::HPolyhedron;
use crate::region_file::RegionCollection;
use crate::{Error, Result};

/// Draw budget per requested sample when looking for uncovered configurations.
const MAX_DRAWS_PER_SAMPLE: usize = 100;

/// Label prefix of persisted regions, `set0`, `set1`, ...
pub const REGION_LABEL_PREFIX: &str = "set";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliqueCoverOptions {
    /// Smallest clique a region is grown from. Seven points are the minimum
    /// for a region with volume in six dimensions.
    pub minimum_clique_size: usize,
    pub coverage_termination_threshold: f64,
    pub num_points_per_visibility_round: usize,
    pub num_points_per_coverage_check: usize,
    pub iteration_limit: usize,
    pub random_seed: u64,
    /// Earlier regions are shrunk by this factor before they become obstacles.
    pub obstacle_shrink_factor: f64,
    /// Worker count for engines that grow regions in parallel. Only logged here.
    pub num_builders: usize,
    pub grow_options: GrowOptions,
}

impl Default for CliqueCoverOptions {
    fn default() -> Self {
        Self {
            minimum_clique_size: 7,
            coverage_termination_threshold: 0.35,
            num_points_per_visibility_round: 250,
            num_points_per_coverage_check: 1000,
            iteration_limit: 100,
            random_seed: 0,
            obstacle_shrink_factor: 0.95,
            num_builders: 7,
            grow_options: GrowOptions::default(),
        }
    }
}

/// Per-round overrides of the clique cover options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundOptions {
    pub minimum_clique_size: usize,
    pub coverage_threshold: f64,
    /// Start from the regions saved by the previous round.
    #[serde(default)]
    pub use_prior: bool,
}

impl RoundOptions {
    /// The coarse round from scratch and the finer round seeded with its output.
    pub fn default_rounds() -> Vec<RoundOptions> {
        vec![
            RoundOptions {
                minimum_clique_size: 18,
                coverage_threshold: 0.35,
                use_prior: false,
            },
            RoundOptions {
                minimum_clique_size: 12,
                coverage_threshold: 0.6,
                use_prior: true,
            },
        ]
    }

    pub fn apply(&self, options: &mut CliqueCoverOptions) {
        options.minimum_clique_size = self.minimum_clique_size;
        options.coverage_termination_threshold = self.coverage_threshold;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoundReport {
    pub iterations: usize,
    /// Last coverage estimate.
    pub coverage: f64,
    pub num_regions: usize,
    pub new_regions: usize,
}

pub struct RegionGenerator<C, G> {
    checker: C,
    grower: G,
    domain: HPolyhedron,
    options: CliqueCoverOptions,
}

impl<C, G> RegionGenerator<C, G>
where
    C: CollisionChecker,
    G: RegionGrower,
{
    pub fn new(checker: C, grower: G, domain: HPolyhedron, options: CliqueCoverOptions) -> Self {
        Self {
            checker,
            grower,
            domain,
            options,
        }
    }

    pub fn options(&self) -> &CliqueCoverOptions {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut CliqueCoverOptions {
        &mut self.options
    }

    pub fn checker(&self) -> &C {
        &self.checker
    }

    pub fn domain(&self) -> &HPolyhedron {
        &self.domain
    }

    /// Loads the prior regions when `prior_file` is given, runs the clique
    /// cover and replaces `output_file` with every region, relabelled.
    pub fn run_round(
        &mut self,
        prior_file: Option<&Path>,
        output_file: &Path,
    ) -> Result<(RegionCollection, RoundReport)> {
        let prior = match prior_file {
            Some(path) => {
                info!(path = %path.display(), "using saved regions");
                RegionCollection::load(path)?.into_regions()
            }
            None => vec![],
        };
        let (regions, report) = self.generate(prior)?;
        let collection = RegionCollection::from_regions(REGION_LABEL_PREFIX, regions);
        collection.save(output_file)?;
        Ok((collection, report))
    }

    /// Extends `prior` until the coverage threshold or the iteration limit is reached.
    pub fn generate(&mut self, prior: Vec<HPolyhedron>) -> Result<(Vec<HPolyhedron>, RoundReport)> {
        for region in &prior {
            if region.ambient_dimension() != self.domain.ambient_dimension() {
                return Err(Error::DimensionMismatch {
                    expected: self.domain.ambient_dimension(),
                    actual: region.ambient_dimension(),
                });
            }
        }
        let options = self.options.clone();
        let bounds = self.domain.bounding_box()?;
        let mut rng = ChaCha8Rng::seed_from_u64(options.random_seed);
        let mut regions = prior;
        let prior_count = regions.len();
        let mut iterations = 0;

        info!(
            prior = prior_count,
            threshold = options.coverage_termination_threshold,
            minimum_clique_size = options.minimum_clique_size,
            num_builders = options.num_builders,
            "starting clique cover"
        );

        let coverage = loop {
            let coverage = estimate_coverage(
                &regions,
                &self.checker,
                &self.domain,
                options.num_points_per_coverage_check,
                options.random_seed,
            )?;
            info!(iteration = iterations, coverage, regions = regions.len(), "coverage");
            if coverage >= options.coverage_termination_threshold {
                break coverage;
            }
            if iterations >= options.iteration_limit {
                warn!(iterations, coverage, "iteration limit reached before the coverage threshold");
                break coverage;
            }
            iterations += 1;

            let samples = self.sample_uncovered(&regions, &bounds, &options, &mut rng);
            if samples.len() < options.minimum_clique_size {
                debug!(samples = samples.len(), "too few uncovered samples for a clique");
                continue;
            }
            let visibility = VisibilityGraph::build(samples, &self.checker);
            let cliques = greedy_clique_cover(&visibility.graph, options.minimum_clique_size);
            debug!(
                edges = visibility.num_edges(),
                cliques = cliques.len(),
                "visibility graph"
            );

            let obstacles = regions
                .iter()
                .map(|region| region.shrink(options.obstacle_shrink_factor))
                .collect::<Result<Vec<_>>>()?;
            self.checker.set_obstacles(obstacles);
            let grown = self.grow_cliques(&visibility, &cliques, &options.grow_options);
            self.checker.set_obstacles(vec![]);
            let grown = grown?;
            info!(iteration = iterations, grown = grown.len(), "grew regions");
            regions.extend(grown);
        };

        let report = RoundReport {
            iterations,
            coverage,
            num_regions: regions.len(),
            new_regions: regions.len() - prior_count,
        };
        Ok((regions, report))
    }

    fn grow_cliques(
        &self,
        visibility: &VisibilityGraph,
        cliques: &[Vec<usize>],
        grow_options: &GrowOptions,
    ) -> Result<Vec<HPolyhedron>> {
        let mut grown = Vec::with_capacity(cliques.len());
        for (index, clique) in cliques.iter().enumerate() {
            let points = visibility.clique_points(clique);
            match self
                .grower
                .grow_region(&self.checker, &points, &self.domain, grow_options)
            {
                Ok(region) => {
                    if grow_options.containment_required
                        && !points.iter().all(|p| region.contains(p, 1e-6))
                    {
                        warn!(clique = index, "grown region lost clique points, dropping it");
                        continue;
                    }
                    debug!(clique = index, size = clique.len(), faces = region.num_faces(), "grew region");
                    grown.push(region);
                }
                Err(Error::SeedInCollision) => {
                    warn!(clique = index, "clique centroid is in collision, dropping clique");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(grown)
    }

    /// Collision-free configurations outside every region, drawn uniformly
    /// from the domain's bounding box.
    fn sample_uncovered(
        &self,
        regions: &[HPolyhedron],
        (lower, upper): &(DVector<f64>, DVector<f64>),
        options: &CliqueCoverOptions,
        rng: &mut ChaCha8Rng,
    ) -> Vec<DVector<f64>> {
        let wanted = options.num_points_per_visibility_round;
        let mut samples = Vec::with_capacity(wanted);
        for _ in 0..wanted * MAX_DRAWS_PER_SAMPLE {
            if samples.len() == wanted {
                break;
            }
            let q = DVector::from_fn(lower.len(), |i, _| {
                if upper[i] > lower[i] {
                    rng.gen_range(lower[i]..upper[i])
                } else {
                    lower[i]
                }
            });
            if self.domain.contains(&q, 1e-9)
                && !regions.iter().any(|region| region.contains(&q, 1e-9))
                && self.checker.is_collision_free(&q)
            {
                samples.push(q);
            }
        }
        samples
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::checker::FnChecker;
    use crate::planning::grower::SampledInflation;

    fn disc_checker() -> FnChecker<impl Fn(&DVector<f64>) -> bool> {
        FnChecker::new(|q: &DVector<f64>| q.norm() > 0.3)
    }

    fn square() -> HPolyhedron {
        HPolyhedron::make_box(&DVector::from_element(2, -1.0), &DVector::from_element(2, 1.0)).unwrap()
    }

    fn small_options() -> CliqueCoverOptions {
        CliqueCoverOptions {
            minimum_clique_size: 3,
            coverage_termination_threshold: 0.5,
            num_points_per_visibility_round: 30,
            num_points_per_coverage_check: 300,
            iteration_limit: 20,
            grow_options: GrowOptions {
                num_particles: 60,
                max_iterations: 5,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_zero_threshold_stops_immediately() {
        let options = CliqueCoverOptions {
            coverage_termination_threshold: 0.0,
            ..small_options()
        };
        let mut generator = RegionGenerator::new(disc_checker(), SampledInflation, square(), options);
        let (regions, report) = generator.generate(vec![]).unwrap();
        assert!(regions.is_empty());
        assert_eq!(report.iterations, 0);
        assert_eq!(report.coverage, 0.0);
    }

    #[test]
    fn test_reaches_threshold() {
        let mut generator =
            RegionGenerator::new(disc_checker(), SampledInflation, square(), small_options());
        let (regions, report) = generator.generate(vec![]).unwrap();
        assert!(!regions.is_empty());
        assert!(report.coverage >= 0.5 || report.iterations == 20);
        assert_eq!(report.new_regions, regions.len());
        // obstacles are cleared after every growth step
        assert!(generator.checker().obstacles().is_empty());
    }

    #[test]
    fn test_prior_regions_are_kept() {
        let prior = HPolyhedron::make_box(
            &DVector::from_column_slice(&[0.5, -1.0]),
            &DVector::from_column_slice(&[1.0, 1.0]),
        )
        .unwrap();
        let mut generator =
            RegionGenerator::new(disc_checker(), SampledInflation, square(), small_options());
        let (regions, report) = generator.generate(vec![prior.clone()]).unwrap();
        assert_eq!(regions[0], prior);
        assert_eq!(report.num_regions, report.new_regions + 1);
    }

    #[test]
    fn test_prior_dimension_mismatch() {
        let mut generator =
            RegionGenerator::new(disc_checker(), SampledInflation, square(), small_options());
        let prior = HPolyhedron::make_box(&DVector::zeros(3), &DVector::from_element(3, 1.0)).unwrap();
        assert!(matches!(
            generator.generate(vec![prior]),
            Err(Error::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_two_rounds_through_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("regions.yaml");

        let mut generator =
            RegionGenerator::new(disc_checker(), SampledInflation, square(), small_options());
        let (first, _) = generator.run_round(None, &path).unwrap();
        assert!(first.get("set0").is_some());

        RoundOptions {
            minimum_clique_size: 3,
            coverage_threshold: 0.7,
            use_prior: true,
        }
        .apply(generator.options_mut());
        let (second, report) = generator.run_round(Some(&path), &path).unwrap();
        assert!(second.len() >= first.len());
        assert_eq!(report.num_regions, second.len());
        assert_eq!(RegionCollection::load(&path).unwrap(), second);
    }

    #[test]
    fn test_missing_prior_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut generator =
            RegionGenerator::new(disc_checker(), SampledInflation, square(), small_options());
        let result = generator.run_round(Some(&dir.path().join("nope.yaml")), &dir.path().join("out.yaml"));
        assert!(matches!(result, Err(Error::Io { .. })));
    }

    #[test]
    fn test_default_rounds() {
        let rounds = RoundOptions::default_rounds();
        assert_eq!(rounds[0].minimum_clique_size, 18);
        assert!(!rounds[0].use_prior);
        assert_eq!(rounds[1].coverage_threshold, 0.6);
        let mut options = CliqueCoverOptions::default();
        rounds[1].apply(&mut options);
        assert_eq!(options.minimum_clique_size, 12);
    }
}
