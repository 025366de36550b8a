use nalgebra::{DMatrix, DVector};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::checker::CollisionChecker;
use crate::polytope::HPolyhedron;
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrowOptions {
    pub max_iterations: usize,
    /// Samples drawn in the current region per iteration.
    pub num_particles: usize,
    /// Bisection steps between the seed and a colliding particle.
    pub bisection_steps: usize,
    /// Keep every clique point inside the grown region.
    pub containment_required: bool,
    pub random_seed: u64,
    /// Margin added when a face is relaxed to keep clique points inside.
    pub face_tolerance: f64,
}

impl Default for GrowOptions {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            num_particles: 200,
            bisection_steps: 10,
            containment_required: true,
            random_seed: 0,
            face_tolerance: 1e-6,
        }
    }
}

pub trait RegionGrower {
    /// Grows one convex collision-free region inside `domain` around `clique`.
    fn grow_region(
        &self,
        checker: &dyn CollisionChecker,
        clique: &[DVector<f64>],
        domain: &HPolyhedron,
        options: &GrowOptions,
    ) -> Result<HPolyhedron>;
}

/// Sampling-based inflation: separating half-spaces are placed at boundary
/// points found by bisecting from the clique centroid toward colliding
/// samples.
#[derive(Debug, Clone, Default)]
pub struct SampledInflation;

impl SampledInflation {
    pub fn new() -> Self {
        Self
    }
}

/// Steps of hit-and-run between consecutive particles.
const MIXING_STEPS: usize = 3;

impl RegionGrower for SampledInflation {
    fn grow_region(
        &self,
        checker: &dyn CollisionChecker,
        clique: &[DVector<f64>],
        domain: &HPolyhedron,
        options: &GrowOptions,
    ) -> Result<HPolyhedron> {
        let Some(first) = clique.first() else {
            return Err(Error::EmptyClique);
        };
        let dim = domain.ambient_dimension();
        if let Some(point) = clique.iter().find(|p| p.len() != dim) {
            return Err(Error::DimensionMismatch {
                expected: dim,
                actual: point.len(),
            });
        }
        let mut centroid = first.clone();
        for point in &clique[1..] {
            centroid += point;
        }
        centroid /= clique.len() as f64;
        if !checker.is_collision_free(&centroid) {
            return Err(Error::SeedInCollision);
        }

        let mut rng = ChaCha8Rng::seed_from_u64(options.random_seed);
        let mut faces: Vec<(DVector<f64>, f64)> = vec![];
        let mut region = domain.clone();

        for iteration in 0..options.max_iterations {
            let mut particles = Vec::with_capacity(options.num_particles);
            let mut last = centroid.clone();
            for _ in 0..options.num_particles {
                last = region.uniform_sample(&mut rng, &last, MIXING_STEPS)?;
                particles.push(last.clone());
            }

            let mut colliding: Vec<(f64, DVector<f64>)> = particles
                .into_iter()
                .filter(|p| !checker.is_collision_free(p))
                .map(|p| ((&p - &centroid).norm(), p))
                .collect();
            if colliding.is_empty() {
                trace!(iteration, "no colliding particles");
                break;
            }
            colliding.sort_by(|a, b| a.0.total_cmp(&b.0));

            let mut added = 0;
            let mut dropped = 0;
            let first_new = faces.len();
            for (_, particle) in &colliding {
                let excluded = faces[first_new..]
                    .iter()
                    .any(|(normal, b)| normal.dot(particle) > *b);
                if excluded {
                    continue;
                }

                let boundary = bisect(checker, &centroid, particle, options.bisection_steps);
                let direction = &boundary - &centroid;
                let norm = direction.norm();
                if norm <= f64::EPSILON {
                    dropped += 1;
                    continue;
                }
                let normal = direction / norm;
                let mut offset = normal.dot(&boundary);
                if options.containment_required {
                    let widest = clique
                        .iter()
                        .map(|p| normal.dot(p))
                        .fold(f64::NEG_INFINITY, f64::max);
                    if widest > offset {
                        offset = widest + options.face_tolerance;
                    }
                }
                // relaxed past the particle, the face would cut nothing
                if normal.dot(particle) <= offset {
                    dropped += 1;
                    continue;
                }
                faces.push((normal, offset));
                added += 1;
            }
            debug!(
                iteration,
                colliding = colliding.len(),
                added,
                dropped,
                "inflation step"
            );
            if added == 0 {
                break;
            }
            region = with_faces(domain, &faces)?;
        }

        if faces.is_empty() {
            return Ok(region);
        }
        region.remove_redundant(1e-9)
    }
}

/// Last colliding point found between a free `seed` and a colliding `target`.
fn bisect(
    checker: &dyn CollisionChecker,
    seed: &DVector<f64>,
    target: &DVector<f64>,
    steps: usize,
) -> DVector<f64> {
    let mut free = 0.0;
    let mut blocked = 1.0;
    for _ in 0..steps {
        let mid = 0.5 * (free + blocked);
        if checker.is_collision_free(&seed.lerp(target, mid)) {
            free = mid;
        } else {
            blocked = mid;
        }
    }
    seed.lerp(target, blocked)
}

fn with_faces(domain: &HPolyhedron, faces: &[(DVector<f64>, f64)]) -> Result<HPolyhedron> {
    let dim = domain.ambient_dimension();
    let mut a = DMatrix::zeros(faces.len(), dim);
    let mut b = DVector::zeros(faces.len());
    for (i, (normal, offset)) in faces.iter().enumerate() {
        a.row_mut(i).copy_from(&normal.transpose());
        b[i] = *offset;
    }
    domain.intersection(&HPolyhedron::new(a, b)?)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::checker::FnChecker;

    fn square() -> HPolyhedron {
        HPolyhedron::make_box(&DVector::from_element(2, -1.0), &DVector::from_element(2, 1.0)).unwrap()
    }

    fn point(x: f64, y: f64) -> DVector<f64> {
        DVector::from_column_slice(&[x, y])
    }

    #[test]
    fn test_free_space_returns_domain() {
        let checker = FnChecker::new(|_: &DVector<f64>| true);
        let clique = vec![point(0.0, 0.0), point(0.1, 0.1)];
        let region = SampledInflation
            .grow_region(&checker, &clique, &square(), &GrowOptions::default())
            .unwrap();
        assert_eq!(region, square());
    }

    #[test]
    fn test_wall_is_cut_away() {
        let checker = FnChecker::new(|q: &DVector<f64>| q[0] < 0.5);
        let clique = vec![point(-0.5, 0.0), point(-0.4, 0.2), point(-0.6, -0.2)];
        let region = SampledInflation
            .grow_region(&checker, &clique, &square(), &GrowOptions::default())
            .unwrap();
        for p in &clique {
            assert!(region.contains(p, 0.0));
        }
        assert!(!region.contains(&point(0.9, 0.0), 0.0));
        assert!(!region.contains(&point(0.9, 0.5), 0.0));
        // the free side stays covered
        assert!(region.contains(&point(-0.9, 0.0), 0.0));
    }

    #[test]
    fn test_containment_relaxes_faces() {
        // obstacle between two clique points: containment wins
        let checker = FnChecker::new(|q: &DVector<f64>| (q - point(0.0, 0.3)).norm() > 0.1);
        let clique = vec![point(0.0, 0.0), point(0.0, 0.5), point(0.1, -0.2)];
        let options = GrowOptions::default();
        let region = SampledInflation
            .grow_region(&checker, &clique, &square(), &options)
            .unwrap();
        for p in &clique {
            assert!(region.contains(p, 0.0));
        }
    }

    #[test]
    fn test_errors() {
        let checker = FnChecker::new(|q: &DVector<f64>| q[0] < 0.5);
        let options = GrowOptions::default();
        assert!(matches!(
            SampledInflation.grow_region(&checker, &[], &square(), &options),
            Err(Error::EmptyClique)
        ));
        assert!(matches!(
            SampledInflation.grow_region(&checker, &[DVector::zeros(3)], &square(), &options),
            Err(Error::DimensionMismatch {
                expected: 2,
                actual: 3
            })
        ));
        assert!(matches!(
            SampledInflation.grow_region(&checker, &[point(0.8, 0.0)], &square(), &options),
            Err(Error::SeedInCollision)
        ));
    }

    #[test]
    fn test_deterministic() {
        let checker = FnChecker::new(|q: &DVector<f64>| q.norm() < 0.7);
        let clique = vec![point(0.0, 0.0), point(0.1, 0.0)];
        let options = GrowOptions::default();
        let a = SampledInflation
            .grow_region(&checker, &clique, &square(), &options)
            .unwrap();
        let b = SampledInflation
            .grow_region(&checker, &clique, &square(), &options)
            .unwrap();
        assert_eq!(a, b);
    }
}
