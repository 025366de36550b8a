use nalgebra::DVector;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::checker::CollisionChecker;
use crate::polytope::HPolyhedron;
use crate::Result;

/// Fraction of sampled collision-free configurations that lie in at least
/// one region.
///
/// Configurations are drawn uniformly from the bounding box of `domain` and
/// kept when they are inside it. Returns 0 when no sample is collision free.
/// The same `seed` always gives the same answer.
pub fn estimate_coverage(
    regions: &[HPolyhedron],
    checker: &dyn CollisionChecker,
    domain: &HPolyhedron,
    num_samples: usize,
    seed: u64,
) -> Result<f64> {
    let (lower, upper) = domain.bounding_box()?;
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    let mut free = 0usize;
    let mut covered = 0usize;
    for _ in 0..num_samples {
        let q = DVector::from_fn(lower.len(), |i, _| {
            if upper[i] > lower[i] {
                rng.gen_range(lower[i]..upper[i])
            } else {
                lower[i]
            }
        });
        if !domain.contains(&q, 1e-9) || !checker.is_collision_free(&q) {
            continue;
        }
        free += 1;
        if regions.iter().any(|region| region.contains(&q, 1e-9)) {
            covered += 1;
        }
    }

    if free == 0 {
        return Ok(0.0);
    }
    Ok(covered as f64 / free as f64)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::checker::FnChecker;
    use approx::assert_abs_diff_eq;

    fn square() -> HPolyhedron {
        HPolyhedron::make_box(&DVector::from_element(2, 0.0), &DVector::from_element(2, 1.0)).unwrap()
    }

    fn left_half() -> HPolyhedron {
        HPolyhedron::make_box(
            &DVector::from_column_slice(&[0.0, 0.0]),
            &DVector::from_column_slice(&[0.5, 1.0]),
        )
        .unwrap()
    }

    #[test]
    fn test_half_covered() {
        let checker = FnChecker::new(|_: &DVector<f64>| true);
        let coverage = estimate_coverage(&[left_half()], &checker, &square(), 4000, 0).unwrap();
        assert_abs_diff_eq!(coverage, 0.5, epsilon = 0.05);
    }

    #[test]
    fn test_only_free_samples_count() {
        // everything right of 0.5 collides, so the left half covers all free space
        let checker = FnChecker::new(|q: &DVector<f64>| q[0] < 0.5);
        let coverage = estimate_coverage(&[left_half()], &checker, &square(), 1000, 3).unwrap();
        assert_abs_diff_eq!(coverage, 1.0);
    }

    #[test]
    fn test_bounds_and_edge_cases() {
        let free = FnChecker::new(|_: &DVector<f64>| true);
        let blocked = FnChecker::new(|_: &DVector<f64>| false);
        assert_eq!(estimate_coverage(&[], &free, &square(), 100, 0).unwrap(), 0.0);
        assert_eq!(estimate_coverage(&[square()], &free, &square(), 100, 0).unwrap(), 1.0);
        assert_eq!(estimate_coverage(&[square()], &blocked, &square(), 100, 0).unwrap(), 0.0);
        assert_eq!(estimate_coverage(&[square()], &free, &square(), 0, 0).unwrap(), 0.0);
    }

    #[test]
    fn test_reproducible() {
        let checker = FnChecker::new(|q: &DVector<f64>| q.norm() < 1.2);
        let regions = [left_half()];
        let a = estimate_coverage(&regions, &checker, &square(), 500, 42).unwrap();
        let b = estimate_coverage(&regions, &checker, &square(), 500, 42).unwrap();
        assert_eq!(a.to_bits(), b.to_bits());
        assert!((0.0..=1.0).contains(&a));
    }
}
