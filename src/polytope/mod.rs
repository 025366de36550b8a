//! Convex regions in half-space form, `{ q : A q <= b }`.
//!
//! Regions are immutable values: scaling, intersecting and simplifying all
//! return a new [`HPolyhedron`].

mod lp;

use nalgebra::{DMatrix, DVector};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use self::lp::{solve_lp, LpOutcome};
use crate::{Error, Result};

/// Upper bound on the inscribed radius in the Chebyshev LP, keeps it bounded
/// when the polytope is not.
const MAX_RADIUS: f64 = 1e6;

/// Two regions whose intersection admits a ball at least this large overlap.
pub const INTERSECTION_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq)]
pub struct HPolyhedron {
    a: DMatrix<f64>,
    b: DVector<f64>,
}

/// Knobs for [`HPolyhedron::simplify`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimplifyOptions {
    /// Smallest admissible fraction of the original volume.
    pub min_volume_ratio: f64,
    /// Maximum accepted face translations.
    pub max_iterations: usize,
    /// Samples used to estimate the volume ratio.
    pub num_volume_samples: usize,
    /// Inward translations tried per face, as fractions of the inscribed radius.
    pub translation_fractions: Vec<f64>,
    pub random_seed: u64,
}

impl Default for SimplifyOptions {
    fn default() -> Self {
        Self {
            min_volume_ratio: 0.1,
            max_iterations: 10,
            num_volume_samples: 500,
            translation_fractions: vec![0.05, 0.1, 0.2, 0.4],
            random_seed: 0,
        }
    }
}

impl HPolyhedron {
    pub fn new(a: DMatrix<f64>, b: DVector<f64>) -> Result<Self> {
        if a.nrows() != b.len() {
            return Err(Error::DimensionMismatch {
                expected: a.nrows(),
                actual: b.len(),
            });
        }
        Ok(Self { a, b })
    }

    /// Builds a region from row-major constraint data, as stored on disk.
    pub fn from_rows(rows: &[Vec<f64>], b: &[f64], dim: usize) -> Result<Self> {
        if rows.len() != b.len() {
            return Err(Error::DimensionMismatch {
                expected: rows.len(),
                actual: b.len(),
            });
        }
        let mut a = DMatrix::zeros(rows.len(), dim);
        for (i, row) in rows.iter().enumerate() {
            if row.len() != dim {
                return Err(Error::DimensionMismatch {
                    expected: dim,
                    actual: row.len(),
                });
            }
            a.row_mut(i).copy_from_slice(row);
        }
        Ok(Self {
            a,
            b: DVector::from_column_slice(b),
        })
    }

    /// Axis-aligned box `lower <= q <= upper`.
    pub fn make_box(lower: &DVector<f64>, upper: &DVector<f64>) -> Result<Self> {
        let n = lower.len();
        if upper.len() != n {
            return Err(Error::DimensionMismatch {
                expected: n,
                actual: upper.len(),
            });
        }
        let mut a = DMatrix::zeros(2 * n, n);
        let mut b = DVector::zeros(2 * n);
        for i in 0..n {
            a[(i, i)] = 1.0;
            b[i] = upper[i];
            a[(n + i, i)] = -1.0;
            b[n + i] = -lower[i];
        }
        Ok(Self { a, b })
    }

    pub fn a(&self) -> &DMatrix<f64> {
        &self.a
    }

    pub fn b(&self) -> &DVector<f64> {
        &self.b
    }

    pub fn ambient_dimension(&self) -> usize {
        self.a.ncols()
    }

    pub fn num_faces(&self) -> usize {
        self.a.nrows()
    }

    /// Row-major copy of `A`, the layout used by the region file.
    pub fn rows(&self) -> Vec<Vec<f64>> {
        self.a
            .row_iter()
            .map(|row| row.iter().copied().collect())
            .collect()
    }

    pub fn contains(&self, q: &DVector<f64>, tol: f64) -> bool {
        if q.len() != self.ambient_dimension() {
            return false;
        }
        (0..self.num_faces()).all(|i| self.a.row(i).dot(&q.transpose()) <= self.b[i] + tol)
    }

    pub fn intersection(&self, other: &HPolyhedron) -> Result<HPolyhedron> {
        self.check_dimension(other.ambient_dimension())?;
        let m = self.num_faces();
        let k = other.num_faces();
        let mut a = DMatrix::zeros(m + k, self.ambient_dimension());
        a.rows_mut(0, m).copy_from(&self.a);
        a.rows_mut(m, k).copy_from(&other.a);
        let mut b = DVector::zeros(m + k);
        b.rows_mut(0, m).copy_from(&self.b);
        b.rows_mut(m, k).copy_from(&other.b);
        Ok(HPolyhedron { a, b })
    }

    /// Centre and radius of the largest inscribed ball, `None` when empty.
    pub fn chebyshev_ball(&self) -> Result<Option<(DVector<f64>, f64)>> {
        let n = self.ambient_dimension();
        let m = self.num_faces();
        // variables [x, r]: a_i x + |a_i| r <= b_i, 0 <= r <= MAX_RADIUS
        let mut a = DMatrix::zeros(m + 2, n + 1);
        let mut b = DVector::zeros(m + 2);
        for i in 0..m {
            a.view_mut((i, 0), (1, n)).copy_from(&self.a.row(i));
            a[(i, n)] = self.a.row(i).norm();
            b[i] = self.b[i];
        }
        a[(m, n)] = -1.0;
        a[(m + 1, n)] = 1.0;
        b[m + 1] = MAX_RADIUS;
        let mut c = DVector::zeros(n + 1);
        c[n] = -1.0;

        match solve_lp(&c, &a, &b)? {
            LpOutcome::Optimal { x, .. } => {
                let radius = x[n];
                Ok(Some((x.rows(0, n).into_owned(), radius)))
            }
            LpOutcome::Infeasible => Ok(None),
            LpOutcome::Unbounded => Err(Error::Unbounded),
        }
    }

    pub fn chebyshev_center(&self) -> Result<DVector<f64>> {
        match self.chebyshev_ball()? {
            Some((center, _)) => Ok(center),
            None => Err(Error::Solver("chebyshev center of an empty region".into())),
        }
    }

    /// True when no ball of radius `INTERSECTION_TOLERANCE` fits inside.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(match self.chebyshev_ball()? {
            Some((_, r)) => r < INTERSECTION_TOLERANCE,
            None => true,
        })
    }

    /// True when the two regions share an interior point.
    pub fn intersects(&self, other: &HPolyhedron) -> Result<bool> {
        Ok(!self.intersection(other)?.is_empty()?)
    }

    /// Maps every point `p` of the region to `center + factor * (p - center)`.
    pub fn scale_about(&self, center: &DVector<f64>, factor: f64) -> HPolyhedron {
        let ac = &self.a * center;
        let b = &self.b * factor + ac * (1.0 - factor);
        HPolyhedron {
            a: self.a.clone(),
            b,
        }
    }

    /// Tightest axis-aligned box around the region, one LP per bound.
    pub fn bounding_box(&self) -> Result<(DVector<f64>, DVector<f64>)> {
        let n = self.ambient_dimension();
        let mut lower = DVector::zeros(n);
        let mut upper = DVector::zeros(n);
        for i in 0..n {
            for (sign, bound) in [(1.0, &mut lower), (-1.0, &mut upper)] {
                let mut c = DVector::zeros(n);
                c[i] = sign;
                match solve_lp(&c, &self.a, &self.b)? {
                    LpOutcome::Optimal { x, .. } => bound[i] = x[i],
                    LpOutcome::Infeasible => {
                        return Err(Error::Solver("bounding box of an empty region".into()))
                    }
                    LpOutcome::Unbounded => return Err(Error::Unbounded),
                }
            }
        }
        Ok((lower, upper))
    }

    /// Scales the region about its Chebyshev centre.
    pub fn shrink(&self, factor: f64) -> Result<HPolyhedron> {
        let center = self.chebyshev_center()?;
        Ok(self.scale_about(&center, factor))
    }

    /// One hit-and-run step chain of `mixing_steps` moves, starting at
    /// `previous` which must lie in the region.
    pub fn uniform_sample<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        previous: &DVector<f64>,
        mixing_steps: usize,
    ) -> Result<DVector<f64>> {
        let n = self.ambient_dimension();
        if previous.len() != n {
            return Err(Error::DimensionMismatch {
                expected: n,
                actual: previous.len(),
            });
        }
        if !self.contains(previous, 1e-9) {
            return Err(Error::OutsideRegion);
        }
        let mut x = previous.clone();
        for _ in 0..mixing_steps.max(1) {
            let mut direction = DVector::from_fn(n, |_, _| rng.sample::<f64, _>(StandardNormal));
            let norm = direction.norm();
            if norm == 0.0 {
                continue;
            }
            direction /= norm;

            let mut t_min = f64::NEG_INFINITY;
            let mut t_max = f64::INFINITY;
            for i in 0..self.num_faces() {
                let ad = self.a.row(i).dot(&direction.transpose());
                let slack = (self.b[i] - self.a.row(i).dot(&x.transpose())).max(0.0);
                if ad > 1e-12 {
                    t_max = t_max.min(slack / ad);
                } else if ad < -1e-12 {
                    t_min = t_min.max(slack / ad);
                }
            }
            if !t_min.is_finite() || !t_max.is_finite() {
                return Err(Error::Unbounded);
            }
            if t_max > t_min {
                let t = rng.gen_range(t_min..=t_max);
                x += direction * t;
            }
        }
        Ok(x)
    }

    /// Drops faces that do not change the set.
    pub fn remove_redundant(&self, tol: f64) -> Result<HPolyhedron> {
        let mut kept: Vec<usize> = (0..self.num_faces()).collect();
        let mut i = 0;
        while i < kept.len() {
            let face = kept[i];
            let others: Vec<usize> = kept.iter().copied().filter(|k| *k != face).collect();
            let rest = self.select_faces(&others);
            let c = -self.a.row(face).transpose();
            let redundant = match solve_lp(&c, &rest.a, &rest.b)? {
                LpOutcome::Optimal { objective, .. } => -objective <= self.b[face] + tol,
                // the rest is empty, so is the region; keep the face
                LpOutcome::Infeasible => false,
                LpOutcome::Unbounded => false,
            };
            if redundant {
                kept.remove(i);
            } else {
                i += 1;
            }
        }
        Ok(self.select_faces(&kept))
    }

    /// Reduces the face count by translating faces inward until other faces
    /// become redundant. The result is a subset of `self` that keeps at least
    /// `min_volume_ratio` of its volume and still intersects every region in
    /// `keep_intersecting`.
    pub fn simplify(
        &self,
        options: &SimplifyOptions,
        keep_intersecting: &[HPolyhedron],
    ) -> Result<HPolyhedron> {
        let mut rng = ChaCha8Rng::seed_from_u64(options.random_seed);
        let reference = self.sample_points(&mut rng, options.num_volume_samples)?;
        let mut current = self.remove_redundant(1e-9)?;

        for _ in 0..options.max_iterations {
            let Some((_, radius)) = current.chebyshev_ball()? else {
                break;
            };
            let mut accepted = None;
            'faces: for face in 0..current.num_faces() {
                let norm = current.a.row(face).norm();
                for fraction in &options.translation_fractions {
                    let mut candidate = current.clone();
                    candidate.b[face] -= fraction * radius * norm;
                    let candidate = candidate.remove_redundant(1e-9)?;
                    if candidate.num_faces() >= current.num_faces() {
                        continue;
                    }
                    let ratio = volume_fraction(&candidate, &reference);
                    if ratio < options.min_volume_ratio {
                        break;
                    }
                    let mut keeps_all = true;
                    for other in keep_intersecting {
                        if !candidate.intersects(other)? {
                            keeps_all = false;
                            break;
                        }
                    }
                    if keeps_all {
                        accepted = Some(candidate);
                        break 'faces;
                    }
                }
            }
            match accepted {
                Some(candidate) => current = candidate,
                None => break,
            }
        }
        Ok(current)
    }

    /// `count` hit-and-run samples started at the Chebyshev centre.
    pub fn sample_points<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        count: usize,
    ) -> Result<Vec<DVector<f64>>> {
        let mut points = Vec::with_capacity(count);
        if count == 0 {
            return Ok(points);
        }
        let mut last = self.chebyshev_center()?;
        for _ in 0..count {
            last = self.uniform_sample(rng, &last, 10)?;
            points.push(last.clone());
        }
        Ok(points)
    }

    fn select_faces(&self, faces: &[usize]) -> HPolyhedron {
        HPolyhedron {
            a: self.a.select_rows(faces),
            b: self.b.select_rows(faces),
        }
    }

    fn check_dimension(&self, dim: usize) -> Result<()> {
        if dim != self.ambient_dimension() {
            return Err(Error::DimensionMismatch {
                expected: self.ambient_dimension(),
                actual: dim,
            });
        }
        Ok(())
    }
}

fn volume_fraction(region: &HPolyhedron, samples: &[DVector<f64>]) -> f64 {
    if samples.is_empty() {
        return 1.0;
    }
    let inside = samples.iter().filter(|q| region.contains(q, 1e-9)).count();
    inside as f64 / samples.len() as f64
}
