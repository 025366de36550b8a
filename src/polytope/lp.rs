use clarabel::algebra::CscMatrix;
use clarabel::solver::{
    DefaultSettingsBuilder, DefaultSolver, IPSolver, SolverStatus, SupportedConeT::NonnegativeConeT,
};
use nalgebra::{DMatrix, DVector};

use crate::{Error, Result};

/// Outcome of `min cᵀx s.t. A x <= b`.
#[derive(Debug, Clone)]
pub(crate) enum LpOutcome {
    Optimal { x: DVector<f64>, objective: f64 },
    Infeasible,
    Unbounded,
}

pub(crate) fn solve_lp(c: &DVector<f64>, a: &DMatrix<f64>, b: &DVector<f64>) -> Result<LpOutcome> {
    let n = c.len();
    if a.ncols() != n {
        return Err(Error::DimensionMismatch {
            expected: n,
            actual: a.ncols(),
        });
    }
    if a.nrows() == 0 {
        return Ok(if c.iter().all(|v| *v == 0.0) {
            LpOutcome::Optimal {
                x: DVector::zeros(n),
                objective: 0.0,
            }
        } else {
            LpOutcome::Unbounded
        });
    }

    // P = 0 for a pure LP
    let p_csc = CscMatrix::new(n, n, vec![0usize; n + 1], vec![], vec![]);
    let a_csc = dmatrix_to_csc(a);
    let q: Vec<f64> = c.iter().copied().collect();
    let b_slice: Vec<f64> = b.iter().copied().collect();
    // NonnegativeCone: A x + s = b, s >= 0
    let cones = vec![NonnegativeConeT(a.nrows())];

    let settings = DefaultSettingsBuilder::default()
        .verbose(false)
        .max_iter(200)
        .build()
        .map_err(|e| Error::Solver(format!("{e:?}")))?;

    let mut solver = DefaultSolver::new(&p_csc, &q, &a_csc, &b_slice, &cones, settings)
        .map_err(|e| Error::Solver(format!("{e:?}")))?;
    solver.solve();
    let sol = &solver.solution;
    match &sol.status {
        SolverStatus::Solved | SolverStatus::AlmostSolved => {
            let x = DVector::from_column_slice(&sol.x);
            let objective = c.dot(&x);
            Ok(LpOutcome::Optimal { x, objective })
        }
        SolverStatus::PrimalInfeasible | SolverStatus::AlmostPrimalInfeasible => {
            Ok(LpOutcome::Infeasible)
        }
        SolverStatus::DualInfeasible | SolverStatus::AlmostDualInfeasible => {
            Ok(LpOutcome::Unbounded)
        }
        status => Err(Error::Solver(format!("{status:?}"))),
    }
}

fn dmatrix_to_csc(m: &DMatrix<f64>) -> CscMatrix<f64> {
    let (nrows, ncols) = m.shape();
    let mut colptr = vec![0usize; ncols + 1];
    let mut rowval = Vec::new();
    let mut nzval = Vec::new();

    for j in 0..ncols {
        for i in 0..nrows {
            let v = m[(i, j)];
            if v.abs() > 1e-15 {
                rowval.push(i);
                nzval.push(v);
            }
        }
        colptr[j + 1] = rowval.len();
    }

    CscMatrix::new(nrows, ncols, colptr, rowval, nzval)
}
