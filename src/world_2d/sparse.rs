use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{PicError, Result};

/// Iterative method used for the one-time potential solve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SolverMethod {
    /// Jacobi-scaled BiCGSTAB. Handles the non-symmetric Neumann rows.
    BiCgStab,
    /// Gauss-Seidel with successive over-relaxation factor `omega`.
    Sor { omega: f64 },
}

/// Configuration for the sparse linear solve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    pub method: SolverMethod,
    /// Maximum number of iterations before giving up.
    pub max_iterations: usize,
    /// Relative residual tolerance on the Jacobi-scaled system.
    pub tolerance: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            method: SolverMethod::BiCgStab,
            max_iterations: 20_000,
            tolerance: 1e-10,
        }
    }
}

/// Outcome of a converged solve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolveReport {
    pub iterations: usize,
    pub relative_residual: f64,
}

/// Compressed sparse row matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct CsrMatrix {
    n_rows: usize,
    n_cols: usize,
    row_ptr: Vec<usize>,
    col_idx: Vec<usize>,
    values: Vec<f64>,
}

impl CsrMatrix {
    /// Assemble from `(row, col, value)` triplets. Duplicate entries are summed.
    pub fn from_triplets(n_rows: usize, n_cols: usize, triplets: &[(usize, usize, f64)]) -> Self {
        let mut sorted = triplets.to_vec();
        for &(r, c, _) in &sorted {
            assert!(
                r < n_rows && c < n_cols,
                "triplet ({r}, {c}) out of bounds for {n_rows}x{n_cols} matrix"
            );
        }
        sorted.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

        let mut row_ptr = vec![0usize; n_rows + 1];
        let mut col_idx = Vec::with_capacity(sorted.len());
        let mut values: Vec<f64> = Vec::with_capacity(sorted.len());
        let mut last: Option<(usize, usize)> = None;

        for (r, c, v) in sorted {
            if last == Some((r, c)) {
                if let Some(tail) = values.last_mut() {
                    *tail += v;
                }
                continue;
            }
            col_idx.push(c);
            values.push(v);
            row_ptr[r + 1] += 1;
            last = Some((r, c));
        }
        for r in 0..n_rows {
            row_ptr[r + 1] += row_ptr[r];
        }

        Self { n_rows, n_cols, row_ptr, col_idx, values }
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_cols(&self) -> usize {
        self.n_cols
    }

    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Entries of one row as `(column, value)` pairs in increasing column order.
    pub fn row(&self, r: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        let span = self.row_ptr[r]..self.row_ptr[r + 1];
        self.col_idx[span.clone()].iter().copied().zip(self.values[span].iter().copied())
    }

    /// Stored value at `(r, c)`, zero when the entry is structurally absent.
    pub fn get(&self, r: usize, c: usize) -> f64 {
        self.row(r).find(|&(col, _)| col == c).map_or(0.0, |(_, v)| v)
    }

    pub fn diagonal(&self) -> Vec<f64> {
        (0..self.n_rows).map(|r| self.get(r, r)).collect()
    }

    /// `out = A * x`
    pub fn mul_vec(&self, x: &[f64], out: &mut [f64]) {
        for (r, o) in out.iter_mut().enumerate().take(self.n_rows) {
            *o = self.row(r).map(|(c, v)| v * x[c]).sum();
        }
    }
}

/// Solve `A x = b` starting from `x0`.
pub fn solve(a: &CsrMatrix, b: &[f64], x0: &[f64], config: &SolverConfig) -> Result<(Vec<f64>, SolveReport)> {
    let n = a.n_rows();
    if a.n_cols() != n || b.len() != n || x0.len() != n {
        return Err(PicError::SolverFailure(format!(
            "system dimensions disagree: A is {}x{}, b has {}, x0 has {}",
            n, a.n_cols(), b.len(), x0.len()
        )));
    }

    let diag = a.diagonal();
    if let Some(r) = diag.iter().position(|d| *d == 0.0 || !d.is_finite()) {
        return Err(PicError::SolverFailure(format!("zero or non-finite diagonal in row {r}")));
    }

    let report = match config.method {
        SolverMethod::BiCgStab => bicgstab(a, &diag, b, x0, config),
        SolverMethod::Sor { omega } => sor(a, &diag, b, x0, omega, config),
    }?;

    if report.1.iterations > config.max_iterations / 2 {
        warn!(
            "linear solve used {} of {} iterations",
            report.1.iterations, config.max_iterations
        );
    }
    debug!(
        "linear solve converged in {} iterations, relative residual {:.3e}",
        report.1.iterations, report.1.relative_residual
    );
    Ok(report)
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn norm(a: &[f64]) -> f64 {
    dot(a, a).sqrt()
}

// Residual of the row-scaled system D^-1 (b - A x).
fn scaled_residual(a: &CsrMatrix, diag: &[f64], b: &[f64], x: &[f64], out: &mut [f64]) {
    a.mul_vec(x, out);
    for i in 0..out.len() {
        out[i] = (b[i] - out[i]) / diag[i];
    }
}

fn scaled_mul(a: &CsrMatrix, diag: &[f64], x: &[f64], out: &mut [f64]) {
    a.mul_vec(x, out);
    for (o, d) in out.iter_mut().zip(diag) {
        *o /= d;
    }
}

fn scaled_rhs_norm(diag: &[f64], b: &[f64]) -> f64 {
    b.iter().zip(diag).map(|(bi, d)| (bi / d).powi(2)).sum::<f64>().sqrt()
}

fn breakdown(what: &str, iter: usize) -> PicError {
    PicError::SolverFailure(format!("BiCGSTAB breakdown ({what}) at iteration {iter}"))
}

fn bicgstab(
    a: &CsrMatrix,
    diag: &[f64],
    b: &[f64],
    x0: &[f64],
    config: &SolverConfig,
) -> Result<(Vec<f64>, SolveReport)> {
    let n = b.len();
    let b_norm = scaled_rhs_norm(diag, b);
    if b_norm == 0.0 {
        return Ok((vec![0.0; n], SolveReport { iterations: 0, relative_residual: 0.0 }));
    }

    let mut x = x0.to_vec();
    let mut r = vec![0.0; n];
    scaled_residual(a, diag, b, &x, &mut r);
    let mut rel = norm(&r) / b_norm;
    if rel <= config.tolerance {
        return Ok((x, SolveReport { iterations: 0, relative_residual: rel }));
    }

    let mut r_hat = r.clone();
    let mut p = vec![0.0; n];
    let mut v = vec![0.0; n];
    let mut s = vec![0.0; n];
    let mut t = vec![0.0; n];
    let (mut rho_old, mut alpha, mut omega) = (1.0, 1.0, 1.0);

    for iter in 1..=config.max_iterations {
        let mut rho = dot(&r_hat, &r);
        if !rho.is_finite() {
            return Err(breakdown("rho", iter));
        }
        // Shadow residual orthogonal to r: restart from the current residual.
        if rho.abs() <= f64::EPSILON * norm(&r_hat) * norm(&r) {
            debug!("BiCGSTAB restart at iteration {iter}");
            r_hat.copy_from_slice(&r);
            p.fill(0.0);
            v.fill(0.0);
            (rho_old, alpha, omega) = (1.0, 1.0, 1.0);
            rho = dot(&r_hat, &r);
            if rho == 0.0 {
                return Err(breakdown("rho", iter));
            }
        }
        let beta = (rho / rho_old) * (alpha / omega);
        for i in 0..n {
            p[i] = r[i] + beta * (p[i] - omega * v[i]);
        }

        scaled_mul(a, diag, &p, &mut v);
        let denom = dot(&r_hat, &v);
        if denom == 0.0 || !denom.is_finite() {
            return Err(breakdown("r_hat . v", iter));
        }
        alpha = rho / denom;
        for i in 0..n {
            s[i] = r[i] - alpha * v[i];
        }

        rel = norm(&s) / b_norm;
        if rel <= config.tolerance {
            for i in 0..n {
                x[i] += alpha * p[i];
            }
            return Ok((x, SolveReport { iterations: iter, relative_residual: rel }));
        }

        scaled_mul(a, diag, &s, &mut t);
        let tt = dot(&t, &t);
        if tt == 0.0 {
            return Err(breakdown("t . t", iter));
        }
        omega = dot(&t, &s) / tt;
        for i in 0..n {
            x[i] += alpha * p[i] + omega * s[i];
            r[i] = s[i] - omega * t[i];
        }

        rel = norm(&r) / b_norm;
        if !rel.is_finite() {
            return Err(breakdown("non-finite residual", iter));
        }
        if rel <= config.tolerance {
            return Ok((x, SolveReport { iterations: iter, relative_residual: rel }));
        }
        if omega == 0.0 {
            return Err(breakdown("omega", iter));
        }
        rho_old = rho;
    }

    Err(PicError::SolverFailure(format!(
        "BiCGSTAB didn't converge in {} iterations.  Relative residual {rel:.6e}",
        config.max_iterations
    )))
}

fn sor(
    a: &CsrMatrix,
    diag: &[f64],
    b: &[f64],
    x0: &[f64],
    w: f64,
    config: &SolverConfig,
) -> Result<(Vec<f64>, SolveReport)> {
    if !(w > 0.0 && w < 2.0) {
        return Err(PicError::SolverFailure(format!("SOR factor {w} outside (0, 2)")));
    }
    let n = b.len();
    let b_norm = scaled_rhs_norm(diag, b);
    if b_norm == 0.0 {
        return Ok((vec![0.0; n], SolveReport { iterations: 0, relative_residual: 0.0 }));
    }

    let mut x = x0.to_vec();
    let mut r = vec![0.0; n];
    let mut l2 = f64::INFINITY;

    for iter in 0..config.max_iterations {
        // Periodic check for convergence
        if iter % 50 == 0 {
            scaled_residual(a, diag, b, &x, &mut r);
            l2 = norm(&r) / b_norm;
            if !l2.is_finite() {
                break;
            }
            if l2 <= config.tolerance {
                return Ok((x, SolveReport { iterations: iter, relative_residual: l2 }));
            }
        }

        for row in 0..n {
            let sigma: f64 = a.row(row).filter(|&(c, _)| c != row).map(|(c, v)| v * x[c]).sum();
            let x_new = (b[row] - sigma) / diag[row];
            x[row] = (1.0 - w) * x[row] + w * x_new;
        }
    }

    Err(PicError::SolverFailure(format!("GS SOR didn't converge.  L2 residual {l2:.6e}")))
}
