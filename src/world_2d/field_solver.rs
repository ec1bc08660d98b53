use glam::DVec2;
use serde::{Deserialize, Serialize};
use std::ops::{Add, Mul};

use super::grid::{Grid, SingleDimSpec};
use super::sparse::{SolveReport, SolverConfig};
use super::TwoDField;
use crate::error::{PicError, Result};

/// What a sampler does with a query outside the closed domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainPolicy {
    /// Fail with `OutOfDomain`.
    #[default]
    Reject,
    /// Project the query onto the nearest point of the domain.
    Clamp,
}

/// Bilinear sampler over a regular node lattice.
#[derive(Debug, Clone)]
pub struct Interpolant<T> {
    x_dim: SingleDimSpec,
    y_dim: SingleDimSpec,
    values: TwoDField<T>,
}

impl<T> Interpolant<T>
    where
    T: Clone + Copy + Add<Output = T> + Mul<f64, Output = T>
{
    pub fn new(x_dim: SingleDimSpec, y_dim: SingleDimSpec, values: TwoDField<T>) -> Result<Self> {
        if values.nx() != x_dim.n() || values.ny() != y_dim.n() {
            return Err(PicError::ShapeMismatch {
                expected: x_dim.n() * y_dim.n(),
                found: values.len(),
            });
        }
        Ok(Self { x_dim, y_dim, values })
    }

    pub fn values(&self) -> &TwoDField<T> {
        &self.values
    }

    pub fn contains(&self, pos: DVec2) -> bool {
        self.x_dim.contains(pos.x) && self.y_dim.contains(pos.y)
    }

    /// Fractional node index of `pos` after applying `policy`.
    pub fn full_node_index(&self, pos: DVec2, policy: DomainPolicy) -> Result<DVec2> {
        let out = PicError::OutOfDomain { x: pos.x, y: pos.y };
        if !pos.is_finite() {
            return Err(out);
        }
        let pos = match policy {
            DomainPolicy::Reject if !self.contains(pos) => return Err(out),
            DomainPolicy::Reject => pos,
            DomainPolicy::Clamp => DVec2::new(self.x_dim.clamp(pos.x), self.y_dim.clamp(pos.y)),
        };
        Ok(DVec2::new(self.x_dim.full_index(pos.x), self.y_dim.full_index(pos.y)))
    }

    pub fn sample(&self, pos: DVec2, policy: DomainPolicy) -> Result<T> {
        let full_idx = self.full_node_index(pos, policy)?;
        Ok(self.values.linear_interpolate(full_idx))
    }
}

/// `E = -grad(V) / h` by central differences, one-sided on the outer faces.
/// `Ey` is zeroed on the bottom and top rows.
pub fn differentiate(v: &TwoDField<f64>, h: f64) -> TwoDField<DVec2> {
    let (nx, ny) = (v.nx(), v.ny());
    let mut ef = TwoDField::init(nx, ny, DVec2::ZERO);

    let diff = |lo: f64, hi: f64, span: f64| (hi - lo) / span;

    for iy in 0..ny {
        for ix in 0..nx {
            let dvdx = if nx < 2 {
                0.0
            } else if ix == 0 {
                diff(v.get(0, iy), v.get(1, iy), 1.0)
            } else if ix == nx - 1 {
                diff(v.get(nx - 2, iy), v.get(nx - 1, iy), 1.0)
            } else {
                diff(v.get(ix - 1, iy), v.get(ix + 1, iy), 2.0)
            };

            let dvdy = if iy == 0 || iy == ny - 1 {
                0.0
            } else {
                diff(v.get(ix, iy - 1), v.get(ix, iy + 1), 2.0)
            };

            ef.set(ix, iy, DVec2::new(dvdx, dvdy) * (-1.0 / h));
        }
    }
    ef
}

/// Frozen potential and electric field with continuous samplers.
#[derive(Debug, Clone)]
pub struct ElectricField {
    phi: Interpolant<f64>,
    ef: Interpolant<DVec2>,
}

impl ElectricField {
    /// Solve the grid's linear system once and differentiate the result.
    pub fn solve(grid: &Grid, solver: &SolverConfig) -> Result<(Self, SolveReport)> {
        let (phi, report) = grid.solve_potential(solver)?;
        Ok((Self::from_potential(grid, phi)?, report))
    }

    pub fn from_potential(grid: &Grid, phi: TwoDField<f64>) -> Result<Self> {
        let ef = differentiate(&phi, grid.h());
        Ok(Self {
            phi: Interpolant::new(*grid.x_dim(), *grid.y_dim(), phi)?,
            ef: Interpolant::new(*grid.x_dim(), *grid.y_dim(), ef)?,
        })
    }

    pub fn potential(&self) -> &TwoDField<f64> {
        self.phi.values()
    }

    pub fn field(&self) -> &TwoDField<DVec2> {
        self.ef.values()
    }

    pub fn ex(&self) -> TwoDField<f64> {
        self.field().map(|e| e.x)
    }

    pub fn ey(&self) -> TwoDField<f64> {
        self.field().map(|e| e.y)
    }

    pub fn contains(&self, pos: DVec2) -> bool {
        self.phi.contains(pos)
    }

    /// Interpolated `(Ex, Ey)` at `pos`; rejects points outside the domain.
    pub fn get_field_at(&self, pos: DVec2) -> Result<DVec2> {
        self.ef.sample(pos, DomainPolicy::Reject)
    }

    /// Interpolated `V` at `pos`; rejects points outside the domain.
    pub fn get_potential_at(&self, pos: DVec2) -> Result<f64> {
        self.phi.sample(pos, DomainPolicy::Reject)
    }

    pub fn sample_field(&self, pos: DVec2, policy: DomainPolicy) -> Result<DVec2> {
        self.ef.sample(pos, policy)
    }

    pub fn sample_potential(&self, pos: DVec2, policy: DomainPolicy) -> Result<f64> {
        self.phi.sample(pos, policy)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::world_2d::grid::GridSpec;
    use approx::assert_abs_diff_eq;

    fn plain_grid() -> Grid {
        Grid::build(GridSpec {
            h: 0.5,
            length: 4.0,
            height: 2.0,
            wall: None,
            v_in: 10.0,
            v_out: 2.0,
            v_wall: 0.0,
        })
        .unwrap()
    }

    fn planar_potential(grid: &Grid, a: f64, bx: f64, cy: f64) -> TwoDField<f64> {
        let mut phi = TwoDField::init(grid.nx(), grid.ny(), 0.0);
        for ix in 0..grid.nx() {
            for iy in 0..grid.ny() {
                let (x, y) = (grid.x_dim().coord(ix), grid.y_dim().coord(iy));
                phi.set(ix, iy, a + bx * x + cy * y);
            }
        }
        phi
    }

    #[test]
    fn gradient_of_plane_is_constant() {
        let grid = plain_grid();
        let ef = differentiate(&planar_potential(&grid, 1.0, 3.0, -2.0), grid.h());
        for ix in 0..grid.nx() {
            for iy in 0..grid.ny() {
                let e = ef.get(ix, iy);
                assert_abs_diff_eq!(e.x, -3.0, epsilon = 1e-12);
                let expected_ey = if iy == 0 || iy == grid.ny() - 1 { 0.0 } else { 2.0 };
                assert_abs_diff_eq!(e.y, expected_ey, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn samples_interpolate_between_nodes() {
        let grid = plain_grid();
        let field = ElectricField::from_potential(&grid, planar_potential(&grid, 1.0, 3.0, -2.0)).unwrap();
        let v = field.get_potential_at(DVec2::new(1.3, 0.7)).unwrap();
        assert_abs_diff_eq!(v, 1.0 + 3.0 * 1.3 - 2.0 * 0.7, epsilon = 1e-12);
        let e = field.get_field_at(DVec2::new(2.2, 1.0)).unwrap();
        assert_abs_diff_eq!(e.x, -3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(e.y, 2.0, epsilon = 1e-12);
    }

    #[test]
    fn domain_corners_are_inside() {
        let grid = plain_grid();
        let field = ElectricField::from_potential(&grid, planar_potential(&grid, 0.0, 1.0, 1.0)).unwrap();
        assert_abs_diff_eq!(field.get_potential_at(DVec2::new(4.0, 2.0)).unwrap(), 6.0, epsilon = 1e-12);
        assert_abs_diff_eq!(field.get_potential_at(DVec2::ZERO).unwrap(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn outside_queries_are_rejected_or_clamped() {
        let grid = plain_grid();
        let field = ElectricField::from_potential(&grid, planar_potential(&grid, 0.0, 1.0, 0.0)).unwrap();
        let outside = DVec2::new(4.1, 1.0);
        assert_eq!(field.get_field_at(outside), Err(PicError::OutOfDomain { x: 4.1, y: 1.0 }));
        assert!(matches!(field.get_potential_at(DVec2::new(1.0, -0.01)), Err(PicError::OutOfDomain { .. })));
        assert!(field.get_potential_at(DVec2::new(f64::NAN, 1.0)).is_err());
        let clamped = field.sample_potential(outside, DomainPolicy::Clamp).unwrap();
        assert_abs_diff_eq!(clamped, 4.0, epsilon = 1e-12);
    }

    #[test]
    fn solved_field_without_wall_is_uniform() {
        let grid = plain_grid();
        let (field, _) = ElectricField::solve(&grid, &SolverConfig::default()).unwrap();
        let ex = field.ex();
        let ey = field.ey();
        for ix in 0..grid.nx() {
            for iy in 0..grid.ny() {
                assert_abs_diff_eq!(ex.get(ix, iy), 2.0, epsilon = 1e-8);
                assert_abs_diff_eq!(ey.get(ix, iy), 0.0, epsilon = 1e-8);
            }
        }
    }
}
