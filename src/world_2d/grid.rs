use glam::DVec2;
use log::info;
use serde::{Deserialize, Serialize};

use super::sparse::{self, CsrMatrix, SolveReport, SolverConfig};
use super::TwoDField;
use crate::error::{PicError, Result};

// Tolerance used when snapping a physical coordinate onto the node lattice,
// so that e.g. 0.01 / 1e-4 lands on node 100 and not 99.
const SNAP_EPS: f64 = 1e-9;

fn node_floor(coord: f64, h: f64) -> usize {
    (coord / h + SNAP_EPS).floor().max(0.0) as usize
}

/// Uniformly spaced axis of grid nodes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SingleDimSpec {
    n: usize,
    min: f64,
    max: f64,
    // computed fields
    delta: f64,
}

impl SingleDimSpec {
    pub fn init(n: usize, min: f64, max: f64) -> Result<Self> {
        if n < 2 || !(max > min) {
            return Err(PicError::InvalidConfig(format!(
                "axis needs at least 2 nodes over a positive extent, got {n} nodes on [{min}, {max}]"
            )));
        }
        Ok(Self { n, min, max, delta: (max - min) / (n - 1) as f64 })
    }

    pub fn n(&self) -> usize { self.n }

    pub fn min(&self) -> f64 { self.min }

    pub fn max(&self) -> f64 { self.max }

    pub fn delta(&self) -> f64 { self.delta }

    pub fn coord(&self, i: usize) -> f64 {
        self.min + i as f64 * self.delta
    }

    /// Fractional node index of a physical coordinate.
    pub fn full_index(&self, coord: f64) -> f64 {
        (coord - self.min) / self.delta
    }

    pub fn contains(&self, coord: f64) -> bool {
        coord >= self.min && coord <= self.max
    }

    pub fn clamp(&self, coord: f64) -> f64 {
        coord.clamp(self.min, self.max)
    }
}

/// Biased conductor occupying `[x_wall, x_wall + w_wall] x [0, h_wall]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WallSpec {
    pub x_wall: f64,
    pub w_wall: f64,
    pub h_wall: f64,
}

impl WallSpec {
    pub fn x_max(&self) -> f64 {
        self.x_wall + self.w_wall
    }

    /// True when `pos` lies on or inside the wall rectangle.
    pub fn contains(&self, pos: DVec2) -> bool {
        pos.x >= self.x_wall && pos.x <= self.x_max() && pos.y <= self.h_wall
    }
}

/// Geometry and boundary potentials of the domain.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    /// Node spacing (m).
    pub h: f64,
    pub length: f64,
    pub height: f64,
    pub wall: Option<WallSpec>,
    /// Potential at x = 0 (V).
    pub v_in: f64,
    /// Potential at x = length (V).
    pub v_out: f64,
    /// Potential on the wall (V).
    pub v_wall: f64,
}

impl Default for GridSpec {
    fn default() -> Self {
        let (length, height) = (0.05, 0.02);
        Self {
            h: 1e-4,
            length,
            height,
            wall: Some(WallSpec { x_wall: 0.01, w_wall: length / 5.0, h_wall: height / 5.0 }),
            v_in: 1100.0,
            v_out: -100.0,
            v_wall: 1000.0,
        }
    }
}

impl GridSpec {
    pub fn validate(&self) -> Result<()> {
        let bad = |msg: String| -> Result<()> { Err(PicError::InvalidConfig(msg)) };
        if !(self.h > 0.0 && self.h.is_finite()) {
            return bad(format!("grid spacing must be positive, got {}", self.h));
        }
        for (name, extent) in [("length", self.length), ("height", self.height)] {
            if !(extent > 0.0 && extent.is_finite()) {
                return bad(format!("{name} must be positive, got {extent}"));
            }
            let cells = extent / self.h;
            if (cells - cells.round()).abs() > 1e-6 * cells.max(1.0) {
                return bad(format!("{name} {extent} is not a multiple of h = {}", self.h));
            }
            if cells.round() < 2.0 {
                return bad(format!("{name} {extent} spans fewer than 3 nodes at h = {}", self.h));
            }
        }
        if ![self.v_in, self.v_out, self.v_wall].iter().all(|v| v.is_finite()) {
            return bad("boundary potentials must be finite".to_string());
        }
        if let Some(w) = self.wall {
            if !(w.x_wall >= 0.0 && w.w_wall >= 0.0 && w.h_wall >= 0.0) {
                return bad(format!("wall dimensions must be non-negative: {w:?}"));
            }
            if w.x_max() > self.length || w.h_wall > self.height {
                return bad(format!("wall {w:?} extends past the domain"));
            }
        }
        Ok(())
    }

    /// Node count along x. Nodes sit at `i * h` and include both end faces.
    pub fn nx(&self) -> usize {
        (self.length / self.h).round() as usize + 1
    }

    pub fn ny(&self) -> usize {
        (self.height / self.h).round() as usize + 1
    }
}

/// Boundary-condition class of one node, in precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeClass {
    Inlet,
    Outlet,
    Wall,
    BottomNeumann,
    TopNeumann,
    Interior,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct WallNodes {
    i_min: usize,
    i_max: usize,
    j_max: usize,
}

/// Discrete domain with the assembled Poisson operator `A` and right-hand side `b`.
#[derive(Debug, Clone)]
pub struct Grid {
    spec: GridSpec,
    x_dim: SingleDimSpec,
    y_dim: SingleDimSpec,
    wall_nodes: Option<WallNodes>,
    a: CsrMatrix,
    b: Vec<f64>,
}

impl Grid {
    pub fn build(spec: GridSpec) -> Result<Self> {
        spec.validate()?;
        let x_dim = SingleDimSpec::init(spec.nx(), 0.0, spec.length)?;
        let y_dim = SingleDimSpec::init(spec.ny(), 0.0, spec.height)?;
        let wall_nodes = spec.wall.map(|w| WallNodes {
            i_min: node_floor(w.x_wall, spec.h),
            i_max: node_floor(w.x_max(), spec.h),
            j_max: node_floor(w.h_wall, spec.h),
        });

        let mut grid = Self {
            spec,
            x_dim,
            y_dim,
            wall_nodes,
            a: CsrMatrix::from_triplets(0, 0, &[]),
            b: Vec::new(),
        };
        let (a, b) = grid.assemble();
        info!(
            "Assembled {}x{} grid: {} unknowns, {} nonzeros",
            grid.nx(), grid.ny(), a.n_rows(), a.nnz()
        );
        grid.a = a;
        grid.b = b;
        Ok(grid)
    }

    pub fn spec(&self) -> &GridSpec { &self.spec }

    pub fn x_dim(&self) -> &SingleDimSpec { &self.x_dim }

    pub fn y_dim(&self) -> &SingleDimSpec { &self.y_dim }

    pub fn nx(&self) -> usize { self.x_dim.n }

    pub fn ny(&self) -> usize { self.y_dim.n }

    pub fn h(&self) -> f64 { self.spec.h }

    pub fn length(&self) -> f64 { self.spec.length }

    pub fn height(&self) -> f64 { self.spec.height }

    pub fn wall(&self) -> Option<&WallSpec> { self.spec.wall.as_ref() }

    pub fn a(&self) -> &CsrMatrix { &self.a }

    pub fn b(&self) -> &[f64] { &self.b }

    /// Flattened unknown index of node `(i, j)`.
    pub fn node_id(&self, i: usize, j: usize) -> usize {
        i * self.ny() + j
    }

    pub fn classify(&self, i: usize, j: usize) -> NodeClass {
        let (nx, ny) = (self.nx(), self.ny());
        if i == 0 {
            NodeClass::Inlet
        } else if i == nx - 1 {
            NodeClass::Outlet
        } else if self
            .wall_nodes
            .is_some_and(|w| i >= w.i_min && i <= w.i_max && j <= w.j_max)
        {
            NodeClass::Wall
        } else if j == 0 {
            NodeClass::BottomNeumann
        } else if j == ny - 1 {
            NodeClass::TopNeumann
        } else {
            NodeClass::Interior
        }
    }

    fn assemble(&self) -> (CsrMatrix, Vec<f64>) {
        let (nx, ny) = (self.nx(), self.ny());
        let n = nx * ny;
        let inv_h2 = 1.0 / (self.spec.h * self.spec.h);
        let mut trip: Vec<(usize, usize, f64)> = Vec::with_capacity(5 * n);
        let mut b = vec![0.0; n];

        for i in 0..nx {
            for j in 0..ny {
                let id = self.node_id(i, j);
                match self.classify(i, j) {
                    NodeClass::Inlet => {
                        trip.push((id, id, 1.0));
                        b[id] = self.spec.v_in;
                    }
                    NodeClass::Outlet => {
                        trip.push((id, id, 1.0));
                        b[id] = self.spec.v_out;
                    }
                    NodeClass::Wall => {
                        trip.push((id, id, 1.0));
                        b[id] = self.spec.v_wall;
                    }
                    // V(i,0) = V(i,1)
                    NodeClass::BottomNeumann => {
                        trip.push((id, id, 1.0));
                        trip.push((id, id + 1, -1.0));
                    }
                    // V(i,ny-1) = V(i,ny-2)
                    NodeClass::TopNeumann => {
                        trip.push((id, id, 1.0));
                        trip.push((id, id - 1, -1.0));
                    }
                    NodeClass::Interior => {
                        trip.push((id, id, -4.0 * inv_h2));
                        trip.push((id, id + ny, inv_h2));
                        trip.push((id, id - ny, inv_h2));
                        trip.push((id, id + 1, inv_h2));
                        trip.push((id, id - 1, inv_h2));
                    }
                }
            }
        }

        (CsrMatrix::from_triplets(n, n, &trip), b)
    }

    /// Inlet-to-outlet linear profile in solver ordering, used as the warm start.
    pub fn linear_profile(&self) -> Vec<f64> {
        let (v_in, v_out) = (self.spec.v_in, self.spec.v_out);
        let mut x0 = Vec::with_capacity(self.nx() * self.ny());
        for i in 0..self.nx() {
            let v = v_in + (v_out - v_in) * self.x_dim.coord(i) / self.spec.length;
            x0.extend(std::iter::repeat(v).take(self.ny()));
        }
        x0
    }

    /// Solve `A V = b` once and return `V` addressed as (row = y, column = x).
    pub fn solve_potential(&self, solver: &SolverConfig) -> Result<(TwoDField<f64>, SolveReport)> {
        let (v, report) = sparse::solve(&self.a, &self.b, &self.linear_profile(), solver)?;
        if let Some(k) = v.iter().position(|x| !x.is_finite()) {
            return Err(PicError::SolverFailure(format!("non-finite potential at unknown {k}")));
        }
        info!(
            "Potential solved in {} iterations (relative residual {:.3e})",
            report.iterations, report.relative_residual
        );
        Ok((TwoDField::from_x_major(self.nx(), self.ny(), &v)?, report))
    }
}
