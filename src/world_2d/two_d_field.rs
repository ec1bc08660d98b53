use glam::DVec2;
use std::ops::{Add, Mul};

use crate::error::{PicError, Result};

// Row-major storage with y as the row index: data[iy * nx + ix]

#[derive(Debug, Clone, PartialEq)]
pub struct TwoDField <T> {
    nx: usize,
    ny: usize,
    data: Vec<T>,
}

impl<T> TwoDField <T>
    where
    T: Clone + Copy + Add<Output = T> + Mul<f64, Output = T>
{

    pub fn init(nx: usize, ny: usize, val: T) -> Self {
        TwoDField {nx, ny, data: vec![val; nx * ny],}
    }

    pub fn from_vec(nx: usize, ny: usize, data: Vec<T>) -> Result<Self> {
        if data.len() != nx * ny {
            return Err(PicError::ShapeMismatch { expected: nx * ny, found: data.len() });
        }
        Ok(TwoDField {nx, ny, data})
    }

    pub fn set_all(&mut self, val : T) {
        self.data.fill(val);
    }

    fn idx(&self, ix: usize, iy: usize) -> usize {
        assert!(ix < self.nx, "x index ({ix}) out of bounds [0, {})", self.nx);
        assert!(iy < self.ny, "y index ({iy}) out of bounds [0, {})", self.ny);

        iy * self.nx + ix
    }

    pub fn get(&self, ix: usize, iy: usize) ->  T {
        self.data[self.idx(ix, iy)]
    }

    pub fn set(&mut self, ix: usize, iy: usize, val: T) {
        let idx = self.idx(ix, iy);
        self.data[idx] = val;
    }

    /// One row of constant y, ordered by increasing x.
    pub fn row(&self, iy: usize) -> &[T] {
        let start = self.idx(0, iy);
        &self.data[start..start + self.nx]
    }

    /// Bilinear interpolation at a fractional node index.
    ///
    /// `full_idx` carries both the integer cell and the fractional offset
    /// within it. The caller guarantees `0 <= full_idx < n - 1` on each axis
    /// up to the closing face, which maps onto the last cell with offset 1.
    pub fn linear_interpolate(&self, full_idx : DVec2) -> T {
        let ix = (full_idx.x.max(0.0) as usize).min(self.nx.saturating_sub(2));
        let fix = full_idx.x - (ix as f64);
        let iy = (full_idx.y.max(0.0) as usize).min(self.ny.saturating_sub(2));
        let fiy = full_idx.y - (iy as f64);

        let ix1 = (ix + 1).min(self.nx - 1);
        let iy1 = (iy + 1).min(self.ny - 1);

        self.get(ix,  iy)  * ((1.0 - fix) * (1.0 - fiy)) +
        self.get(ix,  iy1) * ((1.0 - fix) * fiy) +
        self.get(ix1, iy)  * (fix * (1.0 - fiy)) +
        self.get(ix1, iy1) * (fix * fiy)
    }

    pub fn nx(&self) -> usize { self.nx }

    pub fn ny(&self) -> usize { self.ny }

    pub fn len(&self) -> usize { self.data.len() }

    pub fn is_empty(&self) -> bool { self.data.is_empty() }

    pub fn data(&self) -> &[T] { &self.data }

    /// Flatten into the linear-system ordering `id = ix * ny + iy`.
    pub fn to_x_major(&self) -> Vec<T> {
        let mut vec = Vec::with_capacity(self.len());
        for ix in 0..self.nx {
            for iy in 0..self.ny {
                vec.push(self.get(ix, iy));
            }
        }
        vec
    }

    /// Inverse of [`TwoDField::to_x_major`].
    pub fn from_x_major(nx: usize, ny: usize, vec: &[T]) -> Result<Self> {
        if vec.len() != nx * ny {
            return Err(PicError::ShapeMismatch { expected: nx * ny, found: vec.len() });
        }
        let mut data = Vec::with_capacity(vec.len());
        for iy in 0..ny {
            for ix in 0..nx {
                data.push(vec[ix * ny + iy]);
            }
        }
        Ok(TwoDField {nx, ny, data})
    }

    pub fn map<U, F>(&self, f: F) -> TwoDField<U>
        where F: Fn(T) -> U
    {
        TwoDField { nx: self.nx, ny: self.ny, data: self.data.iter().map(|v| f(*v)).collect() }
    }
}
