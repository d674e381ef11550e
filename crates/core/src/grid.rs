//! Frame geometry
//!
//! A frame is one full-grid scalar snapshot. Samples are stored z-slowest and
//! x-fastest, so a single z-plane is a contiguous run of `nx * ny` samples.

use serde::{Deserialize, Serialize};

/// Dimensions of the simulation window captured in every frame
///
/// Planar (2D) grids use `ny = 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridDims {
    /// Samples along x (fastest axis)
    pub nx: usize,
    /// Samples along y
    pub ny: usize,
    /// Samples along z (slowest axis, the lossy codec block axis)
    pub nz: usize,
}

impl GridDims {
    /// Create 3D dimensions
    #[must_use]
    pub const fn new(nx: usize, ny: usize, nz: usize) -> Self {
        Self { nx, ny, nz }
    }

    /// Create 2D dimensions in the x-z plane
    #[must_use]
    pub const fn planar(nx: usize, nz: usize) -> Self {
        Self { nx, ny: 1, nz }
    }

    /// Number of samples in one frame (`W`)
    #[must_use]
    pub const fn volume(&self) -> usize {
        self.nx * self.ny * self.nz
    }

    /// [`Self::volume`], or `None` if it overflows `usize`
    #[must_use]
    pub const fn checked_volume(&self) -> Option<usize> {
        match self.nx.checked_mul(self.ny) {
            Some(plane) => plane.checked_mul(self.nz),
            None => None,
        }
    }

    /// Number of samples in one z-plane
    #[must_use]
    pub const fn plane_len(&self) -> usize {
        self.nx * self.ny
    }

    /// `true` when every axis has more than one sample
    #[must_use]
    pub const fn is_volumetric(&self) -> bool {
        self.nx > 1 && self.ny > 1 && self.nz > 1
    }

    /// `true` when no axis is empty
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.nx > 0 && self.ny > 0 && self.nz > 0
    }

    /// Flat index of `(x, y, z)`
    ///
    /// # Panics
    ///
    /// Panics if coordinates are out of bounds
    #[must_use]
    pub fn index(&self, x: usize, y: usize, z: usize) -> usize {
        assert!(
            x < self.nx && y < self.ny && z < self.nz,
            "Coordinates out of bounds"
        );
        (z * self.ny + y) * self.nx + x
    }
}
