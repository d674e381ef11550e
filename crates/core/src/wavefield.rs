//! Kernel working set
//!
//! During the forward sweep the kernel reads and writes inside the device ring
//! (through the leases returned by `save_forward`). During the backward sweep
//! it recomputes its own field in private buffers held here.

use crate::config::EquationOrder;
use crate::grid::GridDims;

/// Where the kernel's current/next/previous wavefields live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WavefieldBinding {
    /// Inside the device ring, so step results land in the checkpoint path
    Checkpoint,
    /// In the kernel's own buffers
    Private,
}

/// Private wavefield buffers of a stencil kernel
#[derive(Debug, Clone)]
pub struct Wavefield {
    /// Field being read this step
    pub current: Vec<f32>,
    /// Field being written this step
    pub next: Vec<f32>,
    /// Field one step before `current` (second order only)
    pub previous: Option<Vec<f32>>,
    dims: GridDims,
    binding: WavefieldBinding,
}

impl Wavefield {
    /// Zeroed private buffers
    #[must_use]
    pub fn new(dims: GridDims, order: EquationOrder) -> Self {
        let len = dims.volume();
        Self {
            current: vec![0.0; len],
            next: vec![0.0; len],
            previous: matches!(order, EquationOrder::Second).then(|| vec![0.0; len]),
            dims,
            binding: WavefieldBinding::Private,
        }
    }

    /// Grid of every buffer
    #[must_use]
    pub fn dims(&self) -> GridDims {
        self.dims
    }

    /// Current binding
    #[must_use]
    pub fn binding(&self) -> WavefieldBinding {
        self.binding
    }

    /// Apply a binding returned by `ReplayEngine::reset_grid`
    ///
    /// Switching to private buffers zeroes them, so the backward sweep starts
    /// from a clean field.
    pub fn rebind(&mut self, binding: WavefieldBinding) {
        self.binding = binding;
        if binding == WavefieldBinding::Private {
            self.zero();
        }
    }

    /// Zero every buffer
    pub fn zero(&mut self) {
        self.current.fill(0.0);
        self.next.fill(0.0);
        if let Some(previous) = &mut self.previous {
            previous.fill(0.0);
        }
    }

    /// Rotate buffers after a step: `next` becomes `current`
    pub fn advance(&mut self) {
        match &mut self.previous {
            Some(previous) => {
                std::mem::swap(previous, &mut self.current);
                std::mem::swap(&mut self.current, &mut self.next);
            }
            None => std::mem::swap(&mut self.current, &mut self.next),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rebind_private_zeroes() {
        let mut field = Wavefield::new(GridDims::planar(4, 4), EquationOrder::Second);
        field.rebind(WavefieldBinding::Checkpoint);
        field.current.fill(1.0);
        field.previous.as_mut().unwrap().fill(2.0);

        field.rebind(WavefieldBinding::Checkpoint);
        assert!(field.current.iter().all(|&v| v == 1.0));

        field.rebind(WavefieldBinding::Private);
        assert_eq!(field.binding(), WavefieldBinding::Private);
        assert!(field.current.iter().all(|&v| v == 0.0));
        assert!(field.previous.as_ref().unwrap().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_advance_rotates_second_order() {
        let mut field = Wavefield::new(GridDims::planar(1, 1), EquationOrder::Second);
        field.current[0] = 1.0;
        field.next[0] = 2.0;
        field.advance();
        assert_eq!(field.previous.as_ref().unwrap()[0], 1.0);
        assert_eq!(field.current[0], 2.0);
    }

    #[test]
    fn test_advance_swaps_first_order() {
        let mut field = Wavefield::new(GridDims::planar(1, 1), EquationOrder::First);
        assert!(field.previous.is_none());
        field.next[0] = 5.0;
        field.advance();
        assert_eq!(field.current[0], 5.0);
        assert_eq!(field.next[0], 0.0);
    }
}
