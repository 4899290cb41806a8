//! Host-memory buffer handle with explicit length tracking.
use bytemuck::Pod;

use crate::error::{Error, Result};

/// Owns a fixed-length block of `T` and reallocates only when the requested length changes.
#[derive(Debug, Clone)]
pub struct HostBuffer<T: Pod> {
    data: Vec<T>,
    allocations: u64,
}

impl<T: Pod> Default for HostBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Pod> HostBuffer<T> {
    pub fn new() -> Self {
        Self {
            data: Vec::new(),
            allocations: 0,
        }
    }

    /// Last allocated element count.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn allocations(&self) -> u64 {
        self.allocations
    }

    /// Copies `src` in, replacing the allocation first if its length differs.
    pub fn upload(&mut self, src: &[T]) {
        if src.len() != self.data.len() {
            self.data = vec![T::zeroed(); src.len()];
            self.allocations += 1;
        }
        self.data.copy_from_slice(src);
    }

    /// Copies the buffer into `out`, which must have the same length.
    pub fn download(&self, out: &mut [T]) -> Result<()> {
        if out.len() != self.data.len() {
            return Err(Error::Device(format!(
                "readback length {} does not match buffer length {}",
                out.len(),
                self.data.len()
            )));
        }
        out.copy_from_slice(&self.data);
        Ok(())
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn release(&mut self) {
        self.data = Vec::new();
    }
}
