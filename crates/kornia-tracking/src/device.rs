//! Device memory accounting for kernel buffers.
//!
//! Kernels read and write [`DeviceBuffer`]s. Every buffer reserves its size on
//! the owning [`Device`] when it is created and gives it back when it is
//! dropped, so a buffer scoped to a frame is released on every exit path,
//! including `?` early returns.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use thiserror::Error;

/// An error type for device memory operations.
#[derive(Debug, Error, PartialEq)]
pub enum DeviceError {
    /// The allocation would exceed the device memory budget.
    #[error("out of device memory: requested {requested} bytes, {available} bytes available")]
    OutOfMemory {
        /// Size of the failed allocation in bytes.
        requested: usize,
        /// Bytes left in the budget at the time of the request.
        available: usize,
    },

    /// The allocation size overflows `usize`.
    #[error("allocation of {0} elements overflows the address space")]
    CapacityOverflow(usize),
}

#[derive(Debug)]
struct DeviceMemory {
    allocated: AtomicUsize,
    peak: AtomicUsize,
    budget: AtomicUsize,
}

/// Handle to the memory pool the kernels allocate from.
///
/// Cloning the handle is cheap and every clone shares the same accounting.
#[derive(Debug, Clone)]
pub struct Device {
    memory: Arc<DeviceMemory>,
}

impl Default for Device {
    fn default() -> Self {
        Self::new()
    }
}

impl Device {
    /// Create a device without a memory budget.
    pub fn new() -> Self {
        Self {
            memory: Arc::new(DeviceMemory {
                allocated: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                budget: AtomicUsize::new(usize::MAX),
            }),
        }
    }

    /// Create a device that refuses allocations beyond `bytes` live bytes.
    pub fn with_budget(bytes: usize) -> Self {
        let device = Self::new();
        device.set_budget(Some(bytes));
        device
    }

    /// Change the memory budget. `None` removes the limit.
    pub fn set_budget(&self, bytes: Option<usize>) {
        self.memory
            .budget
            .store(bytes.unwrap_or(usize::MAX), Ordering::SeqCst);
    }

    /// Bytes currently held by live buffers.
    pub fn allocated_bytes(&self) -> usize {
        self.memory.allocated.load(Ordering::SeqCst)
    }

    /// Highest value ever reached by [`Device::allocated_bytes`].
    pub fn peak_bytes(&self) -> usize {
        self.memory.peak.load(Ordering::SeqCst)
    }

    fn reserve(&self, bytes: usize) -> Result<(), DeviceError> {
        let budget = self.memory.budget.load(Ordering::SeqCst);
        self.memory
            .allocated
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                current.checked_add(bytes).filter(|total| *total <= budget)
            })
            .map_err(|current| DeviceError::OutOfMemory {
                requested: bytes,
                available: budget.saturating_sub(current),
            })?;
        self.memory
            .peak
            .fetch_max(self.allocated_bytes(), Ordering::SeqCst);
        Ok(())
    }

    /// Move a host vector into a device buffer.
    pub fn from_vec<T>(&self, data: Vec<T>) -> Result<DeviceBuffer<T>, DeviceError> {
        let bytes = data
            .len()
            .checked_mul(std::mem::size_of::<T>())
            .ok_or(DeviceError::CapacityOverflow(data.len()))?;
        self.reserve(bytes)?;
        Ok(DeviceBuffer {
            data,
            bytes,
            memory: self.memory.clone(),
        })
    }

    /// Copy a host slice into a new device buffer.
    pub fn upload<T: Clone>(&self, data: &[T]) -> Result<DeviceBuffer<T>, DeviceError> {
        self.from_vec(data.to_vec())
    }

    /// Allocate a buffer of `len` elements initialised to `val`.
    pub fn alloc<T: Clone>(&self, len: usize, val: T) -> Result<DeviceBuffer<T>, DeviceError> {
        let bytes = len
            .checked_mul(std::mem::size_of::<T>())
            .ok_or(DeviceError::CapacityOverflow(len))?;
        // reserve before touching host memory so oversized requests fail cheaply
        self.reserve(bytes)?;
        Ok(DeviceBuffer {
            data: vec![val; len],
            bytes,
            memory: self.memory.clone(),
        })
    }
}

/// A buffer owned by a [`Device`], released when dropped.
#[derive(Debug)]
pub struct DeviceBuffer<T> {
    data: Vec<T>,
    bytes: usize,
    memory: Arc<DeviceMemory>,
}

impl<T> DeviceBuffer<T> {
    /// Number of elements in the buffer.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the buffer holds no elements.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Size of the buffer in bytes.
    pub fn size_in_bytes(&self) -> usize {
        self.bytes
    }

    /// Read-only view of the buffer contents.
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// Mutable view of the buffer contents.
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Copy the contents back to host memory.
    pub fn to_vec(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.data.clone()
    }
}

impl<T> Drop for DeviceBuffer<T> {
    fn drop(&mut self) {
        self.memory.allocated.fetch_sub(self.bytes, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_release_on_drop() -> Result<(), DeviceError> {
        let device = Device::new();
        {
            let a = device.alloc(16, 0f32)?;
            let b = device.upload(&[1u8, 2, 3])?;
            assert_eq!(a.size_in_bytes(), 64);
            assert_eq!(b.as_slice(), &[1, 2, 3]);
            assert_eq!(device.allocated_bytes(), 67);
        }
        assert_eq!(device.allocated_bytes(), 0);
        assert_eq!(device.peak_bytes(), 67);
        Ok(())
    }

    #[test]
    fn test_budget() -> Result<(), DeviceError> {
        let device = Device::with_budget(100);
        let _a = device.alloc(20, 0f32)?;
        let res = device.alloc(10, 0f32);
        assert_eq!(
            res.err(),
            Some(DeviceError::OutOfMemory {
                requested: 40,
                available: 20
            })
        );
        assert_eq!(device.allocated_bytes(), 80);

        device.set_budget(None);
        let _b = device.alloc(10, 0f32)?;
        assert_eq!(device.allocated_bytes(), 120);
        Ok(())
    }
}
