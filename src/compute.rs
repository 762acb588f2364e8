//! CPU compute substrate.
//!
//! Stages are written as workgroup dispatches over a rayon pool so that the
//! CPU path mirrors the Metal kernels one-to-one: a dispatch returns only
//! after every group has finished, which is the barrier between stages.

use std::marker::PhantomData;
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;

use crate::error::{MeshSplatError, Result};

pub const THREADS_PER_GROUP_1D: u32 = 256;

pub fn div_ceil_u32(value: u32, divisor: u32) -> u32 {
    value.div_ceil(divisor)
}

/// Explicit execution context handed to every stage; owns the worker pool.
#[derive(Debug)]
pub struct ComputeContext {
    pool: rayon::ThreadPool,
}

impl ComputeContext {
    /// `threads == None` sizes the pool to the machine.
    pub fn new(threads: Option<usize>) -> Result<Self> {
        let mut builder = rayon::ThreadPoolBuilder::new()
            .thread_name(|i| format!("meshsplat-compute-{i}"));
        if let Some(n) = threads {
            if n == 0 {
                return Err(MeshSplatError::InvalidConfig(
                    "thread count must be at least 1".to_string(),
                ));
            }
            builder = builder.num_threads(n);
        }
        let pool = builder
            .build()
            .map_err(|e| MeshSplatError::Other(format!("failed to build thread pool: {e}")))?;
        log::debug!("compute context ready with {} threads", pool.current_num_threads());
        Ok(Self { pool })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    pub fn install<R, F>(&self, op: F) -> R
    where
        R: Send,
        F: FnOnce() -> R + Send,
    {
        self.pool.install(op)
    }
}

/// Runs `kernel(group_id, element_range)` for every workgroup covering `count` elements.
pub fn dispatch_1d<F>(count: usize, threads_per_group: u32, kernel: F)
where
    F: Fn(usize, Range<usize>) + Sync + Send,
{
    if count == 0 {
        return;
    }
    let group_size = threads_per_group.max(1) as usize;
    let groups = count.div_ceil(group_size);
    (0..groups).into_par_iter().for_each(|group| {
        let start = group * group_size;
        let end = (start + group_size).min(count);
        kernel(group, start..end);
    });
}

/// Atomic slot allocator over a fixed-capacity arena.
///
/// Every successful `reserve` hands out a distinct index below `capacity`.
/// Requests past capacity are refused and are not counted in `len`, so the
/// visible count saturates at `capacity`.
#[derive(Debug)]
pub struct AppendCounter {
    requested: AtomicUsize,
    capacity: usize,
}

impl AppendCounter {
    pub fn new(capacity: usize) -> Self {
        Self {
            requested: AtomicUsize::new(0),
            capacity,
        }
    }

    pub fn reserve(&self) -> Option<usize> {
        let slot = self.requested.fetch_add(1, Ordering::Relaxed);
        (slot < self.capacity).then_some(slot)
    }

    pub fn len(&self) -> usize {
        self.requested.load(Ordering::Acquire).min(self.capacity)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Appends that were refused because the arena was full.
    pub fn dropped(&self) -> usize {
        self.requested
            .load(Ordering::Acquire)
            .saturating_sub(self.capacity)
    }

    pub fn reset(&mut self) {
        *self.requested.get_mut() = 0;
    }
}

/// View of a slice shared by many workers, each touching distinct indices.
pub struct ScatterSlice<'a, T> {
    ptr: *mut T,
    len: usize,
    _marker: PhantomData<&'a mut [T]>,
}

// SAFETY: the view only hands out writes of `Copy` values; callers guarantee that
// no two workers target the same index within one dispatch.
unsafe impl<T: Copy + Send> Send for ScatterSlice<'_, T> {}
unsafe impl<T: Copy + Send> Sync for ScatterSlice<'_, T> {}

impl<'a, T: Copy> ScatterSlice<'a, T> {
    pub fn new(slice: &'a mut [T]) -> Self {
        Self {
            ptr: slice.as_mut_ptr(),
            len: slice.len(),
            _marker: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// # Safety
    /// No other worker may write `index` during the same dispatch.
    pub unsafe fn write(&self, index: usize, value: T) {
        assert!(index < self.len, "scatter index {index} out of bounds {}", self.len);
        self.ptr.add(index).write(value);
    }

    /// # Safety
    /// No other worker may write `index` during the same dispatch.
    pub unsafe fn read(&self, index: usize) -> T {
        assert!(index < self.len, "scatter index {index} out of bounds {}", self.len);
        self.ptr.add(index).read()
    }
}
