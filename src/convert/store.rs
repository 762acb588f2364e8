//! Append-only Gaussian arena and the sealed store that frames read from.

use crate::compute::{AppendCounter, ScatterSlice};
use crate::splat::Gaussian;

/// Fixed-capacity arena written concurrently during conversion.
#[derive(Debug)]
pub struct GaussianArena {
    slots: Vec<Gaussian>,
    counter: AppendCounter,
}

impl GaussianArena {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: vec![Gaussian::default(); capacity],
            counter: AppendCounter::new(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.counter.capacity()
    }

    /// Shared append handle for one conversion dispatch.
    pub fn writer(&mut self) -> ArenaWriter<'_> {
        ArenaWriter {
            slots: ScatterSlice::new(&mut self.slots),
            counter: &self.counter,
        }
    }

    /// Flushes the arena into an immutable store. The visible length is the
    /// clamped append count; refused appends are reported as dropped.
    pub fn seal(mut self) -> GaussianStore {
        let len = self.counter.len();
        let dropped = self.counter.dropped();
        let capacity = self.counter.capacity();
        self.slots.truncate(len);
        self.slots.shrink_to_fit();
        if dropped > 0 {
            log::warn!("gaussian arena full: kept {len}, dropped {dropped} (capacity {capacity})");
        }
        GaussianStore {
            gaussians: self.slots,
            capacity,
            dropped,
        }
    }
}

pub struct ArenaWriter<'a> {
    slots: ScatterSlice<'a, Gaussian>,
    counter: &'a AppendCounter,
}

impl ArenaWriter<'_> {
    /// Returns `false` when the arena is already full and the record was discarded.
    pub fn append(&self, gaussian: Gaussian) -> bool {
        match self.counter.reserve() {
            Some(slot) => {
                // SAFETY: `reserve` hands out every slot index at most once.
                unsafe { self.slots.write(slot, gaussian) };
                true
            }
            None => false,
        }
    }
}

/// Conversion output. Length is final; frames only ever read it.
#[derive(Debug, Clone, Default)]
pub struct GaussianStore {
    gaussians: Vec<Gaussian>,
    capacity: usize,
    dropped: usize,
}

impl GaussianStore {
    pub fn from_gaussians(gaussians: Vec<Gaussian>) -> Self {
        let capacity = gaussians.len();
        Self {
            gaussians,
            capacity,
            dropped: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.gaussians.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gaussians.is_empty()
    }

    /// Worst-case size the arena was allocated for.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn gaussians(&self) -> &[Gaussian] {
        &self.gaussians
    }

    pub fn into_gaussians(self) -> Vec<Gaussian> {
        self.gaussians
    }
}
