//! Picking a ready container and quarantining misbehaving ones

use crate::error::ControllerError;
use crate::pool::{ManagedContainer, Pool};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::warn;

/// Source of probe indices for container selection
pub trait IndexSource: Send + Sync {
    /// Return an index in `0..len`. `len` is never zero.
    fn pick(&self, len: usize) -> usize;
}

/// Uniform pseudo-random indices from a generator seeded once at construction.
///
/// Not cryptographically strong; only used to spread requests.
#[derive(Debug)]
pub struct RandomIndex {
    rng: Mutex<StdRng>,
}

impl RandomIndex {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic sequence, for reproducible runs
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Default for RandomIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexSource for RandomIndex {
    fn pick(&self, len: usize) -> usize {
        self.rng.lock().gen_range(0..len)
    }
}

impl Pool {
    /// Choose a started, non-dirty container.
    ///
    /// Makes up to `probes` random picks over the whole pool, then falls back
    /// to the first ready entry in pool order.
    pub fn select_ready(
        &self,
        probes: usize,
        source: &dyn IndexSource,
    ) -> Result<&ManagedContainer, ControllerError> {
        let len = self.containers.len();
        if len == 0 {
            return Err(ControllerError::NoReadyContainers { pool_size: 0 });
        }

        for _ in 0..probes {
            // Guard against sources that ignore the bound
            let candidate = &self.containers[source.pick(len) % len];
            if candidate.is_ready() {
                return Ok(candidate);
            }
        }

        self.containers
            .iter()
            .find(|c| c.is_ready())
            .ok_or(ControllerError::NoReadyContainers { pool_size: len })
    }

    /// Quarantine the container with this id. Returns false when no entry matches.
    ///
    /// Dirty is one-way; nothing clears it.
    pub fn mark_dirty(&self, id: &str) -> bool {
        match self.containers.iter().find(|c| c.id() == id) {
            Some(container) => {
                container.mark_dirty();
                warn!(container = %container.name(), container_id = id, "Container marked dirty");
                true
            }
            None => false,
        }
    }
}
