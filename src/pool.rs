//! In-memory container pool
//!
//! The pool is populated once during initialization and never resized.
//! Lifecycle operations (see `lifecycle`) flip containers between started and
//! stopped in place; selection (see `selection`) reads it and may quarantine
//! entries by marking them dirty.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};

/// A container owned by the pool
#[derive(Debug)]
pub struct ManagedContainer {
    name: String,
    id: String,
    started: bool,
    /// Set after a failed dispatch. Written under the shared lock, hence atomic.
    dirty: AtomicBool,
    /// Empty whenever `started` is false
    address: String,
}

impl ManagedContainer {
    /// A freshly created container: not started, not dirty, no address
    pub(crate) fn created(name: String, id: String) -> Self {
        Self {
            name,
            id,
            started: false,
            dirty: AtomicBool::new(false),
            address: String::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Network address, empty when not started
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Started and not dirty
    pub fn is_ready(&self) -> bool {
        self.started && !self.is_dirty()
    }

    pub(crate) fn mark_started(&mut self, address: String) {
        self.started = true;
        self.address = address;
    }

    pub(crate) fn mark_stopped(&mut self) {
        self.started = false;
        self.address.clear();
    }

    pub(crate) fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    pub fn status(&self) -> ContainerStatus {
        ContainerStatus {
            name: self.name.clone(),
            id: self.id.clone(),
            started: self.started,
            dirty: self.is_dirty(),
            address: self.address.clone(),
        }
    }
}

/// Point-in-time copy of a container's state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerStatus {
    pub name: String,
    pub id: String,
    pub started: bool,
    pub dirty: bool,
    pub address: String,
}

/// Ordered set of managed containers plus the naming sequence
#[derive(Debug, Default)]
pub struct Pool {
    /// Creation order; indices are stable
    pub(crate) containers: Vec<ManagedContainer>,
    /// Last sequence number handed out. Never reused, even after failed creates.
    pub(crate) sequence: u64,
}

impl Pool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.containers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn containers(&self) -> &[ManagedContainer] {
        &self.containers
    }

    pub fn get(&self, id: &str) -> Option<&ManagedContainer> {
        self.containers.iter().find(|c| c.id == id)
    }

    /// Whether a dynamic pool needs waking.
    ///
    /// Only the first entry is consulted. An empty pool is never dormant.
    pub fn is_dormant(&self) -> bool {
        self.containers.first().is_some_and(|c| !c.started)
    }

    pub fn ready_count(&self) -> usize {
        self.containers.iter().filter(|c| c.is_ready()).count()
    }

    pub fn snapshot(&self) -> Vec<ContainerStatus> {
        self.containers.iter().map(ManagedContainer::status).collect()
    }

    /// Post-increment the sequence and derive the next container name
    pub(crate) fn next_name(&mut self, deployment: &str) -> String {
        self.sequence += 1;
        format!("{}-{}", deployment, self.sequence)
    }
}
