// src/dag/data_region.rs

//! Buffer bookkeeping: which graph nodes use a region, and which devices
//! hold an up-to-date copy of it.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::trace;

use crate::dag::operation::AccessMode;
use crate::types::{BufferId, DeviceId, NodeId};

/// A graph node that reads or writes a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataUser {
    pub node: NodeId,
    pub mode: AccessMode,
    /// The user is a memory requirement (a coherence transition) rather
    /// than a kernel or copy.
    pub is_requirement: bool,
}

#[derive(Debug)]
pub struct DataRegion {
    id: BufferId,
    size: usize,
    users: Mutex<Vec<DataUser>>,
    valid_on: Mutex<BTreeSet<DeviceId>>,
    /// Node whose failed write left the contents undefined. Cleared by the
    /// next successful write that does not read the old contents.
    failed_writer: Mutex<Option<NodeId>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl DataRegion {
    /// A new region whose initial contents live on `initial`.
    pub fn new(id: BufferId, size: usize, initial: DeviceId) -> Arc<Self> {
        Arc::new(Self {
            id,
            size,
            users: Mutex::new(Vec::new()),
            valid_on: Mutex::new(BTreeSet::from([initial])),
            failed_writer: Mutex::new(None),
        })
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn add_user(&self, user: DataUser) {
        lock(&self.users).push(user);
    }

    /// Snapshot of the current users, oldest first.
    pub fn users(&self) -> Vec<DataUser> {
        lock(&self.users).clone()
    }

    pub fn user_count(&self) -> usize {
        lock(&self.users).len()
    }

    pub fn has_user(&self, node: NodeId) -> bool {
        lock(&self.users).iter().any(|u| u.node == node)
    }

    /// Users a new access with `mode` has to be ordered after.
    pub fn conflicting_users(&self, mode: AccessMode) -> Vec<NodeId> {
        lock(&self.users)
            .iter()
            .filter(|u| u.mode.conflicts_with(mode))
            .map(|u| u.node)
            .collect()
    }

    /// The most recent memory requirement registered on this region.
    pub fn last_requirement(&self) -> Option<NodeId> {
        lock(&self.users)
            .iter()
            .rev()
            .find(|u| u.is_requirement)
            .map(|u| u.node)
    }

    /// Drop every user for which `is_dead` holds. Returns how many were removed.
    pub fn release_dead_users(&self, is_dead: impl Fn(NodeId) -> bool) -> usize {
        let mut users = lock(&self.users);
        let before = users.len();
        users.retain(|u| !is_dead(u.node));
        let released = before - users.len();
        if released > 0 {
            trace!(buffer = self.id.0, released, remaining = users.len(), "released dead buffer users");
        }
        released
    }

    pub fn valid_devices(&self) -> BTreeSet<DeviceId> {
        lock(&self.valid_on).clone()
    }

    pub fn is_valid_on(&self, device: DeviceId) -> bool {
        lock(&self.valid_on).contains(&device)
    }

    /// The failed node whose write this region's contents depend on, if any.
    pub fn failed_writer(&self) -> Option<NodeId> {
        *lock(&self.failed_writer)
    }

    pub(crate) fn mark_failed_write(&self, node: NodeId) {
        *lock(&self.failed_writer) = Some(node);
    }

    pub(crate) fn clear_failed_write(&self) {
        if let Some(node) = lock(&self.failed_writer).take() {
            trace!(buffer = self.id.0, failed = %node, "region overwritten after failed write");
        }
    }

    pub(crate) fn set_valid_devices(&self, devices: BTreeSet<DeviceId>) {
        *lock(&self.valid_on) = devices;
    }
}
