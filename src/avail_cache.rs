//! Availability cache: per (user, kind), the IDs whose prerequisites are met.
//!
//! This is an authoritative precomputed set, rebuilt in the background, not a
//! memoised function. Readers tolerate one refresh window of staleness and
//! compute synchronously when an entry is missing.
//!
//! Deck-wide refreshes are bunched per user: at most one runs per user per
//! window, and triggers landing inside the window are coalesced into a single
//! deferred rerun.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::domain::{EntityKind, UserId};
use crate::error::{EngineError, Result};

#[derive(Clone, Debug, PartialEq)]
pub struct CacheEntry {
    pub ids: BTreeSet<u64>,
    pub refreshed_at: DateTime<Utc>,
}

/// Outcome of asking whether a deck-wide refresh may touch a user now.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BulkGate {
    Run,
    /// Already refreshed in this window; a deferred rerun is due at the given time.
    Coalesced { due: DateTime<Utc> },
}

#[derive(Clone, Debug, Default)]
pub struct AvailabilityCache {
    entries: HashMap<(UserId, EntityKind), CacheEntry>,
    last_bulk: HashMap<UserId, DateTime<Utc>>,
    deferred: BTreeSet<UserId>,
    rerun_scheduled: bool,
}

impl AvailabilityCache {
    pub fn get(&self, user: UserId, kind: EntityKind) -> Result<&CacheEntry> {
        self.entries.get(&(user, kind)).ok_or(EngineError::CacheMiss(user))
    }

    /// Replace the entry wholesale.
    pub fn put(&mut self, user: UserId, kind: EntityKind, ids: BTreeSet<u64>, now: DateTime<Utc>) {
        debug!(target: "cache", user_id = user, %kind, size = ids.len(), "Availability entry stored");
        self.entries.insert((user, kind), CacheEntry { ids, refreshed_at: now });
    }

    pub fn invalidate(&mut self, user: UserId) {
        self.entries.retain(|(u, _), _| *u != user);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Decide whether a deck-wide refresh may recompute `user` now, recording
    /// the run or the deferral.
    pub fn bulk_gate(&mut self, user: UserId, now: DateTime<Utc>, window: Duration) -> BulkGate {
        match self.last_bulk.get(&user) {
            Some(last) if now - *last < window => {
                self.deferred.insert(user);
                BulkGate::Coalesced { due: *last + window }
            }
            _ => {
                self.last_bulk.insert(user, now);
                self.deferred.remove(&user);
                BulkGate::Run
            }
        }
    }

    /// Claim the single deferred rerun. Returns false if one is already scheduled.
    pub fn schedule_rerun(&mut self) -> bool {
        if self.rerun_scheduled || self.deferred.is_empty() {
            return false;
        }
        self.rerun_scheduled = true;
        true
    }

    /// Take the users waiting on the deferred rerun.
    pub fn take_deferred(&mut self) -> BTreeSet<UserId> {
        self.rerun_scheduled = false;
        std::mem::take(&mut self.deferred)
    }
}
