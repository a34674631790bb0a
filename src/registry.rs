//! Active profiling scopes
//!
//! The [`ScopeRegistry`] is an ordinary value, usually shared behind an
//! `Arc`: each [`Profiler`](crate::profiler::Profiler) owns one, and tests
//! build isolated ones. A scope id is present iff its session is open.
//!
//! # Locking
//!
//! Events are validated and normalized before any lock is taken. Delivery
//! then holds the registry lock while it records into each accumulator,
//! so a scope can never be deactivated halfway through an event. Locks are
//! always taken registry → accumulator, never the other way round. Poisoned locks are recovered: a panicking profiled block
//! must not wedge every other session in the process.

use crate::accumulator::StatisticsAccumulator;
use crate::error::{ProfilerError, Result};
use crate::event::QueryEvent;
use crate::normalizer::analyze;
use crate::stats::Stats;
use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace, warn};

/// Identity of one profiling scope: caller label plus a sequence number
///
/// Ordered by sequence first, so iteration follows activation order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScopeId {
    seq: u64,
    label: String,
}

impl ScopeId {
    pub fn new(label: impl Into<String>, seq: u64) -> Self {
        Self {
            seq,
            label: label.into(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.label, self.seq)
    }
}

/// Shared handle to one scope's accumulator
#[derive(Debug, Clone)]
pub struct AccumulatorHandle {
    scope_id: ScopeId,
    inner: Arc<Mutex<StatisticsAccumulator>>,
}

impl AccumulatorHandle {
    fn new(scope_id: ScopeId) -> Self {
        let accumulator = StatisticsAccumulator::new(scope_id.clone());
        Self {
            scope_id,
            inner: Arc::new(Mutex::new(accumulator)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StatisticsAccumulator> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn scope_id(&self) -> &ScopeId {
        &self.scope_id
    }

    pub fn record(&self, event: &QueryEvent) -> Result<()> {
        self.lock().record(event)
    }

    pub fn freeze(&self) -> Result<Stats> {
        self.lock().freeze()
    }

    pub fn snapshot(&self) -> Stats {
        self.lock().snapshot()
    }

    pub fn query_count(&self) -> usize {
        self.lock().query_count()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().is_closed()
    }
}

/// Registry of currently open profiling scopes
#[derive(Debug, Default)]
pub struct ScopeRegistry {
    scopes: Mutex<BTreeMap<ScopeId, AccumulatorHandle>>,
    /// Mirrors `scopes.len()`; lets idle delivery skip normalization
    active: AtomicUsize,
    next_seq: AtomicU64,
    leaked: AtomicU64,
}

impl ScopeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_scopes(&self) -> MutexGuard<'_, BTreeMap<ScopeId, AccumulatorHandle>> {
        self.scopes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mint a scope id unique within this registry. Sequence numbers start at 1.
    pub fn next_scope_id(&self, label: &str) -> ScopeId {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed) + 1;
        ScopeId::new(label, seq)
    }

    /// Create and register a fresh accumulator for `scope_id`
    ///
    /// # Errors
    /// `DuplicateScope` if the id is already active.
    pub fn activate(&self, scope_id: ScopeId) -> Result<AccumulatorHandle> {
        let mut scopes = self.lock_scopes();
        match scopes.entry(scope_id) {
            Entry::Occupied(entry) => Err(ProfilerError::DuplicateScope {
                scope: entry.key().to_string(),
            }),
            Entry::Vacant(entry) => {
                let handle = AccumulatorHandle::new(entry.key().clone());
                entry.insert(handle.clone());
                self.active.store(scopes.len(), Ordering::Release);
                debug!(scope = %handle.scope_id(), active = scopes.len(), "scope activated");
                Ok(handle)
            }
        }
    }

    /// Remove the accumulator for `scope_id` so it can be frozen
    ///
    /// # Errors
    /// `UnknownScope` if the id is not active.
    pub fn deactivate(&self, scope_id: &ScopeId) -> Result<AccumulatorHandle> {
        let mut scopes = self.lock_scopes();
        let handle = scopes
            .remove(scope_id)
            .ok_or_else(|| ProfilerError::UnknownScope {
                scope: scope_id.to_string(),
            })?;
        self.active.store(scopes.len(), Ordering::Release);
        debug!(scope = %scope_id, active = scopes.len(), "scope deactivated");
        Ok(handle)
    }

    pub fn is_active(&self, scope_id: &ScopeId) -> bool {
        self.lock_scopes().contains_key(scope_id)
    }

    /// Handles for every open scope, in activation order
    pub fn active_accumulators(&self) -> Vec<AccumulatorHandle> {
        self.lock_scopes().values().cloned().collect()
    }

    pub fn active_scopes(&self) -> Vec<ScopeId> {
        self.lock_scopes().keys().cloned().collect()
    }

    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Record `event` into every open scope
    ///
    /// Returns how many scopes received it. Nothing is normalized when no
    /// scope is open.
    ///
    /// # Errors
    /// `InvalidEvent` for malformed timing (checked only when some scope is
    /// open); `AccumulatorClosed` if an active accumulator was frozen out of
    /// band. Every other scope still records the event.
    pub fn deliver(&self, event: &QueryEvent) -> Result<usize> {
        self.fan_out(event, None)
    }

    /// Record `event` only into those of `targets` that are still open
    ///
    /// Used by the hook, which decides at statement start which scopes a
    /// statement belongs to. Errors as for [`deliver`](Self::deliver).
    pub fn deliver_to(&self, event: &QueryEvent, targets: &[ScopeId]) -> Result<usize> {
        if targets.is_empty() {
            return Ok(0);
        }
        self.fan_out(event, Some(targets))
    }

    fn fan_out(&self, event: &QueryEvent, targets: Option<&[ScopeId]>) -> Result<usize> {
        if self.active_count() == 0 {
            return Ok(0);
        }

        let duration = event.duration()?;
        let (key, verb) = analyze(&event.sql_text);

        let scopes = self.lock_scopes();
        let receivers: Vec<&AccumulatorHandle> = match targets {
            None => scopes.values().collect(),
            Some(ids) => ids.iter().filter_map(|id| scopes.get(id)).collect(),
        };

        let mut recorded = 0;
        let mut first_error = None;
        for handle in receivers {
            match handle.lock().record_analyzed(event, &key, verb, duration) {
                Ok(()) => recorded += 1,
                Err(e) => {
                    warn!(scope = %handle.scope_id(), error = %e, "scope rejected query event");
                    first_error.get_or_insert(e);
                }
            }
        }

        trace!(%verb, %key, duration, scopes = recorded, "query recorded");
        match first_error {
            Some(e) => Err(e),
            None => Ok(recorded),
        }
    }

    /// Scopes released because their session was dropped while still open
    pub fn leaked_scopes(&self) -> u64 {
        self.leaked.load(Ordering::Relaxed)
    }

    /// Release a scope whose session never closed and count the leak
    pub(crate) fn release_leaked(&self, scope_id: &ScopeId) {
        if self.deactivate(scope_id).is_ok() {
            self.leaked.fetch_add(1, Ordering::Relaxed);
            warn!(scope = %scope_id, "profiling session dropped while open; scope released");
        }
    }
}
