//! Memory governor: bounded call retention with path-coverage coalescing
//!
//! # Policy
//!
//! A *path* is a call site (`file_path`, `line_number`, `function_name`)
//! reached at a given depth from a given caller path. Root calls hang off
//! a per-thread key, so paths never span threads. The first
//! `path_visit_limit` visits of a path become records; later visits are
//! folded into the first record of that path as `coalesced_visits` and
//! allocate nothing. Recursion creates a new path per depth level, so each
//! activation of a recursive function is recorded; a loop calling the same
//! function from the same caller is coalesced.
//!
//! Independently, at most `max_calls` records are admitted per session.
//! Hitting the cap flips the `enabled` flag off. Records already captured are
//! never evicted, which keeps the captured tree causally consistent.

use crate::record::{CallId, CallSite};
use fnv::{FnvHashMap, FnvHasher};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread::ThreadId;

/// Default ceiling on retained call records
pub const DEFAULT_MAX_CALLS: usize = 100_000;

/// Default number of verbatim visits per call path
pub const DEFAULT_PATH_VISIT_LIMIT: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GovernorConfig {
    pub max_calls: usize,
    /// Verbatim visits per path before coalescing; 0 disables coalescing
    pub path_visit_limit: usize,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            max_calls: DEFAULT_MAX_CALLS,
            path_visit_limit: DEFAULT_PATH_VISIT_LIMIT,
        }
    }
}

/// FNV-1a key of a call path
pub type PathKey = u64;

/// Hash a site together with its depth and caller path
pub fn path_key(site: &CallSite<'_>, depth: usize, parent: Option<PathKey>) -> PathKey {
    let mut hasher = FnvHasher::default();
    site.file_path.hash(&mut hasher);
    site.line_number.hash(&mut hasher);
    site.function_name.hash(&mut hasher);
    depth.hash(&mut hasher);
    parent.hash(&mut hasher);
    hasher.finish()
}

/// Root of every path opened on `thread`
pub fn thread_key(thread: ThreadId) -> PathKey {
    let mut hasher = FnvHasher::default();
    thread.hash(&mut hasher);
    hasher.finish()
}

/// Governor decision for one call entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Allocate a new record with the candidate id
    Record,
    /// Fold the visit into an existing record
    Coalesce(CallId),
    /// Capacity exhausted
    Reject,
}

#[derive(Debug, Default)]
struct PathCoverage {
    first: Option<CallId>,
    visits: usize,
}

#[derive(Debug)]
pub struct MemoryGovernor {
    config: GovernorConfig,
    admitted: AtomicUsize,
    enabled: AtomicBool,
    coalesced: AtomicU64,
    rejected: AtomicU64,
    paths: Mutex<FnvHashMap<PathKey, PathCoverage>>,
}

impl MemoryGovernor {
    pub fn new(config: GovernorConfig) -> Self {
        Self {
            config,
            admitted: AtomicUsize::new(0),
            enabled: AtomicBool::new(true),
            coalesced: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            paths: Mutex::new(FnvHashMap::default()),
        }
    }

    pub fn config(&self) -> GovernorConfig {
        self.config
    }

    /// Decide what to do with a visit of `key`
    ///
    /// `candidate` is the id the caller will assign if the answer is `Record`.
    pub fn admit(&self, key: PathKey, candidate: CallId) -> Admission {
        let mut paths = self.paths.lock().unwrap_or_else(PoisonError::into_inner);
        let limit = self.config.path_visit_limit;

        if limit > 0 {
            if let Some(coverage) = paths.get_mut(&key) {
                if coverage.visits >= limit {
                    if let Some(first) = coverage.first {
                        coverage.visits += 1;
                        self.coalesced.fetch_add(1, Ordering::Relaxed);
                        return Admission::Coalesce(first);
                    }
                }
            }
        }

        if !self.try_reserve() {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            return Admission::Reject;
        }

        let coverage = paths.entry(key).or_default();
        coverage.visits += 1;
        coverage.first.get_or_insert(candidate);
        Admission::Record
    }

    /// Reserve one record slot against `max_calls`
    fn try_reserve(&self) -> bool {
        let reserved = self
            .admitted
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.config.max_calls).then_some(n + 1)
            })
            .is_ok();

        if !reserved && self.enabled.swap(false, Ordering::SeqCst) {
            tracing::warn!(
                "max calls reached ({}), capture disabled for new call paths",
                self.config.max_calls
            );
        }
        reserved
    }

    /// False once `max_calls` has been reached or capture was stopped
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Stop admitting new records
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    /// Records admitted so far
    pub fn admitted(&self) -> usize {
        self.admitted.load(Ordering::SeqCst)
    }

    /// Visits folded into existing records
    pub fn coalesced(&self) -> u64 {
        self.coalesced.load(Ordering::Relaxed)
    }

    /// Visits dropped because the cap was reached
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Number of distinct call paths seen
    pub fn distinct_paths(&self) -> usize {
        self.paths.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl Default for MemoryGovernor {
    fn default() -> Self {
        Self::new(GovernorConfig::default())
    }
}
