//! Trace engine: enter/return/exception hooks over per-thread call stacks
//!
//! Instrumented code reports its calls through [`TraceEngine::on_enter`],
//! [`TraceEngine::on_return`] and [`TraceEngine::on_exception`], or through
//! the higher level [`TraceEngine::enter`] guard and [`TraceEngine::trace`]
//! wrappers. Every hook is panic-shielded: a failure inside the engine is
//! logged at `debug` and the event is dropped, never surfaced to the host.
//!
//! Each thread owns a logical stack of open frames. The record list and id
//! allocator are shared behind one mutex; admission goes through the
//! [`MemoryGovernor`].
//!
//! Frames are keyed by OS thread, so a guard held across an `.await` that
//! migrates tasks between worker threads attributes children to whatever
//! thread resumes it.

use crate::config::SiteFilter;
use crate::detector::{stringify_bounded, Local, ProtocolDetector};
use crate::governor::{path_key, thread_key, Admission, GovernorConfig, MemoryGovernor, PathKey};
use crate::patterns::{detect_framework, is_agent_site};
use crate::record::{unix_time, CallId, CallRecord, CallSite, Evidence, ProtocolKind};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::Instant;

/// Cap on the stored exception message
pub const MAX_EXCEPTION_LEN: usize = 1024;

/// Build a [`CallSite`] for the enclosing module, file and line
///
/// ```
/// use callmap::call_site;
///
/// let site = call_site!("load_users");
/// assert_eq!(site.function_name, "load_users");
/// assert_eq!(site.module, module_path!());
///
/// let background = call_site!(async "refresh_cache");
/// assert_eq!(background.invocation_type.to_string(), "async");
/// ```
#[macro_export]
macro_rules! call_site {
    (async $name:expr) => {
        $crate::record::CallSite::new($name, module_path!(), file!(), line!()).asynchronous()
    };
    ($name:expr) => {
        $crate::record::CallSite::new($name, module_path!(), file!(), line!())
    };
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    id: CallId,
    path: PathKey,
    started: Instant,
    /// Stands in for an earlier record of the same path
    coalesced: bool,
}

#[derive(Debug, Default)]
struct EngineState {
    records: Vec<CallRecord>,
    stacks: HashMap<ThreadId, Vec<Frame>>,
}

fn record_index(id: CallId) -> Option<usize> {
    usize::try_from(id.0).ok()?.checked_sub(1)
}

impl EngineState {
    fn record_mut(&mut self, id: CallId) -> Option<&mut CallRecord> {
        record_index(id).and_then(|i| self.records.get_mut(i))
    }
}

/// Counters describing the engine's current capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineStats {
    pub recorded: usize,
    pub coalesced: u64,
    pub rejected: u64,
    pub open_frames: usize,
}

#[derive(Debug)]
pub struct TraceEngine {
    detector: ProtocolDetector,
    governor: MemoryGovernor,
    filter: SiteFilter,
    capturing: AtomicBool,
    state: Mutex<EngineState>,
}

impl Default for TraceEngine {
    fn default() -> Self {
        Self::new(GovernorConfig::default())
    }
}

impl TraceEngine {
    /// Create a stopped engine
    pub fn new(governor: GovernorConfig) -> Self {
        Self {
            detector: ProtocolDetector::default(),
            governor: MemoryGovernor::new(governor),
            filter: SiteFilter::default(),
            capturing: AtomicBool::new(false),
            state: Mutex::new(EngineState::default()),
        }
    }

    pub fn with_filter(mut self, filter: SiteFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_detector(mut self, detector: ProtocolDetector) -> Self {
        self.detector = detector;
        self
    }

    pub fn start(&self) {
        self.capturing.store(true, Ordering::SeqCst);
    }

    /// Stop accepting events; open calls stay open
    pub fn stop(&self) {
        self.capturing.store(false, Ordering::SeqCst);
    }

    pub fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    /// Capturing and still below `max_calls`
    pub fn is_enabled(&self) -> bool {
        self.is_capturing() && self.governor.is_enabled()
    }

    pub fn governor(&self) -> &MemoryGovernor {
        &self.governor
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Function entry
    ///
    /// Returns the id to report on return or exception. A coalesced visit
    /// returns the id of the record it was folded into; `None` means the
    /// call was filtered out, rejected by the governor, or capture is off.
    pub fn on_enter(&self, site: &CallSite<'_>, locals: &[Local<'_>]) -> Option<CallId> {
        if !self.is_capturing() || !self.filter.allows(site) {
            return None;
        }
        shielded("enter", || self.enter_inner(site, locals))
    }

    fn enter_inner(&self, site: &CallSite<'_>, locals: &[Local<'_>]) -> Option<CallId> {
        let start_time = unix_time();
        let started = Instant::now();
        let thread = thread::current();
        let thread_id = thread.id();

        let id = {
            let mut guard = self.lock();
            let state = &mut *guard;
            let stack = state.stacks.entry(thread_id).or_default();
            let parent = stack.last().copied();
            let depth = stack.len();
            let caller = parent.map_or_else(|| thread_key(thread_id), |f| f.path);
            let key = path_key(site, depth, Some(caller));
            let candidate = CallId(state.records.len() as u64 + 1);

            match self.governor.admit(key, candidate) {
                Admission::Reject => {
                    if stack.is_empty() {
                        state.stacks.remove(&thread_id);
                    }
                    return None;
                }
                Admission::Coalesce(first) => {
                    stack.push(Frame {
                        id: first,
                        path: key,
                        started,
                        coalesced: true,
                    });
                    if let Some(record) = state.record_mut(first) {
                        record.coalesced_visits += 1;
                    }
                    return Some(first);
                }
                Admission::Record => {
                    stack.push(Frame {
                        id: candidate,
                        path: key,
                        started,
                        coalesced: false,
                    });
                    let mut record = CallRecord::new(candidate, site, start_time)
                        .with_parent(parent.map(|f| f.id), depth);
                    record.thread_id = thread_label(thread_id);
                    record.thread_name = thread.name().map(String::from);
                    record.framework = detect_framework(site.module, site.file_path).map(String::from);
                    record.is_ai_agent = is_agent_site(site.module, site.function_name);
                    state.records.push(record);
                    candidate
                }
            }
        };

        // Detection runs outside the lock
        let evidence = self.detector.detect(locals);
        if !evidence.is_empty() {
            if let Some(record) = self.lock().record_mut(id) {
                attach_evidence(record, evidence);
            }
        }
        Some(id)
    }

    /// Normal return of `id`
    pub fn on_return(&self, id: CallId) {
        shielded("return", || self.exit(id, None));
    }

    /// `id` raised `error`; the call is closed with the error recorded
    pub fn on_exception(&self, id: CallId, error: &dyn fmt::Display) {
        shielded("exception", || {
            let message = stringify_bounded(&DisplayAsDebug(error), MAX_EXCEPTION_LEN)
                .unwrap_or_else(|| "<unprintable error>".to_string());
            self.exit(id, Some(message));
        });
    }

    /// Pop the current thread's stack down to `id`
    ///
    /// Frames above `id` whose return was never reported are closed at the
    /// same instant. Unknown or already closed ids are ignored.
    fn exit(&self, id: CallId, failure: Option<String>) {
        if !self.is_capturing() {
            return;
        }
        let thread_id = thread::current().id();
        let ended = Instant::now();

        let mut guard = self.lock();
        let state = &mut *guard;
        let Some(stack) = state.stacks.get_mut(&thread_id) else {
            return;
        };
        let Some(pos) = stack.iter().rposition(|f| f.id == id) else {
            return;
        };
        let unwound = stack.split_off(pos);
        if stack.is_empty() {
            state.stacks.remove(&thread_id);
        }

        let mut failure = failure;
        for (offset, frame) in unwound.iter().enumerate().rev() {
            let outcome = if offset == 0 { failure.take() } else { None };
            if let Some(record) = state.record_mut(frame.id) {
                close_frame(record, frame, ended, outcome);
            }
        }
    }

    /// Re-run detection on an open call with its current bindings
    pub fn recheck(&self, id: CallId, locals: &[Local<'_>]) {
        if !self.is_capturing() {
            return;
        }
        shielded("recheck", || {
            let evidence = self.detector.detect(locals);
            if evidence.is_empty() {
                return;
            }
            let mut state = self.lock();
            if let Some(record) = state.record_mut(id).filter(|r| !r.is_closed()) {
                attach_evidence(record, evidence);
            }
        });
    }

    /// Enter `site` and return a guard that reports the return on drop
    pub fn enter(&self, site: &CallSite<'_>, locals: &[Local<'_>]) -> CallGuard<'_> {
        CallGuard {
            engine: self,
            id: self.on_enter(site, locals),
        }
    }

    /// Run `f` as a traced call
    ///
    /// A panic is recorded as the call's exception and then resumed with the
    /// original payload.
    pub fn trace<T>(&self, site: &CallSite<'_>, locals: &[Local<'_>], f: impl FnOnce() -> T) -> T {
        let guard = self.enter(site, locals);
        match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(value) => {
                drop(guard);
                value
            }
            Err(payload) => {
                guard.fail(&panic_message(payload.as_ref()));
                panic::resume_unwind(payload)
            }
        }
    }

    /// Like [`trace`](Self::trace), also recording `Err` as the exception
    pub fn trace_result<T, E: fmt::Display>(
        &self,
        site: &CallSite<'_>,
        locals: &[Local<'_>],
        f: impl FnOnce() -> Result<T, E>,
    ) -> Result<T, E> {
        let guard = self.enter(site, locals);
        match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(Ok(value)) => {
                drop(guard);
                Ok(value)
            }
            Ok(Err(err)) => {
                guard.fail(&err);
                Err(err)
            }
            Err(payload) => {
                guard.fail(&panic_message(payload.as_ref()));
                panic::resume_unwind(payload)
            }
        }
    }

    /// Copy of every record captured so far, in entry order
    pub fn snapshot(&self) -> Vec<CallRecord> {
        self.lock().records.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> EngineStats {
        let state = self.lock();
        EngineStats {
            recorded: state.records.len(),
            coalesced: self.governor.coalesced(),
            rejected: self.governor.rejected(),
            open_frames: state.stacks.values().map(Vec::len).sum(),
        }
    }
}

fn close_frame(record: &mut CallRecord, frame: &Frame, ended: Instant, failure: Option<String>) {
    let elapsed = ended.saturating_duration_since(frame.started).as_secs_f64();
    if frame.coalesced {
        record.coalesced_duration_ms += elapsed * 1000.0;
        if failure.is_some() {
            record.coalesced_failures += 1;
        }
        return;
    }
    if record.is_closed() {
        return;
    }
    if failure.is_some() {
        record.exception = failure;
    }
    record.close(record.start_time + elapsed);
}

fn attach_evidence(record: &mut CallRecord, evidence: Vec<Evidence>) {
    if evidence
        .iter()
        .any(|e| e.protocol == ProtocolKind::AgentCommunication)
    {
        record.is_ai_agent = true;
    }
    record.evidence.extend(evidence);
}

/// `ThreadId(7)` -> `7`
fn thread_label(id: ThreadId) -> String {
    let raw = format!("{:?}", id);
    raw.strip_prefix("ThreadId(")
        .and_then(|s| s.strip_suffix(')'))
        .map(String::from)
        .unwrap_or(raw)
}

/// Run a hook body, swallowing any panic raised inside it
fn shielded<T: Default>(hook: &'static str, f: impl FnOnce() -> T) -> T {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => value,
        Err(payload) => {
            tracing::debug!(
                "{} hook failed, event dropped: {}",
                hook,
                panic_message(payload.as_ref())
            );
            T::default()
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {s}")
    } else {
        "panic".to_string()
    }
}

struct DisplayAsDebug<'a>(&'a dyn fmt::Display);

impl fmt::Debug for DisplayAsDebug<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self.0, f)
    }
}

/// Open traced call; reports the return when dropped
///
/// Dropping during a panic records the call as failed instead.
#[must_use = "the call is reported as returned as soon as the guard is dropped"]
pub struct CallGuard<'e> {
    engine: &'e TraceEngine,
    id: Option<CallId>,
}

impl CallGuard<'_> {
    pub fn id(&self) -> Option<CallId> {
        self.id
    }

    /// Re-run detection with the call's current bindings
    pub fn recheck(&self, locals: &[Local<'_>]) {
        if let Some(id) = self.id {
            self.engine.recheck(id, locals);
        }
    }

    /// Close the call with `error` recorded as its exception
    pub fn fail(mut self, error: &dyn fmt::Display) {
        if let Some(id) = self.id.take() {
            self.engine.on_exception(id, error);
        }
    }
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            if thread::panicking() {
                self.engine.on_exception(id, &"panicked");
            } else {
                self.engine.on_return(id);
            }
        }
    }
}

impl fmt::Debug for CallGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallGuard").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{call_site, locals};
    use std::sync::Arc;

    fn engine() -> TraceEngine {
        let engine = TraceEngine::default();
        engine.start();
        engine
    }

    fn engine_with(max_calls: usize, path_visit_limit: usize) -> TraceEngine {
        let engine = TraceEngine::new(GovernorConfig {
            max_calls,
            path_visit_limit,
        });
        engine.start();
        engine
    }

    fn site(name: &'static str, line: u32) -> CallSite<'static> {
        CallSite::new(name, "myapp::service", "/srv/myapp/service.rs", line)
    }

    #[test]
    fn test_stopped_engine_ignores_events() {
        let engine = TraceEngine::default();
        assert_eq!(engine.on_enter(&site("a", 1), &[]), None);
        assert!(engine.is_empty());
    }

    #[test]
    fn test_nested_calls_link_parent_and_depth() {
        let engine = engine();
        let outer = engine.on_enter(&site("outer", 1), &[]).unwrap();
        let inner = engine.on_enter(&site("inner", 2), &[]).unwrap();
        engine.on_return(inner);
        engine.on_return(outer);

        let records = engine.snapshot();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].parent_id, None);
        assert_eq!(records[0].depth, 0);
        assert_eq!(records[1].parent_id, Some(outer));
        assert_eq!(records[1].depth, 1);
        assert!(records.iter().all(CallRecord::is_closed));
        assert!(records[0].end_time.unwrap() >= records[0].start_time);
    }

    #[test]
    fn test_recursion_records_every_level() {
        let engine = engine();
        let ids: Vec<_> = (0..5)
            .map(|_| engine.on_enter(&site("fib", 10), &[]).unwrap())
            .collect();
        for id in ids.iter().rev() {
            engine.on_return(*id);
        }

        let records = engine.snapshot();
        assert_eq!(records.len(), 5);
        for (depth, record) in records.iter().enumerate() {
            assert_eq!(record.depth, depth);
        }
        assert_eq!(records[4].parent_id, Some(records[3].call_id));
    }

    #[test]
    fn test_loop_is_coalesced() {
        let engine = engine();
        let outer = engine.on_enter(&site("handler", 1), &[]).unwrap();
        for _ in 0..1000 {
            let id = engine.on_enter(&site("query", 2), &[]).unwrap();
            let child = engine.on_enter(&site("encode", 3), &[]).unwrap();
            engine.on_return(child);
            engine.on_return(id);
        }
        engine.on_return(outer);

        let records = engine.snapshot();
        assert_eq!(records.len(), 3);
        assert_eq!(records[1].function_name, "query");
        assert_eq!(records[1].coalesced_visits, 999);
        assert_eq!(records[1].total_visits(), 1000);
        assert_eq!(records[2].function_name, "encode");
        assert_eq!(records[2].parent_id, Some(records[1].call_id));
        assert_eq!(records[2].coalesced_visits, 999);
        assert_eq!(engine.stats().open_frames, 0);
    }

    #[test]
    fn test_new_branch_in_coalesced_visit_attaches_to_first_record() {
        let engine = engine();
        let first = engine.on_enter(&site("handle", 1), &[]).unwrap();
        engine.on_return(first);

        let again = engine.on_enter(&site("handle", 1), &[]).unwrap();
        assert_eq!(again, first);
        let branch = engine.on_enter(&site("rare_path", 7), &[]).unwrap();
        engine.on_return(branch);
        engine.on_return(again);

        let records = engine.snapshot();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].parent_id, Some(first));
        assert_eq!(records[1].depth, 1);
    }

    #[test]
    fn test_max_calls_bounds_records() {
        let engine = engine_with(10, 1);
        for line in 0..50 {
            if let Some(id) = engine.on_enter(&site("distinct", line), &[]) {
                engine.on_return(id);
            }
        }
        assert_eq!(engine.len(), 10);
        assert!(!engine.is_enabled());
        assert!(engine.is_capturing());
        assert_eq!(engine.stats().rejected, 40);
    }

    #[test]
    fn test_exception_closes_call_and_outer_completes() {
        let engine = engine();
        let outer = engine.on_enter(&site("outer", 1), &[]).unwrap();
        let inner = engine.on_enter(&site("inner", 2), &[]).unwrap();
        engine.on_exception(inner, &"ValueError: bad input");
        // A late return for the failed call is ignored
        engine.on_return(inner);
        engine.on_return(outer);

        let records = engine.snapshot();
        assert_eq!(records[1].exception.as_deref(), Some("ValueError: bad input"));
        assert!(records[1].end_time.is_some());
        assert_eq!(records[0].exception, None);
        assert!(records[0].is_closed());
    }

    #[test]
    fn test_missed_returns_are_unwound() {
        let engine = engine();
        let outer = engine.on_enter(&site("outer", 1), &[]).unwrap();
        let _lost = engine.on_enter(&site("lost", 2), &[]).unwrap();
        engine.on_return(outer);

        let records = engine.snapshot();
        assert!(records.iter().all(CallRecord::is_closed));
        assert_eq!(engine.stats().open_frames, 0);
    }

    #[test]
    fn test_unknown_id_is_ignored() {
        let engine = engine();
        engine.on_return(CallId(99));
        engine.on_exception(CallId(0), &"nothing");
        assert!(engine.is_empty());
    }

    #[test]
    fn test_detection_at_entry() {
        let engine = engine();
        let query = "SELECT * FROM users";
        let id = engine.on_enter(&site("load", 1), locals![query]).unwrap();
        engine.on_return(id);

        let records = engine.snapshot();
        assert_eq!(records[0].evidence.len(), 1);
        assert_eq!(records[0].evidence[0].protocol, ProtocolKind::Sql);
    }

    #[test]
    fn test_recheck_adds_mid_call_evidence() {
        let engine = engine();
        let guard = engine.enter(&site("publish", 1), &[]);
        let topic = "kafka topic orders";
        guard.recheck(locals![topic]);
        let id = guard.id().unwrap();
        drop(guard);

        // Closed calls take no more evidence
        engine.recheck(id, locals![topic]);
        let records = engine.snapshot();
        assert_eq!(records[0].evidence.len(), 1);
        assert!(records[0].has_protocol(ProtocolKind::Kafka));
    }

    #[test]
    fn test_agent_evidence_marks_record() {
        let engine = engine();
        let executor = "AgentExecutor(tools=[search])";
        engine.trace(&site("plan", 1), locals![executor], || ());
        assert!(engine.snapshot()[0].is_ai_agent);
    }

    #[test]
    fn test_panicking_debug_in_locals_is_harmless() {
        struct Hostile;
        impl fmt::Debug for Hostile {
            fn fmt(&self, _: &mut fmt::Formatter<'_>) -> fmt::Result {
                panic!("hostile Debug");
            }
        }
        let engine = engine();
        let value = Hostile;
        let id = engine.on_enter(&site("f", 1), locals![value]);
        assert!(id.is_some());
    }

    #[test]
    fn test_guard_reports_return_on_drop() {
        let engine = engine();
        {
            let _guard = engine.enter(&call_site!("scoped"), &[]);
        }
        let records = engine.snapshot();
        assert_eq!(records[0].function_name, "scoped");
        assert_eq!(records[0].module, module_path!());
        assert!(records[0].is_closed());
    }

    #[test]
    fn test_guard_fail_records_error() {
        let engine = engine();
        let guard = engine.enter(&site("write", 1), &[]);
        guard.fail(&"disk full");
        assert_eq!(engine.snapshot()[0].exception.as_deref(), Some("disk full"));
    }

    #[test]
    fn test_trace_result_records_err() {
        let engine = engine();
        let result: Result<u32, String> =
            engine.trace_result(&site("parse", 1), &[], || Err("bad digit".to_string()));
        assert_eq!(result, Err("bad digit".to_string()));
        assert_eq!(engine.snapshot()[0].exception.as_deref(), Some("bad digit"));

        let ok: Result<u32, String> = engine.trace_result(&site("parse", 2), &[], || Ok(7));
        assert_eq!(ok, Ok(7));
        assert_eq!(engine.snapshot()[1].exception, None);
    }

    #[test]
    fn test_trace_is_transparent_to_panics() {
        let engine = engine();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            engine.trace(&site("explode", 1), &[], || -> u32 { panic!("kaboom") })
        }));
        let payload = outcome.unwrap_err();
        assert_eq!(payload.downcast_ref::<&str>(), Some(&"kaboom"));

        let records = engine.snapshot();
        assert_eq!(records[0].exception.as_deref(), Some("panic: kaboom"));
        assert!(records[0].is_closed());
    }

    #[test]
    fn test_coalesced_failures_and_durations() {
        let engine = engine();
        for attempt in 0..3 {
            let id = engine.on_enter(&site("retry", 1), &[]).unwrap();
            if attempt == 2 {
                engine.on_exception(id, &"timeout");
            } else {
                engine.on_return(id);
            }
        }
        let record = &engine.snapshot()[0];
        assert_eq!(record.exception, None);
        assert_eq!(record.coalesced_visits, 2);
        assert_eq!(record.coalesced_failures, 1);
        assert_eq!(record.failures(), 1);
        assert!(record.coalesced_duration_ms >= 0.0);
    }

    #[test]
    fn test_threads_have_independent_stacks() {
        let engine = Arc::new(engine_with(10_000, 0));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let engine = Arc::clone(&engine);
                thread::Builder::new()
                    .name(format!("worker-{t}"))
                    .spawn(move || {
                        for _ in 0..25 {
                            let outer = engine.on_enter(&site("outer", 1), &[]).unwrap();
                            let inner = engine.on_enter(&site("inner", 2), &[]).unwrap();
                            engine.on_return(inner);
                            engine.on_return(outer);
                        }
                    })
                    .unwrap()
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let records = engine.snapshot();
        assert_eq!(records.len(), 200);
        let by_id: HashMap<_, _> = records.iter().map(|r| (r.call_id, r)).collect();
        for record in &records {
            match record.function_name.as_str() {
                "outer" => assert_eq!(record.depth, 0),
                _ => {
                    let parent = by_id[&record.parent_id.unwrap()];
                    assert_eq!(parent.function_name, "outer");
                    assert_eq!(parent.thread_id, record.thread_id);
                    assert_eq!(record.depth, 1);
                }
            }
            assert!(record.thread_name.as_deref().unwrap().starts_with("worker-"));
        }
    }

    #[test]
    fn test_same_site_on_two_threads_is_not_coalesced() {
        let engine = Arc::new(engine());
        let held = engine.on_enter(&site("handle", 1), &[]).unwrap();

        let worker = Arc::clone(&engine);
        thread::spawn(move || {
            let outer = worker.on_enter(&site("handle", 1), &[]).unwrap();
            let inner = worker.on_enter(&site("query", 2), &[]).unwrap();
            worker.on_return(inner);
            worker.on_return(outer);
        })
        .join()
        .unwrap();
        engine.on_return(held);

        let records = engine.snapshot();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].coalesced_visits, 0);
        let by_id: HashMap<_, _> = records.iter().map(|r| (r.call_id, r)).collect();
        let query = records.iter().find(|r| r.function_name == "query").unwrap();
        let parent = by_id[&query.parent_id.unwrap()];
        assert_eq!(parent.function_name, "handle");
        assert_ne!(parent.call_id, held);
        assert_eq!(parent.thread_id, query.thread_id);
        assert_ne!(records[0].thread_id, query.thread_id);
    }

    #[test]
    fn test_filter_skips_sites() {
        let engine = TraceEngine::default()
            .with_filter(SiteFilter::new(Vec::new(), vec!["myapp::service".to_string()]));
        engine.start();
        assert_eq!(engine.on_enter(&site("hidden", 1), &[]), None);
        assert!(engine.is_empty());
    }

    #[test]
    fn test_framework_classification() {
        let engine = engine();
        let site = CallSite::new("route", "axum::routing", "/deps/axum/src/routing.rs", 5);
        engine.trace(&site, &[], || ());
        assert_eq!(engine.snapshot()[0].framework.as_deref(), Some("Axum"));
    }

    #[test]
    fn test_thread_label_strips_wrapper() {
        let label = thread_label(thread::current().id());
        assert!(label.chars().all(|c| c.is_ascii_digit()), "{label}");
    }
}
