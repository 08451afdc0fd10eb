//! Per-Call-ID ordered delivery.
//!
//! # Responsibilities
//! - Deliver messages inline or on a [`WorkerPool`]
//! - Keep messages with the same Call-ID in wire order, one callback at a time
//! - Isolate callback errors and panics to the message that caused them
//! - Drop undelivered messages when the connection goes away
//!
//! # Design Decisions
//! - A key's queue exists exactly while a dispatch task for that key is
//!   scheduled or running. Creating the queue schedules the task; the task
//!   removes the queue when it finds it empty. Both happen under the
//!   registry entry lock, so a second task for the same key cannot start
//! - No lock is held while a callback runs
//! - Inline callbacks on a multi-threaded runtime run under
//!   `block_in_place`, so a slow callback holds up only its own connection
//! - If the pool refuses a follow-up task, the running task drains the
//!   rest of its key itself; messages already accepted are never dropped
//!   by a pool shutdown

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::runtime::{Handle, RuntimeFlavor};

use crate::dispatch::handler::MessageHandler;
use crate::dispatch::pool::{PoolError, WorkerPool};
use crate::framing::{FramedMessage, ParseFailure};
use crate::observability::metrics;

/// Routes framed messages of one connection to the handler.
#[derive(Clone)]
pub struct Dispatcher {
    shared: Arc<Shared>,
}

struct Shared {
    handler: Arc<dyn MessageHandler>,
    pool: Option<Arc<WorkerPool>>,
    registry: DashMap<String, VecDeque<FramedMessage>>,
    released: AtomicBool,
}

impl Dispatcher {
    /// Deliver on the calling task, in framing order.
    pub fn inline(handler: Arc<dyn MessageHandler>) -> Self {
        Self::build(handler, None)
    }

    /// Deliver on `pool`, ordered per Call-ID.
    pub fn pooled(handler: Arc<dyn MessageHandler>, pool: Arc<WorkerPool>) -> Self {
        Self::build(handler, Some(pool))
    }

    /// Pooled when a pool is given, inline otherwise.
    pub fn new(handler: Arc<dyn MessageHandler>, pool: Option<Arc<WorkerPool>>) -> Self {
        Self::build(handler, pool)
    }

    fn build(handler: Arc<dyn MessageHandler>, pool: Option<Arc<WorkerPool>>) -> Self {
        Self {
            shared: Arc::new(Shared {
                handler,
                pool,
                registry: DashMap::new(),
                released: AtomicBool::new(false),
            }),
        }
    }

    pub fn is_pooled(&self) -> bool {
        self.shared.pool.is_some()
    }

    /// Hand over one message.
    pub fn dispatch(&self, message: FramedMessage) {
        if self.shared.released.load(Ordering::Acquire) {
            tracing::debug!(call_id = %message.call_id, "Dispatcher released, dropping message");
            metrics::record_dispatch_discarded(1);
            return;
        }
        if self.shared.pool.is_none() {
            deliver_inline(self.shared.handler.as_ref(), message);
            return;
        }

        let key = message.call_id.clone();
        let created = match self.shared.registry.entry(key.clone()) {
            Entry::Occupied(mut queue) => {
                queue.get_mut().push_back(message);
                false
            }
            Entry::Vacant(slot) => {
                slot.insert(VecDeque::from([message]));
                true
            }
        };
        if created {
            schedule(Arc::clone(&self.shared), key);
        }
    }

    /// Report a rejected message to the handler, on the calling task.
    pub fn report_rejection(&self, failure: &ParseFailure) {
        let handler = self.shared.handler.as_ref();
        if catch_unwind(AssertUnwindSafe(|| handler.on_parse_error(failure))).is_err() {
            metrics::record_dispatch_failure();
            tracing::warn!(connection = %failure.connection, "Parse error callback panicked");
        }
    }

    /// Drop every queued message. Callbacks already running complete.
    ///
    /// Messages dispatched afterwards are discarded.
    pub fn release_all(&self) -> usize {
        self.shared.released.store(true, Ordering::Release);
        let mut discarded = 0;
        self.shared.registry.retain(|_, queue| {
            discarded += queue.len();
            false
        });
        if discarded > 0 {
            metrics::record_dispatch_discarded(discarded);
            tracing::info!(discarded, "Discarded undelivered messages");
        }
        discarded
    }

    /// Guard that calls [`release_all`](Self::release_all) when dropped.
    pub fn release_on_drop(&self) -> ReleaseGuard {
        ReleaseGuard {
            dispatcher: self.clone(),
        }
    }

    /// Messages queued but not yet handed to a callback.
    pub fn pending(&self) -> usize {
        self.shared.registry.iter().map(|queue| queue.len()).sum()
    }

    /// Call-IDs with a scheduled or running dispatch task.
    pub fn active_keys(&self) -> usize {
        self.shared.registry.len()
    }
}

/// Releases a dispatcher's ordering state on drop, including when the
/// owning task is aborted.
pub struct ReleaseGuard {
    dispatcher: Dispatcher,
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.dispatcher.release_all();
    }
}

fn schedule(shared: Arc<Shared>, key: String) {
    if let Err(err) = submit(&shared, &key) {
        let discarded = shared.registry.remove(&key).map_or(0, |(_, queue)| queue.len());
        metrics::record_dispatch_discarded(discarded);
        tracing::warn!(call_id = %key, discarded, error = %err, "Cannot schedule dispatch task");
    }
}

fn submit(shared: &Arc<Shared>, key: &str) -> Result<(), PoolError> {
    let pool = shared.pool.as_ref().ok_or(PoolError::ShutDown)?;
    let task_shared = Arc::clone(shared);
    let task_key = key.to_string();
    pool.submit(move || run_next(task_shared, task_key))
}

/// Deliver the next message for `key`, then hand the slot on.
fn run_next(shared: Arc<Shared>, key: String) {
    loop {
        let next = shared.registry.get_mut(&key).and_then(|mut queue| queue.pop_front());
        let Some(message) = next else {
            // Released while this task was queued.
            return;
        };

        deliver(shared.handler.as_ref(), message);

        let more = match shared.registry.entry(key.clone()) {
            Entry::Occupied(queue) if queue.get().is_empty() => {
                queue.remove();
                false
            }
            Entry::Occupied(_) => true,
            Entry::Vacant(_) => false,
        };
        if !more {
            return;
        }
        match submit(&shared, &key) {
            Ok(()) => return,
            Err(err) => {
                tracing::debug!(call_id = %key, error = %err, "Pool closed, draining key on this worker");
            }
        }
    }
}

/// Deliver on the calling thread without stalling other runtime tasks.
fn deliver_inline(handler: &dyn MessageHandler, message: FramedMessage) {
    let blocking_allowed = Handle::try_current()
        .map(|handle| handle.runtime_flavor() == RuntimeFlavor::MultiThread)
        .unwrap_or(false);
    if blocking_allowed {
        tokio::task::block_in_place(|| deliver(handler, message));
    } else {
        deliver(handler, message);
    }
}

fn deliver(handler: &dyn MessageHandler, message: FramedMessage) {
    let call_id = message.call_id.clone();
    let connection = message.connection;
    match catch_unwind(AssertUnwindSafe(|| handler.on_message(message))) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            metrics::record_dispatch_failure();
            tracing::warn!(connection = %connection, call_id = %call_id, error = %err, "Message handler failed");
        }
        Err(panic) => {
            metrics::record_dispatch_failure();
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown".to_string());
            tracing::warn!(connection = %connection, call_id = %call_id, panic = %reason, "Message handler panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::handler::HandlerResult;
    use crate::net::connection::ConnectionInfo;
    use crate::parser::{MessageParser, SipMessageParser};
    use bytes::Bytes;
    use std::sync::Mutex;
    use std::thread;
    use std::time::{Duration, Instant};

    fn message(call_id: &str, body: &str) -> FramedMessage {
        let head = format!(
            "MESSAGE sip:bob@biloxi.com SIP/2.0\r\nCall-ID: {call_id}\r\nContent-Length: {}\r\n",
            body.len()
        );
        let parsed = SipMessageParser::new().parse_head(&head).unwrap();
        FramedMessage::new(ConnectionInfo::new(None), head, parsed, Bytes::from(body.to_string()))
    }

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(String, String)>>,
        delay: Duration,
    }

    impl Recorder {
        fn with_delay(delay: Duration) -> Self {
            Self {
                delay,
                ..Self::default()
            }
        }

        fn seen(&self) -> Vec<(String, String)> {
            self.seen.lock().unwrap().clone()
        }

        fn wait_for(&self, count: usize) -> Vec<(String, String)> {
            let deadline = Instant::now() + Duration::from_secs(5);
            while self.seen.lock().unwrap().len() < count && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(5));
            }
            self.seen()
        }
    }

    impl MessageHandler for Recorder {
        fn on_message(&self, message: FramedMessage) -> HandlerResult {
            thread::sleep(self.delay);
            let body = String::from_utf8_lossy(&message.body).into_owned();
            if body == "fail" {
                return Err("rejected by application".into());
            }
            if body == "panic" {
                panic!("handler blew up");
            }
            self.seen.lock().unwrap().push((message.call_id, body));
            Ok(())
        }
    }

    fn bodies_for(seen: &[(String, String)], key: &str) -> Vec<String> {
        seen.iter().filter(|(k, _)| k == key).map(|(_, b)| b.clone()).collect()
    }

    #[test]
    fn inline_delivers_immediately() {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = Dispatcher::inline(recorder.clone());
        dispatcher.dispatch(message("abc", "hello"));
        dispatcher.dispatch(message("abc", "world"));
        assert_eq!(bodies_for(&recorder.seen(), "abc"), ["hello", "world"]);
        assert!(!dispatcher.is_pooled());
    }

    #[test]
    fn pooled_keeps_per_key_order() {
        let pool = Arc::new(WorkerPool::new(4, "order", Duration::ZERO).unwrap());
        let recorder = Arc::new(Recorder::with_delay(Duration::from_millis(2)));
        let dispatcher = Dispatcher::pooled(recorder.clone(), pool.clone());

        for i in 0..20 {
            dispatcher.dispatch(message("abc", &format!("a{i}")));
            dispatcher.dispatch(message("xyz", &format!("x{i}")));
        }
        let seen = recorder.wait_for(40);
        let expected_a: Vec<String> = (0..20).map(|i| format!("a{i}")).collect();
        let expected_x: Vec<String> = (0..20).map(|i| format!("x{i}")).collect();
        assert_eq!(bodies_for(&seen, "abc"), expected_a);
        assert_eq!(bodies_for(&seen, "xyz"), expected_x);

        pool.join();
        assert_eq!(dispatcher.active_keys(), 0);
    }

    #[test]
    fn failures_do_not_stop_the_key() {
        let pool = Arc::new(WorkerPool::new(2, "isolate", Duration::ZERO).unwrap());
        let recorder = Arc::new(Recorder::default());
        let dispatcher = Dispatcher::pooled(recorder.clone(), pool.clone());

        dispatcher.dispatch(message("abc", "one"));
        dispatcher.dispatch(message("abc", "fail"));
        dispatcher.dispatch(message("abc", "panic"));
        dispatcher.dispatch(message("abc", "two"));

        assert_eq!(bodies_for(&recorder.wait_for(2), "abc"), ["one", "two"]);
        pool.join();
    }

    #[test]
    fn release_all_discards_queued_messages() {
        let pool = Arc::new(WorkerPool::new(1, "release", Duration::ZERO).unwrap());
        let recorder = Arc::new(Recorder::with_delay(Duration::from_millis(100)));
        let dispatcher = Dispatcher::pooled(recorder.clone(), pool.clone());

        dispatcher.dispatch(message("abc", "first"));
        // Let the first callback start before releasing.
        thread::sleep(Duration::from_millis(30));
        dispatcher.dispatch(message("abc", "second"));
        dispatcher.dispatch(message("abc", "third"));
        assert_eq!(dispatcher.pending(), 2);

        assert_eq!(dispatcher.release_all(), 2);
        dispatcher.dispatch(message("abc", "late"));
        pool.join();

        assert_eq!(bodies_for(&recorder.seen(), "abc"), ["first"]);
        assert_eq!(dispatcher.active_keys(), 0);
    }

    #[test]
    fn release_guard_releases_on_drop() {
        let pool = Arc::new(WorkerPool::new(1, "guard", Duration::ZERO).unwrap());
        let recorder = Arc::new(Recorder::with_delay(Duration::from_millis(100)));
        let dispatcher = Dispatcher::pooled(recorder.clone(), pool.clone());
        {
            let _guard = dispatcher.release_on_drop();
            dispatcher.dispatch(message("abc", "first"));
            thread::sleep(Duration::from_millis(30));
            dispatcher.dispatch(message("abc", "second"));
        }
        assert_eq!(dispatcher.pending(), 0);
        pool.join();
        assert_eq!(recorder.seen().len(), 1);
    }

    #[test]
    fn shut_down_pool_discards_instead_of_blocking() {
        let pool = Arc::new(WorkerPool::new(1, "gone", Duration::ZERO).unwrap());
        pool.shutdown();
        let recorder = Arc::new(Recorder::default());
        let dispatcher = Dispatcher::pooled(recorder.clone(), pool.clone());
        dispatcher.dispatch(message("abc", "lost"));
        assert_eq!(dispatcher.active_keys(), 0);
        pool.join();
        assert!(recorder.seen().is_empty());
    }

    #[test]
    fn pool_shutdown_still_delivers_accepted_messages() {
        let pool = Arc::new(WorkerPool::new(2, "closing", Duration::ZERO).unwrap());
        let recorder = Arc::new(Recorder::with_delay(Duration::from_millis(100)));
        let dispatcher = Dispatcher::pooled(recorder.clone(), pool.clone());

        dispatcher.dispatch(message("abc", "one"));
        dispatcher.dispatch(message("abc", "two"));
        dispatcher.dispatch(message("abc", "three"));
        pool.shutdown();
        pool.join();

        assert_eq!(bodies_for(&recorder.seen(), "abc"), ["one", "two", "three"]);
        assert_eq!(dispatcher.active_keys(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn inline_delivery_works_on_a_multi_threaded_runtime() {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = Dispatcher::inline(recorder.clone());
        dispatcher.dispatch(message("abc", "hello"));
        assert_eq!(bodies_for(&recorder.seen(), "abc"), ["hello"]);
    }

    #[tokio::test]
    async fn inline_delivery_works_on_a_current_thread_runtime() {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = Dispatcher::inline(recorder.clone());
        dispatcher.dispatch(message("abc", "hello"));
        assert_eq!(bodies_for(&recorder.seen(), "abc"), ["hello"]);
    }
}
