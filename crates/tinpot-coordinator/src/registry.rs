//! In-memory registry of outstanding executions.
//!
//! Each execution owns a bounded log-event queue and a completion
//! slot. Broker callbacks produce with non-blocking sends (a slow SSE
//! reader can only cost itself log lines, never stall the event-loop
//! task); the completion is stored out-of-band so it survives queue
//! overflow and is always the last thing a subscriber sees.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tinpot_protocol::{CompletionData, LogEntry, StreamEvent};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};
use uuid::Uuid;

/// Maximum buffered log events per execution.
pub const EVENT_QUEUE_CAPACITY: usize = 1000;

/// How long completed executions stay queryable before removal.
pub const CLEANUP_TTL: Duration = Duration::from_secs(60);

/// State of one outstanding execution.
pub struct ExecutionState {
    execution_id: Uuid,
    log_tx: Mutex<Option<mpsc::Sender<StreamEvent>>>,
    log_rx: Mutex<Option<mpsc::Receiver<StreamEvent>>>,
    completion: Mutex<Option<CompletionData>>,
    completed: AtomicBool,
}

impl ExecutionState {
    fn new(execution_id: Uuid) -> Arc<Self> {
        let (log_tx, log_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        Arc::new(Self {
            execution_id,
            log_tx: Mutex::new(Some(log_tx)),
            log_rx: Mutex::new(Some(log_rx)),
            completion: Mutex::new(None),
            completed: AtomicBool::new(false),
        })
    }

    /// Returns this execution's id.
    #[must_use]
    pub fn execution_id(&self) -> Uuid {
        self.execution_id
    }

    /// Enqueues a log event.
    ///
    /// Non-blocking: a full queue drops the event with one warning per
    /// drop, a closed queue (late log after completion) drops it
    /// silently.
    pub fn push_log(&self, entry: LogEntry) {
        let guard = self.log_tx.lock();
        let Some(tx) = guard.as_ref() else {
            debug!(execution_id = %self.execution_id, "late log after completion dropped");
            return;
        };
        match tx.try_send(StreamEvent::Log { data: entry }) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(execution_id = %self.execution_id, "event queue full, dropped log");
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }

    /// Records the terminal outcome and closes the log queue.
    ///
    /// Idempotent: returns `true` only for the first call; redelivered
    /// results (QoS 1) are dropped.
    pub fn complete(&self, data: CompletionData) -> bool {
        if self.completed.swap(true, Ordering::AcqRel) {
            return false;
        }
        *self.completion.lock() = Some(data);
        // Dropping the sender closes the queue once buffered events
        // drain; the stored completion is delivered after that.
        *self.log_tx.lock() = None;
        true
    }

    /// Returns whether a terminal outcome has been recorded.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    /// Returns the terminal outcome, if recorded.
    #[must_use]
    pub fn completion(&self) -> Option<CompletionData> {
        self.completion.lock().clone()
    }

    /// Takes the event receiver.
    ///
    /// Each execution has one consumable stream; a second caller gets
    /// `None` and should treat the queue as closed.
    #[must_use]
    pub fn take_receiver(&self) -> Option<mpsc::Receiver<StreamEvent>> {
        self.log_rx.lock().take()
    }
}

/// Registry mapping execution ids to their state.
#[derive(Default)]
pub struct ExecutionRegistry {
    executions: parking_lot::RwLock<HashMap<Uuid, Arc<ExecutionState>>>,
}

impl ExecutionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates and tracks state for a new execution.
    pub fn register(&self, execution_id: Uuid) -> Arc<ExecutionState> {
        let state = ExecutionState::new(execution_id);
        self.executions
            .write()
            .insert(execution_id, Arc::clone(&state));
        state
    }

    /// Returns the state for `execution_id`, if tracked.
    #[must_use]
    pub fn get(&self, execution_id: &Uuid) -> Option<Arc<ExecutionState>> {
        self.executions.read().get(execution_id).cloned()
    }

    /// Stops tracking `execution_id`.
    pub fn remove(&self, execution_id: &Uuid) {
        self.executions.write().remove(execution_id);
    }

    /// Returns the number of tracked executions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.executions.read().len()
    }

    /// Returns true when nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.executions.read().is_empty()
    }
}
