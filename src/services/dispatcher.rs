use crate::models::AnchorKind;
use crate::services::store::RelationCache;
use crate::services::sync::SyncExecutor;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

/// How many finished tasks stay queryable; the oldest Completed/Failed
/// entries beyond this are evicted so the registry stays bounded.
const FINISHED_TASK_HISTORY: usize = 1024;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("reconciliation queue is full")]
    QueueFull,

    #[error("dispatcher is shut down")]
    Closed,
}

/// Lifecycle of one queued reconciliation unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Queued,
    Running,
    Completed,
    Failed,
}

/// Observability record for a submitted task.
#[derive(Debug, Clone)]
pub struct TaskStatus {
    pub state: TaskState,
    pub retries: u32,
}

/// One unit of background work: reconcile a single anchor.
///
/// The task carries no relationship data. The desired set is re-read from
/// the authoritative local cache when the task actually runs, so a task
/// dequeued late can never apply an older snapshot over a newer one.
struct SyncTask {
    id: Uuid,
    tenant_id: String,
    anchor_kind: AnchorKind,
    anchor_id: String,
}

/// Status map plus an eviction queue of finished task ids.
#[derive(Default)]
struct TaskRegistry {
    statuses: HashMap<Uuid, TaskStatus>,
    finished: VecDeque<Uuid>,
}

impl TaskRegistry {
    fn set(&mut self, task_id: Uuid, state: TaskState, retries: u32) {
        self.statuses.insert(task_id, TaskStatus { state, retries });
        if matches!(state, TaskState::Completed | TaskState::Failed) {
            self.finished.push_back(task_id);
            while self.finished.len() > FINISHED_TASK_HISTORY {
                if let Some(evicted) = self.finished.pop_front() {
                    self.statuses.remove(&evicted);
                }
            }
        }
    }
}

type AnchorLocks = Arc<Mutex<HashMap<(String, String), Arc<tokio::sync::Mutex<()>>>>>;

/// Bounded background reconciliation pool.
///
/// Triggers enqueue work and return immediately; a full queue surfaces as
/// backpressure instead of unbounded fan-out. Workers serialize tasks per
/// `(tenant, anchor)` so two triggers for the same anchor can never
/// interleave their remote mutations. Outcomes are observable through the
/// task registry and structured logs only.
pub struct Dispatcher {
    sender: mpsc::Sender<SyncTask>,
    registry: Arc<Mutex<TaskRegistry>>,
    anchor_locks: AnchorLocks,
}

impl Dispatcher {
    /// Spawn `workers` drain loops over a queue of `queue_capacity` entries.
    /// `relations` is the authoritative cache the workers read desired sets
    /// from at execution time.
    pub fn start(
        executor: Arc<SyncExecutor>,
        relations: Arc<RelationCache>,
        queue_capacity: usize,
        workers: usize,
    ) -> Self {
        let (sender, receiver) = mpsc::channel::<SyncTask>(queue_capacity.max(1));
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let registry: Arc<Mutex<TaskRegistry>> = Arc::new(Mutex::new(TaskRegistry::default()));
        let anchor_locks: AnchorLocks = Arc::new(Mutex::new(HashMap::new()));

        for worker in 0..workers.max(1) {
            let receiver = receiver.clone();
            let registry = registry.clone();
            let anchor_locks = anchor_locks.clone();
            let executor = executor.clone();
            let relations = relations.clone();

            tokio::spawn(async move {
                loop {
                    let task = {
                        let mut guard = receiver.lock().await;
                        guard.recv().await
                    };
                    let Some(task) = task else {
                        break;
                    };

                    set_state(&registry, task.id, TaskState::Running, 0);

                    // Serialize reconciliations for the same anchor.
                    let key = (task.tenant_id.clone(), task.anchor_id.clone());
                    let lock = {
                        let mut locks = anchor_locks.lock().expect("anchor lock map poisoned");
                        locks
                            .entry(key.clone())
                            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                            .clone()
                    };
                    let guard = lock.lock().await;

                    // Under the anchor lock the cache cannot be older than
                    // any snapshot a competing task was submitted with.
                    let desired = relations
                        .counterparts_for(&task.tenant_id, task.anchor_kind, &task.anchor_id)
                        .await;

                    tracing::debug!(
                        worker,
                        task_id = %task.id,
                        tenant_id = %task.tenant_id,
                        anchor = %task.anchor_kind,
                        anchor_id = %task.anchor_id,
                        "running reconciliation task"
                    );

                    match executor
                        .reconcile(
                            &task.tenant_id,
                            task.anchor_kind,
                            &task.anchor_id,
                            &desired,
                        )
                        .await
                    {
                        Ok(outcome) => {
                            set_state(&registry, task.id, TaskState::Completed, outcome.retries);
                        }
                        Err(e) => {
                            tracing::warn!(
                                task_id = %task.id,
                                tenant_id = %task.tenant_id,
                                anchor_id = %task.anchor_id,
                                error = %e,
                                "reconciliation task failed, will retry on next trigger"
                            );
                            set_state(&registry, task.id, TaskState::Failed, 0);
                        }
                    }

                    drop(guard);
                    // Prune the anchor's mutex once nothing else holds or
                    // waits on it; otherwise the map grows one entry per
                    // anchor ever touched.
                    let mut locks = anchor_locks.lock().expect("anchor lock map poisoned");
                    if locks.get(&key).is_some_and(|l| Arc::strong_count(l) <= 2) {
                        locks.remove(&key);
                    }
                }
            });
        }

        Self {
            sender,
            registry,
            anchor_locks,
        }
    }

    /// Schedule one reconciliation unit and return immediately. The caller
    /// never blocks on or observes the outcome synchronously.
    pub fn submit(
        &self,
        tenant_id: &str,
        anchor_kind: AnchorKind,
        anchor_id: &str,
    ) -> Result<Uuid, DispatchError> {
        let task = SyncTask {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            anchor_kind,
            anchor_id: anchor_id.to_string(),
        };
        let id = task.id;

        set_state(&self.registry, id, TaskState::Queued, 0);

        match self.sender.try_send(task) {
            Ok(()) => {
                tracing::debug!(task_id = %id, tenant_id, anchor_id, "reconciliation task queued");
                Ok(id)
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.remove_status(id);
                tracing::warn!(tenant_id, anchor_id, "reconciliation queue full, rejecting task");
                Err(DispatchError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.remove_status(id);
                Err(DispatchError::Closed)
            }
        }
    }

    /// Current status of a submitted task. `None` for unknown ids and for
    /// finished tasks already evicted from the bounded history.
    pub fn status(&self, task_id: Uuid) -> Option<TaskStatus> {
        self.registry
            .lock()
            .expect("task registry poisoned")
            .statuses
            .get(&task_id)
            .cloned()
    }

    fn remove_status(&self, task_id: Uuid) {
        self.registry
            .lock()
            .expect("task registry poisoned")
            .statuses
            .remove(&task_id);
    }

    #[cfg(test)]
    fn anchor_lock_count(&self) -> usize {
        self.anchor_locks
            .lock()
            .expect("anchor lock map poisoned")
            .len()
    }
}

fn set_state(
    registry: &Arc<Mutex<TaskRegistry>>,
    task_id: Uuid,
    state: TaskState,
    retries: u32,
) {
    registry
        .lock()
        .expect("task registry poisoned")
        .set(task_id, state, retries);
}
