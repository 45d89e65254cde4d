//! Background persistence of conversation transcripts.
//!
//! A single [`PersistenceWorker`] owns the [`ConversationStore`] writes and
//! drains a bounded queue on a blocking thread. Callers hold a cheap
//! [`PersistenceHandle`]; enqueueing waits when the queue is full.
//!
//! Jobs run strictly in the order they were enqueued, so two saves for the
//! same conversation can never land out of order, and a save queued before a
//! delete can never resurrect the deleted file.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use parley_core::error::{ParleyError, Result};
use parley_core::types::{ConversationId, Message};

use crate::store::ConversationStore;

/// How an appended exchange reaches the disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveMode {
    /// Append the new messages to the stored transcript (full history on disk).
    Append,
    /// Overwrite the stored transcript with the in-memory window.
    Window,
}

impl SaveMode {
    pub fn from_full_history(persist_full_history: bool) -> Self {
        if persist_full_history {
            SaveMode::Append
        } else {
            SaveMode::Window
        }
    }
}

enum Job {
    Append {
        id: ConversationId,
        messages: Vec<Message>,
    },
    Replace {
        id: ConversationId,
        history: Vec<Message>,
    },
    Delete {
        id: ConversationId,
        done: oneshot::Sender<Result<bool>>,
    },
    Flush {
        done: oneshot::Sender<()>,
    },
    Stop,
}

/// Sending side of the persistence queue.
#[derive(Debug, Clone)]
pub struct PersistenceHandle {
    tx: mpsc::Sender<Job>,
}

impl PersistenceHandle {
    async fn send(&self, job: Job) -> Result<()> {
        self.tx.send(job).await.map_err(|_| ParleyError::ShuttingDown)
    }

    /// Queue `messages` to be appended to the transcript of `id`.
    pub async fn append(&self, id: ConversationId, messages: Vec<Message>) -> Result<()> {
        self.send(Job::Append { id, messages }).await
    }

    /// Queue a full overwrite of the transcript of `id`.
    pub async fn replace(&self, id: ConversationId, history: Vec<Message>) -> Result<()> {
        self.send(Job::Replace { id, history }).await
    }

    /// Delete the transcript of `id` once every earlier job has run.
    ///
    /// Returns whether a file was removed.
    pub async fn delete(&self, id: ConversationId) -> Result<bool> {
        let (done, rx) = oneshot::channel();
        self.send(Job::Delete { id, done }).await?;
        rx.await.map_err(|_| ParleyError::ShuttingDown)?
    }

    /// Wait until every job queued so far has been applied.
    pub async fn flush(&self) -> Result<()> {
        let (done, rx) = oneshot::channel();
        self.send(Job::Flush { done }).await?;
        rx.await.map_err(|_| ParleyError::ShuttingDown)
    }
}

/// Owner of the persistence thread.
pub struct PersistenceWorker {
    handle: PersistenceHandle,
    join: JoinHandle<()>,
}

impl PersistenceWorker {
    /// Start the worker with a queue holding at most `capacity` jobs.
    pub fn spawn(store: ConversationStore, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let join = tokio::task::spawn_blocking(move || run(store, rx));
        tracing::info!(capacity, "Persistence worker started");
        Self {
            handle: PersistenceHandle { tx },
            join,
        }
    }

    pub fn handle(&self) -> PersistenceHandle {
        self.handle.clone()
    }

    /// Apply every queued job, then stop the worker.
    ///
    /// Jobs enqueued after this call fail with [`ParleyError::ShuttingDown`].
    pub async fn shutdown(self) {
        if self.handle.send(Job::Stop).await.is_err() {
            tracing::warn!("Persistence worker already stopped");
        }
        if let Err(e) = self.join.await {
            tracing::error!(error = %e, "Persistence worker panicked");
        }
    }
}

fn run(store: ConversationStore, mut rx: mpsc::Receiver<Job>) {
    while let Some(job) = rx.blocking_recv() {
        match job {
            Job::Append { id, messages } => {
                store.append(&id, &messages);
            }
            Job::Replace { id, history } => {
                store.save(&id, &history);
            }
            Job::Delete { id, done } => {
                let result = store.delete(&id);
                if let Err(ref e) = result {
                    tracing::error!(conversation_id = %id, error = %e, "Error deleting conversation");
                }
                let _ = done.send(result);
            }
            Job::Flush { done } => {
                let _ = done.send(());
            }
            Job::Stop => break,
        }
    }
    rx.close();
    tracing::info!("Persistence worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: &str) -> ConversationId {
        ConversationId::parse(raw).unwrap()
    }

    fn setup() -> (tempfile::TempDir, ConversationStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ConversationStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_jobs_apply_in_order() {
        let (_dir, store) = setup();
        let worker = PersistenceWorker::spawn(store.clone(), 4);
        let handle = worker.handle();

        for i in 0..10 {
            handle
                .append(id("ordered"), vec![Message::user(format!("m{}", i))])
                .await
                .unwrap();
        }
        handle.flush().await.unwrap();

        let contents: Vec<String> = store
            .load(&id("ordered"))
            .into_iter()
            .map(|m| m.content)
            .collect();
        let expected: Vec<String> = (0..10).map(|i| format!("m{}", i)).collect();
        assert_eq!(contents, expected);
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn test_replace_overwrites() {
        let (_dir, store) = setup();
        let worker = PersistenceWorker::spawn(store.clone(), 4);
        let handle = worker.handle();

        handle
            .append(id("c"), vec![Message::user("old")])
            .await
            .unwrap();
        handle
            .replace(id("c"), vec![Message::user("new")])
            .await
            .unwrap();
        handle.flush().await.unwrap();

        assert_eq!(store.load(&id("c")), vec![Message::user("new")]);
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn test_delete_after_pending_save_leaves_no_file() {
        let (_dir, store) = setup();
        let worker = PersistenceWorker::spawn(store.clone(), 8);
        let handle = worker.handle();

        handle
            .append(id("doomed"), vec![Message::user("x")])
            .await
            .unwrap();
        assert!(handle.delete(id("doomed")).await.unwrap());
        assert!(!handle.delete(id("doomed")).await.unwrap());
        assert!(store.list().is_empty());
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_drains_queue_and_rejects_new_jobs() {
        let (_dir, store) = setup();
        let worker = PersistenceWorker::spawn(store.clone(), 16);
        let handle = worker.handle();

        handle
            .append(id("late"), vec![Message::user("before stop")])
            .await
            .unwrap();
        worker.shutdown().await;

        assert_eq!(store.load(&id("late")).len(), 1);
        let err = handle
            .append(id("late"), vec![Message::user("after stop")])
            .await
            .unwrap_err();
        assert!(matches!(err, ParleyError::ShuttingDown));
    }

    #[test]
    fn test_save_mode_from_flag() {
        assert_eq!(SaveMode::from_full_history(true), SaveMode::Append);
        assert_eq!(SaveMode::from_full_history(false), SaveMode::Window);
    }
}
