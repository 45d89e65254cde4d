//! In-memory working window of each conversation.
//!
//! The cache is the authoritative working view; the store is the durable one.
//! Each conversation has its own slot behind an async lock, so operations on
//! one conversation are serialized while different conversations proceed in
//! parallel. Writes are handed to the persistence queue while the slot lock
//! is held, which keeps the on-disk order identical to the in-memory order.
//!
//! At most `max_conversations` slots are kept. Past that, the least recently
//! used slots that no task is holding are dropped; their windows reload from
//! the store on next use.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use parley_core::error::{ParleyError, Result};
use parley_core::types::{ConversationId, ConversationSummary, Message};

use crate::persist::{PersistenceHandle, SaveMode};
use crate::store::ConversationStore;

#[derive(Debug, Default)]
struct Slot {
    /// `None` until loaded from the store (and again after a clear).
    window: Option<Vec<Message>>,
}

type SlotRef = Arc<tokio::sync::Mutex<Slot>>;

/// Default bound on the number of cached conversations.
pub const DEFAULT_MAX_CONVERSATIONS: usize = 256;

#[derive(Debug)]
struct SlotEntry {
    slot: SlotRef,
    last_used: u64,
}

#[derive(Debug, Default)]
struct SlotTable {
    entries: HashMap<ConversationId, SlotEntry>,
    clock: u64,
}

impl SlotTable {
    /// Drop least recently used idle slots until at most `max` remain.
    fn evict_idle(&mut self, max: usize, keep: &ConversationId) {
        if self.entries.len() <= max {
            return;
        }
        let mut idle: Vec<(u64, ConversationId)> = self
            .entries
            .iter()
            .filter(|(id, e)| *id != keep && Arc::strong_count(&e.slot) == 1)
            .map(|(id, e)| (e.last_used, id.clone()))
            .collect();
        idle.sort_unstable_by_key(|(last_used, _)| *last_used);

        let excess = self.entries.len() - max;
        for (_, id) in idle.into_iter().take(excess) {
            self.entries.remove(&id);
            tracing::debug!(conversation_id = %id, "Conversation evicted from cache");
        }
    }
}

/// Process-wide conversation cache backed by a [`ConversationStore`].
pub struct ConversationCache {
    store: ConversationStore,
    persist: PersistenceHandle,
    limit: usize,
    mode: SaveMode,
    max_conversations: usize,
    slots: Mutex<SlotTable>,
}

impl ConversationCache {
    /// Create a cache keeping at most `limit` messages per conversation.
    pub fn new(
        store: ConversationStore,
        persist: PersistenceHandle,
        limit: usize,
        mode: SaveMode,
    ) -> Self {
        Self {
            store,
            persist,
            limit: limit.max(2),
            mode,
            max_conversations: DEFAULT_MAX_CONVERSATIONS,
            slots: Mutex::new(SlotTable::default()),
        }
    }

    /// Bound the number of conversations kept in memory.
    pub fn with_max_conversations(mut self, max: usize) -> Self {
        self.max_conversations = max.max(1);
        self
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    fn slot(&self, id: &ConversationId) -> Result<SlotRef> {
        let mut slots = self
            .slots
            .lock()
            .map_err(|e| ParleyError::Persistence(format!("cache lock poisoned: {}", e)))?;
        slots.clock += 1;
        let now = slots.clock;
        let slot = {
            let entry = slots.entries.entry(id.clone()).or_insert_with(|| SlotEntry {
                slot: SlotRef::default(),
                last_used: now,
            });
            entry.last_used = now;
            Arc::clone(&entry.slot)
        };
        slots.evict_idle(self.max_conversations, id);
        Ok(slot)
    }

    /// Apply queued writes before a window is (re)loaded from the store.
    async fn settle(&self, id: &ConversationId, slot: &Slot) {
        if slot.window.is_none() {
            if let Err(e) = self.persist.flush().await {
                tracing::warn!(conversation_id = %id, error = %e, "Loading conversation without flushing");
            }
        }
    }

    fn truncate(&self, window: &mut Vec<Message>) {
        if window.len() > self.limit {
            let excess = window.len() - self.limit;
            window.drain(..excess);
        }
    }

    /// Working window of `id`, loading it from the store on first use.
    pub async fn get(&self, id: &ConversationId) -> Result<Vec<Message>> {
        let slot = self.slot(id)?;
        let mut guard = slot.lock().await;
        self.settle(id, &guard).await;
        Ok(self.loaded(id, &mut guard).clone())
    }

    fn loaded<'a>(&self, id: &ConversationId, slot: &'a mut Slot) -> &'a mut Vec<Message> {
        slot.window.get_or_insert_with(|| {
            let mut window = self.store.load(id);
            self.truncate(&mut window);
            tracing::debug!(conversation_id = %id, messages = window.len(), "Conversation cached");
            window
        })
    }

    /// Append one exchange and queue it for persistence.
    ///
    /// The window is truncated to the most recent `limit` messages. Queue
    /// failures are logged and never surfaced.
    pub async fn append(&self, id: &ConversationId, user: Message, assistant: Message) {
        let slot = match self.slot(id) {
            Ok(slot) => slot,
            Err(e) => {
                tracing::error!(conversation_id = %id, error = %e, "Failed to update conversation");
                return;
            }
        };
        let mut guard = slot.lock().await;
        self.settle(id, &guard).await;
        let window = self.loaded(id, &mut guard);
        window.push(user.clone());
        window.push(assistant.clone());
        self.truncate(window);

        let queued = match self.mode {
            SaveMode::Append => self.persist.append(id.clone(), vec![user, assistant]).await,
            SaveMode::Window => self.persist.replace(id.clone(), window.clone()).await,
        };
        if let Err(e) = queued {
            tracing::warn!(conversation_id = %id, error = %e, "Conversation not queued for saving");
        }
    }

    /// Load the full stored transcript of `id` and reset its window from it.
    ///
    /// Pending writes are flushed first so the returned history is current.
    pub async fn open(&self, id: &ConversationId) -> Result<Vec<Message>> {
        let slot = self.slot(id)?;
        let mut guard = slot.lock().await;
        self.persist.flush().await?;
        let history = self.store.load(id);
        let mut window = history.clone();
        self.truncate(&mut window);
        guard.window = Some(window);
        Ok(history)
    }

    /// Drop the cached window of `id` and delete its transcript.
    ///
    /// Returns whether a transcript existed on disk.
    pub async fn clear(&self, id: &ConversationId) -> Result<bool> {
        let slot = self.slot(id)?;
        let removed = {
            let mut guard = slot.lock().await;
            guard.window = None;
            self.persist.delete(id.clone()).await?
        };

        // Forget the slot unless another task is waiting on it.
        if let Ok(mut slots) = self.slots.lock() {
            if Arc::strong_count(&slot) == 2 {
                slots.entries.remove(id);
            }
        }
        Ok(removed)
    }

    /// Stored conversations, newest first, including writes still queued.
    pub async fn list(&self) -> Vec<ConversationSummary> {
        if let Err(e) = self.persist.flush().await {
            tracing::warn!(error = %e, "Listing conversations without flushing");
        }
        self.store.list()
    }

    /// Number of conversations with a loaded window.
    pub fn cached_conversations(&self) -> usize {
        self.slots
            .lock()
            .map(|slots| {
                slots
                    .entries
                    .values()
                    .filter(|entry| {
                        entry
                            .slot
                            .try_lock()
                            .map(|s| s.window.is_some())
                            .unwrap_or(true)
                    })
                    .count()
            })
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::PersistenceWorker;

    fn id(raw: &str) -> ConversationId {
        ConversationId::parse(raw).unwrap()
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        store: ConversationStore,
        worker: PersistenceWorker,
        cache: Arc<ConversationCache>,
    }

    fn fixture(mode: SaveMode) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = ConversationStore::open(dir.path()).unwrap();
        let worker = PersistenceWorker::spawn(store.clone(), 8);
        let cache = Arc::new(ConversationCache::new(store.clone(), worker.handle(), 40, mode));
        Fixture {
            _dir: dir,
            store,
            worker,
            cache,
        }
    }

    fn contents(messages: &[Message]) -> Vec<String> {
        messages.iter().map(|m| m.content.clone()).collect()
    }

    #[tokio::test]
    async fn test_get_unknown_is_empty() {
        let f = fixture(SaveMode::Append);
        assert!(f.cache.get(&id("fresh")).await.unwrap().is_empty());
        assert!(f.cache.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_get_populates_from_store() {
        let f = fixture(SaveMode::Append);
        f.store
            .save(&id("known"), &[Message::user("hi"), Message::assistant("hello")]);
        let window = f.cache.get(&id("known")).await.unwrap();
        assert_eq!(contents(&window), vec!["hi", "hello"]);
        assert_eq!(f.cache.cached_conversations(), 1);
    }

    #[tokio::test]
    async fn test_window_keeps_most_recent_forty_in_order() {
        let f = fixture(SaveMode::Append);
        let conv = id("long");
        for i in 0..25 {
            f.cache
                .append(
                    &conv,
                    Message::user(format!("q{}", i)),
                    Message::assistant(format!("a{}", i)),
                )
                .await;
        }

        let window = f.cache.get(&conv).await.unwrap();
        assert_eq!(window.len(), 40);
        assert_eq!(window[0].content, "q5");
        assert_eq!(window[39].content, "a24");
        for pair in window.chunks(2) {
            assert_eq!(pair[0].content[1..], pair[1].content[1..]);
        }
    }

    #[tokio::test]
    async fn test_append_mode_keeps_full_history_on_disk() {
        let f = fixture(SaveMode::Append);
        let conv = id("full");
        for i in 0..25 {
            f.cache
                .append(&conv, Message::user(format!("q{}", i)), Message::assistant("a"))
                .await;
        }
        f.cache.list().await;
        assert_eq!(f.store.load(&conv).len(), 50);
    }

    #[tokio::test]
    async fn test_window_mode_truncates_disk_too() {
        let f = fixture(SaveMode::Window);
        let conv = id("capped");
        for i in 0..25 {
            f.cache
                .append(&conv, Message::user(format!("q{}", i)), Message::assistant("a"))
                .await;
        }
        f.cache.list().await;
        let stored = f.store.load(&conv);
        assert_eq!(stored.len(), 40);
        assert_eq!(stored[0].content, "q5");
    }

    #[tokio::test]
    async fn test_appended_conversation_is_listed_with_title() {
        let f = fixture(SaveMode::Append);
        f.cache
            .append(
                &id("abc123"),
                Message::user("What is the capital of France?"),
                Message::assistant("Paris."),
            )
            .await;

        let list = f.cache.list().await;
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].id.as_str(), "abc123");
        assert_eq!(list[0].title, "What is the capital of France?");
    }

    #[tokio::test]
    async fn test_clear_removes_window_and_file() {
        let f = fixture(SaveMode::Append);
        let conv = id("wipe");
        f.cache
            .append(&conv, Message::user("x"), Message::assistant("y"))
            .await;

        assert!(f.cache.clear(&conv).await.unwrap());
        assert!(f.store.load(&conv).is_empty());
        assert!(f.cache.list().await.is_empty());
        assert!(f.cache.get(&conv).await.unwrap().is_empty());
        assert!(!f.cache.clear(&conv).await.unwrap());
    }

    #[tokio::test]
    async fn test_open_returns_full_history_and_caps_window() {
        let f = fixture(SaveMode::Append);
        let conv = id("reopen");
        let history: Vec<Message> = (0..50).map(|i| Message::user(format!("m{}", i))).collect();
        f.store.save(&conv, &history);

        let full = f.cache.open(&conv).await.unwrap();
        assert_eq!(full.len(), 50);
        let window = f.cache.get(&conv).await.unwrap();
        assert_eq!(window.len(), 40);
        assert_eq!(window[0].content, "m10");
    }

    #[tokio::test]
    async fn test_slots_bounded_by_least_recent_use() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConversationStore::open(dir.path()).unwrap();
        let worker = PersistenceWorker::spawn(store.clone(), 8);
        let cache = ConversationCache::new(store, worker.handle(), 40, SaveMode::Append)
            .with_max_conversations(3);

        for raw in ["c0", "c1", "c2"] {
            cache
                .append(&id(raw), Message::user(raw), Message::assistant("ok"))
                .await;
        }
        // Touch c0 so c1 becomes the least recently used.
        cache.get(&id("c0")).await.unwrap();
        for raw in ["c3", "c4"] {
            cache.get(&id(raw)).await.unwrap();
        }
        assert_eq!(cache.cached_conversations(), 3);
        {
            let slots = cache.slots.lock().unwrap();
            assert!(slots.entries.contains_key(&id("c0")));
            assert!(!slots.entries.contains_key(&id("c1")));
            assert!(!slots.entries.contains_key(&id("c2")));
        }

        // An evicted conversation reloads with its queued writes applied.
        let reloaded = cache.get(&id("c1")).await.unwrap();
        assert_eq!(contents(&reloaded), vec!["c1", "ok"]);
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn test_slot_in_use_is_not_evicted() {
        let f = fixture(SaveMode::Append);
        let cache = ConversationCache::new(
            f.store.clone(),
            f.worker.handle(),
            40,
            SaveMode::Append,
        )
        .with_max_conversations(1);

        let held = cache.slot(&id("busy")).unwrap();
        cache.get(&id("other")).await.unwrap();
        let slots = cache.slots.lock().unwrap();
        assert!(slots.entries.contains_key(&id("busy")));
        assert!(slots.entries.contains_key(&id("other")));
        drop(held);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_appends_lose_nothing() {
        let f = fixture(SaveMode::Append);
        let conv = id("busy");
        let mut tasks = Vec::new();
        for i in 0..16 {
            let cache = Arc::clone(&f.cache);
            let conv = conv.clone();
            tasks.push(tokio::spawn(async move {
                cache
                    .append(
                        &conv,
                        Message::user(format!("q{}", i)),
                        Message::assistant(format!("a{}", i)),
                    )
                    .await;
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let window = f.cache.get(&conv).await.unwrap();
        assert_eq!(window.len(), 32);
        for pair in window.chunks(2) {
            assert_eq!(pair[0].content[1..], pair[1].content[1..]);
        }
        f.cache.list().await;
        assert_eq!(f.store.load(&conv), window);
        f.worker.shutdown().await;
    }
}
