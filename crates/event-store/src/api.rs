use std::ops::Range;
use std::panic;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use soulbrowser_core_types::{ConversationId, EventId};
use soulbrowser_event_bus::{EventBus, InMemoryBus};

use crate::config::EventStoreConfig;
use crate::errors::{EsError, EsErrorKind};
use crate::journal::{self, JournalWriter};
use crate::metrics::{EsMetrics, EsMetricsSnapshot};
use crate::model::{Event, EventDraft};
use crate::read::slice::EventSlice;

pub type EventStoreResult<T> = Result<T, EsError>;
pub type PostHook = Arc<dyn Fn(&Event) + Send + Sync + 'static>;

/// Append-only, ordered history of a single conversation.
///
/// Cloning yields another handle onto the same log.
#[derive(Clone)]
pub struct EventLog {
    inner: Arc<LogInner>,
}

pub(crate) struct LogInner {
    conversation: ConversationId,
    events: RwLock<Vec<Arc<Event>>>,
    by_id: DashMap<EventId, u64>,
    writer: Mutex<WriterState>,
    hooks: HookRegistry,
    bus: InMemoryBus<Arc<Event>>,
    metrics: EsMetrics,
}

struct WriterState {
    journal: Option<JournalWriter>,
}

impl LogInner {
    pub(crate) fn event_at(&self, index: u64) -> Option<Arc<Event>> {
        self.events.read().get(index as usize).cloned()
    }

    pub(crate) fn len(&self) -> u64 {
        self.events.read().len() as u64
    }
}

impl EventLog {
    /// Memory-only log; nothing is journaled.
    pub fn in_memory(conversation: ConversationId) -> Self {
        Self::from_parts(conversation, &EventStoreConfig::default(), Vec::new(), None)
    }

    /// Opens a log, journaling to disk when the config enables it.
    pub fn new(conversation: ConversationId, config: &EventStoreConfig) -> EventStoreResult<Self> {
        let journal = if config.journal.enabled {
            let path = config.journal.path_for(conversation.as_str());
            Some(JournalWriter::open(&path)?)
        } else {
            None
        };
        Ok(Self::from_parts(conversation, config, Vec::new(), journal))
    }

    /// Rebuilds a log from its journal (an absent journal yields an empty log)
    /// and keeps appending to the same file.
    pub fn restore(
        conversation: ConversationId,
        config: &EventStoreConfig,
    ) -> EventStoreResult<Self> {
        let path = config.journal.path_for(conversation.as_str());
        let events = if path.exists() {
            journal::read_all(&path)?
        } else {
            Vec::new()
        };
        info!(
            conversation = %conversation,
            events = events.len(),
            path = %path.display(),
            "restored event log from journal"
        );
        let journal = Some(JournalWriter::open(&path)?);
        Ok(Self::from_parts(conversation, config, events, journal))
    }

    fn from_parts(
        conversation: ConversationId,
        config: &EventStoreConfig,
        events: Vec<Event>,
        journal: Option<JournalWriter>,
    ) -> Self {
        let by_id = DashMap::with_capacity(events.len());
        let events: Vec<Arc<Event>> = events
            .into_iter()
            .map(|event| {
                by_id.insert(event.id, event.index);
                Arc::new(event)
            })
            .collect();
        Self {
            inner: Arc::new(LogInner {
                conversation,
                events: RwLock::new(events),
                by_id,
                writer: Mutex::new(WriterState { journal }),
                hooks: HookRegistry::default(),
                bus: InMemoryBus::with_config(config.stream.bus_config()),
                metrics: EsMetrics::default(),
            }),
        }
    }

    pub fn conversation(&self) -> &ConversationId {
        &self.inner.conversation
    }

    /// Number of committed events; used as the optimistic-concurrency token.
    pub fn version(&self) -> u64 {
        self.inner.len()
    }

    pub fn len(&self) -> usize {
        self.inner.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends one event and returns its index.
    pub async fn append(
        &self,
        draft: EventDraft,
        expected_version: Option<u64>,
    ) -> EventStoreResult<u64> {
        let range = self.append_batch(vec![draft], expected_version).await?;
        Ok(range.start)
    }

    /// Appends all drafts with contiguous indices, or none of them.
    pub async fn append_batch(
        &self,
        drafts: Vec<EventDraft>,
        expected_version: Option<u64>,
    ) -> EventStoreResult<Range<u64>> {
        let mut writer = self.inner.writer.lock().await;
        let actual = self.inner.len();
        if let Some(expected) = expected_version {
            if expected != actual {
                self.inner.metrics.record_conflict();
                warn!(
                    conversation = %self.inner.conversation,
                    expected,
                    actual,
                    "append rejected: log moved since read"
                );
                return Err(EsErrorKind::ConcurrentModification { expected, actual }.into());
            }
        }
        if drafts.is_empty() {
            return Ok(actual..actual);
        }

        let stamped: Vec<Event> = drafts
            .into_iter()
            .enumerate()
            .map(|(offset, draft)| draft.stamp(actual + offset as u64))
            .collect();

        if let Some(journal) = writer.journal.as_mut() {
            if let Err(err) = journal.append(&stamped) {
                self.inner.metrics.record_journal_error();
                return Err(err);
            }
        }

        let committed: Vec<Arc<Event>> = stamped.into_iter().map(Arc::new).collect();
        {
            let mut events = self.inner.events.write();
            events.extend(committed.iter().cloned());
        }
        for event in &committed {
            self.inner.by_id.insert(event.id, event.index);
        }
        let end = actual + committed.len() as u64;
        self.inner.metrics.record_appended(committed.len() as u64);
        debug!(
            conversation = %self.inner.conversation,
            from = actual,
            to = end,
            "events committed"
        );

        // Observers run while the writer lock is held so they see commit order.
        for event in &committed {
            self.inner.hooks.emit(event, &self.inner.metrics);
            if let Ok(report) = self.inner.bus.publish(event.clone()).await {
                self.inner
                    .metrics
                    .record_dropped_subscribers(report.dropped as u64);
            }
        }
        drop(writer);

        Ok(actual..end)
    }

    /// Lazy, restartable view over `[from, to)`; `to` is clamped to the
    /// current length.
    pub fn slice(&self, from: u64, to: u64) -> EventSlice {
        let len = self.inner.len();
        let to = to.min(len);
        let from = from.min(to);
        EventSlice::new(self.inner.clone(), from, to)
    }

    pub fn get(&self, index: u64) -> Option<Arc<Event>> {
        self.inner.event_at(index)
    }

    pub fn get_by_id(&self, id: &EventId) -> EventStoreResult<Arc<Event>> {
        let index = self
            .inner
            .by_id
            .get(id)
            .map(|entry| *entry.value())
            .ok_or_else(|| EsError::from(EsErrorKind::NotFound(id.to_string())))?;
        self.inner
            .event_at(index)
            .ok_or_else(|| EsErrorKind::NotFound(id.to_string()).into())
    }

    /// All committed events at the time of the call.
    pub fn snapshot(&self) -> Vec<Arc<Event>> {
        self.inner.events.read().clone()
    }

    /// Every event appended after this call, in commit order.
    pub fn subscribe(&self) -> EventSubscription {
        EventSubscription {
            receiver: self.inner.bus.subscribe(),
        }
    }

    pub fn register_post_hook(&self, hook: PostHook) {
        self.inner.hooks.register(hook);
    }

    pub fn register_post_hook_fn<F>(&self, hook: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.inner.hooks.register(Arc::new(hook));
    }

    pub fn metrics(&self) -> EsMetricsSnapshot {
        self.inner.metrics.snapshot()
    }
}

/// Receiving end of [`EventLog::subscribe`].
///
/// `recv` returns `None` once the subscriber has been dropped for lagging
/// past the grace period.
pub struct EventSubscription {
    receiver: mpsc::Receiver<Arc<Event>>,
}

impl EventSubscription {
    pub async fn recv(&mut self) -> Option<Arc<Event>> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Arc<Event>> {
        self.receiver.try_recv().ok()
    }
}

#[derive(Default)]
struct HookRegistry {
    hooks: RwLock<Vec<PostHook>>,
}

impl HookRegistry {
    fn register(&self, hook: PostHook) {
        self.hooks.write().push(hook);
    }

    fn emit(&self, event: &Event, metrics: &EsMetrics) {
        let snapshot: Vec<PostHook> = self.hooks.read().iter().cloned().collect();
        for hook in snapshot {
            if panic::catch_unwind(panic::AssertUnwindSafe(|| (hook)(event))).is_err() {
                metrics.record_hook_panic();
                warn!(index = event.index, "event post-hook panicked; continuing");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;
    use soulbrowser_core_types::{Action, ConversationStatus, EventSource, Observation};
    use tempfile::TempDir;

    use crate::config::JournalCfg;

    fn log() -> EventLog {
        EventLog::in_memory(ConversationId::named("conv-test"))
    }

    #[tokio::test]
    async fn indices_follow_append_order() {
        let log = log();
        assert_eq!(log.append(EventDraft::user_message("hi"), None).await.unwrap(), 0);
        assert_eq!(log.append(EventDraft::agent_message("hello"), Some(1)).await.unwrap(), 1);
        assert_eq!(log.version(), 2);

        let events = log.snapshot();
        assert_eq!(events[0].source, EventSource::User);
        assert_eq!(events[1].index, 1);
    }

    #[tokio::test]
    async fn stale_version_is_rejected() {
        let log = log();
        log.append(EventDraft::user_message("one"), None).await.unwrap();

        let err = log
            .append(EventDraft::user_message("two"), Some(0))
            .await
            .expect_err("stale expectation must fail");
        assert!(err.is_conflict());
        assert_eq!(
            err.kind(),
            &EsErrorKind::ConcurrentModification { expected: 0, actual: 1 }
        );
        assert_eq!(log.len(), 1);
        assert_eq!(log.metrics().conflicts, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writers_get_distinct_contiguous_indices() {
        let log = log();
        let mut handles = Vec::new();
        for worker in 0..8 {
            let log = log.clone();
            handles.push(tokio::spawn(async move {
                let mut indices = Vec::new();
                for n in 0..25 {
                    let idx = log
                        .append(EventDraft::agent_message(format!("{worker}-{n}")), None)
                        .await
                        .expect("append");
                    indices.push(idx);
                }
                indices
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            let indices = handle.await.expect("join");
            assert!(indices.windows(2).all(|pair| pair[0] < pair[1]));
            all.extend(indices);
        }
        all.sort_unstable();
        assert_eq!(all, (0..200).collect::<Vec<u64>>());
        for (pos, event) in log.snapshot().iter().enumerate() {
            assert_eq!(event.index, pos as u64);
        }
    }

    #[tokio::test]
    async fn batch_is_all_or_nothing() {
        let log = log();
        let action = Action::new("click", json!({ "selector": "#a" }));
        let range = log
            .append_batch(
                vec![
                    EventDraft::action(action.clone()),
                    EventDraft::observation(Observation::success(&action, json!("ok"))),
                ],
                Some(0),
            )
            .await
            .unwrap();
        assert_eq!(range, 0..2);

        let rejected = log
            .append_batch(
                vec![
                    EventDraft::user_message("x"),
                    EventDraft::user_message("y"),
                ],
                Some(1),
            )
            .await;
        assert!(rejected.is_err());
        assert_eq!(log.len(), 2);
    }

    #[tokio::test]
    async fn slices_are_restartable_and_clamped() {
        let log = log();
        for n in 0..5 {
            log.append(EventDraft::user_message(format!("m{n}")), None)
                .await
                .unwrap();
        }

        let slice = log.slice(1, 4);
        let first: Vec<u64> = slice.iter().map(|e| e.index).collect();
        let second: Vec<u64> = slice.iter().map(|e| e.index).collect();
        assert_eq!(first, vec![1, 2, 3]);
        assert_eq!(first, second);

        let clamped = log.slice(3, 100);
        assert_eq!(clamped.len(), 2);
        assert!(log.slice(10, 20).is_empty());
    }

    #[tokio::test]
    async fn lookup_by_id() {
        let log = log();
        log.append(EventDraft::user_message("find me"), None)
            .await
            .unwrap();
        let id = log.snapshot()[0].id;
        let event = log.get_by_id(&id).unwrap();
        assert_eq!(event.as_message().map(|m| m.content.as_str()), Some("find me"));

        let missing = log.get_by_id(&EventId::new()).unwrap_err();
        assert!(matches!(missing.kind(), EsErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn subscribers_see_commit_order() {
        let log = log();
        let mut sub = log.subscribe();
        log.append_batch(
            vec![
                EventDraft::user_message("a"),
                EventDraft::status(ConversationStatus::Success, None),
            ],
            None,
        )
        .await
        .unwrap();
        log.append(EventDraft::agent_message("b"), None).await.unwrap();

        for expected in 0..3 {
            let event = sub.recv().await.expect("event");
            assert_eq!(event.index, expected);
        }
    }

    #[tokio::test]
    async fn panicking_hook_does_not_block_append() {
        let log = log();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        log.register_post_hook_fn(|_| panic!("hook failure"));
        log.register_post_hook_fn(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        log.append(EventDraft::user_message("a"), None).await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(log.metrics().hook_panics, 1);
    }

    #[tokio::test]
    async fn journal_restores_history() {
        let dir = TempDir::new().expect("tempdir");
        let config = EventStoreConfig {
            journal: JournalCfg {
                enabled: true,
                root: dir.path().to_path_buf(),
            },
            ..EventStoreConfig::default()
        };
        let conversation = ConversationId::named("journaled");

        let log = EventLog::new(conversation.clone(), &config).unwrap();
        log.append(EventDraft::user_message("first"), None).await.unwrap();
        log.append(EventDraft::agent_message("second"), None).await.unwrap();
        let original = log.snapshot();
        drop(log);

        let restored = EventLog::restore(conversation, &config).unwrap();
        assert_eq!(restored.version(), 2);
        assert_eq!(restored.snapshot()[1].id, original[1].id);
        assert_eq!(
            restored.append(EventDraft::user_message("third"), Some(2)).await.unwrap(),
            2
        );
    }
}
