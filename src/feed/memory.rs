use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{broadcast, RwLock};
use tokio::time::Instant;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use crate::error::FeedError;
use crate::feed::{ItemStream, PresenceHandle, WorkFeed};
use crate::models::{LrpSpec, LrpState, RepPresence, Task, TaskState};

const EVENT_BUFFER: usize = 1024;

#[derive(Debug, Clone)]
enum DesiredEvent {
    Task(Task),
    Lrp(LrpSpec),
}

#[derive(Debug)]
struct PresenceRecord {
    presence: RepPresence,
    version: u64,
    expires_at: Instant,
}

impl PresenceRecord {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

#[derive(Debug, Default)]
struct FeedState {
    tasks: HashMap<String, Task>,
    lrps: HashMap<String, LrpSpec>,
    presences: HashMap<String, PresenceRecord>,
}

/// In-process work feed.
///
/// All state sits behind one lock so every claim and resolution is a
/// compare-and-swap. Desire events fan out over a broadcast channel; a
/// subscriber that falls behind receives [`FeedError::WatchLagged`] and is
/// expected to resubscribe, which replays everything still desired.
/// Presence expiry runs on tokio's clock.
#[derive(Clone)]
pub struct MemoryFeed {
    state: Arc<RwLock<FeedState>>,
    events: broadcast::Sender<DesiredEvent>,
    next_version: Arc<AtomicU64>,
}

impl Default for MemoryFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFeed {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            state: Arc::new(RwLock::new(FeedState::default())),
            events,
            next_version: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Add a pending task. Fails if the guid is already known.
    pub async fn desire_task(&self, mut task: Task) -> Result<(), FeedError> {
        let mut state = self.state.write().await;
        if state.tasks.contains_key(&task.guid) {
            return Err(FeedError::AlreadyDesired(task.guid));
        }
        task.state = TaskState::Pending;
        task.claimed_by = None;
        task.container_guid = None;
        state.tasks.insert(task.guid.clone(), task.clone());
        drop(state);

        tracing::debug!(task_guid = %task.guid, stack = %task.stack, "Task desired");
        // No subscribers is fine; the next watch replays from state.
        let _ = self.events.send(DesiredEvent::Task(task));
        Ok(())
    }

    /// Add a desired LRP. Fails if the guid is already known.
    pub async fn desire_lrp(&self, mut lrp: LrpSpec) -> Result<(), FeedError> {
        let mut state = self.state.write().await;
        if state.lrps.contains_key(&lrp.guid) {
            return Err(FeedError::AlreadyDesired(lrp.guid));
        }
        lrp.state = LrpState::Desired;
        lrp.claimed_by = None;
        state.lrps.insert(lrp.guid.clone(), lrp.clone());
        drop(state);

        tracing::debug!(lrp_guid = %lrp.guid, stack = %lrp.stack, "LRP desired");
        let _ = self.events.send(DesiredEvent::Lrp(lrp));
        Ok(())
    }

    pub async fn task(&self, guid: &str) -> Option<Task> {
        self.state.read().await.tasks.get(guid).cloned()
    }

    /// All tasks sorted chronologically by creation time
    pub async fn tasks(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.state.read().await.tasks.values().cloned().collect();
        tasks.sort_by_key(|t| t.created_at);
        tasks
    }

    pub async fn lrp(&self, guid: &str) -> Option<LrpSpec> {
        self.state.read().await.lrps.get(guid).cloned()
    }

    pub async fn lrps(&self) -> Vec<LrpSpec> {
        let mut lrps: Vec<LrpSpec> = self.state.read().await.lrps.values().cloned().collect();
        lrps.sort_by_key(|l| l.created_at);
        lrps
    }

    /// Every presence record, expired or not
    pub async fn presences(&self) -> Vec<RepPresence> {
        let mut presences: Vec<RepPresence> = self
            .state
            .read()
            .await
            .presences
            .values()
            .map(|r| r.presence.clone())
            .collect();
        presences.sort_by(|a, b| a.rep_id.cmp(&b.rep_id));
        presences
    }

    /// Presences whose lease has not expired
    pub async fn live_presences(&self) -> Vec<RepPresence> {
        let now = Instant::now();
        self.state
            .read()
            .await
            .presences
            .values()
            .filter(|r| r.is_live(now))
            .map(|r| r.presence.clone())
            .collect()
    }

    /// Drop a presence lease regardless of owner, as an operator or a
    /// competing writer would. The holder's next renewal fails.
    pub async fn revoke_presence(&self, rep_id: &str) -> bool {
        self.state.write().await.presences.remove(rep_id).is_some()
    }
}

#[async_trait]
impl WorkFeed for MemoryFeed {
    async fn watch_desired_tasks(&self, stack: &str) -> Result<ItemStream<Task>, FeedError> {
        // Subscribe before taking the snapshot so nothing desired in between is lost.
        let rx = self.events.subscribe();
        let snapshot: Vec<Task> = {
            let state = self.state.read().await;
            let mut pending: Vec<Task> = state
                .tasks
                .values()
                .filter(|t| t.state == TaskState::Pending && t.stack == stack)
                .cloned()
                .collect();
            pending.sort_by_key(|t| t.created_at);
            pending
        };

        let stack = stack.to_string();
        let live = BroadcastStream::new(rx).filter_map(move |event| match event {
            Ok(DesiredEvent::Task(task)) if task.stack == stack => Some(Ok(task)),
            Ok(_) => None,
            Err(BroadcastStreamRecvError::Lagged(n)) => Some(Err(FeedError::WatchLagged(n))),
        });

        Ok(Box::pin(tokio_stream::iter(snapshot.into_iter().map(Ok)).chain(live)))
    }

    async fn watch_desired_lrps(&self, stack: &str) -> Result<ItemStream<LrpSpec>, FeedError> {
        let rx = self.events.subscribe();
        let snapshot: Vec<LrpSpec> = {
            let state = self.state.read().await;
            let mut desired: Vec<LrpSpec> = state
                .lrps
                .values()
                .filter(|l| l.state == LrpState::Desired && l.stack == stack)
                .cloned()
                .collect();
            desired.sort_by_key(|l| l.created_at);
            desired
        };

        let stack = stack.to_string();
        let live = BroadcastStream::new(rx).filter_map(move |event| match event {
            Ok(DesiredEvent::Lrp(lrp)) if lrp.stack == stack => Some(Ok(lrp)),
            Ok(_) => None,
            Err(BroadcastStreamRecvError::Lagged(n)) => Some(Err(FeedError::WatchLagged(n))),
        });

        Ok(Box::pin(tokio_stream::iter(snapshot.into_iter().map(Ok)).chain(live)))
    }

    async fn claim_task(&self, task: &Task, rep_id: &str) -> Result<bool, FeedError> {
        let mut state = self.state.write().await;
        let stored = state
            .tasks
            .get_mut(&task.guid)
            .ok_or_else(|| FeedError::TaskNotFound(task.guid.clone()))?;

        if stored.state != TaskState::Pending {
            return Ok(false);
        }
        stored.state = TaskState::Claimed;
        stored.claimed_by = Some(rep_id.to_string());
        stored.updated_at = Some(Utc::now());
        Ok(true)
    }

    async fn claim_lrp(&self, lrp: &LrpSpec, rep_id: &str) -> Result<bool, FeedError> {
        let mut state = self.state.write().await;
        let stored = state
            .lrps
            .get_mut(&lrp.guid)
            .ok_or_else(|| FeedError::LrpNotFound(lrp.guid.clone()))?;

        if stored.state != LrpState::Desired {
            return Ok(false);
        }
        stored.state = LrpState::Claimed;
        stored.claimed_by = Some(rep_id.to_string());
        Ok(true)
    }

    async fn start_task(&self, guid: &str, container_guid: &str) -> Result<(), FeedError> {
        let mut state = self.state.write().await;
        let stored = state
            .tasks
            .get_mut(guid)
            .ok_or_else(|| FeedError::TaskNotFound(guid.to_string()))?;

        if stored.state != TaskState::Claimed {
            return Err(FeedError::StateMismatch {
                guid: guid.to_string(),
                expected: TaskState::Claimed.to_string(),
                actual: stored.state.to_string(),
            });
        }
        stored.state = TaskState::Running;
        stored.container_guid = Some(container_guid.to_string());
        stored.updated_at = Some(Utc::now());
        Ok(())
    }

    async fn complete_task(
        &self,
        guid: &str,
        failed: bool,
        failure_reason: &str,
        result: &str,
    ) -> Result<(), FeedError> {
        let mut state = self.state.write().await;
        let stored = state
            .tasks
            .get_mut(guid)
            .ok_or_else(|| FeedError::TaskNotFound(guid.to_string()))?;

        match stored.state {
            TaskState::Claimed | TaskState::Running => {
                stored.state = TaskState::Completed;
                stored.failed = failed;
                stored.failure_reason = failure_reason.to_string();
                stored.result = result.to_string();
                stored.updated_at = Some(Utc::now());
                Ok(())
            }
            other => Err(FeedError::StateMismatch {
                guid: guid.to_string(),
                expected: format!("{} or {}", TaskState::Claimed, TaskState::Running),
                actual: other.to_string(),
            }),
        }
    }

    async fn maintain_presence(
        &self,
        presence: &RepPresence,
        ttl: Duration,
    ) -> Result<Box<dyn PresenceHandle>, FeedError> {
        let version = self.next_version.fetch_add(1, Ordering::Relaxed);
        let record = PresenceRecord {
            presence: presence.clone(),
            version,
            expires_at: Instant::now() + ttl,
        };
        self.state
            .write()
            .await
            .presences
            .insert(presence.rep_id.clone(), record);

        Ok(Box::new(MemoryPresenceHandle {
            state: self.state.clone(),
            rep_id: presence.rep_id.clone(),
            version,
            ttl,
        }))
    }
}

struct MemoryPresenceHandle {
    state: Arc<RwLock<FeedState>>,
    rep_id: String,
    version: u64,
    ttl: Duration,
}

#[async_trait]
impl PresenceHandle for MemoryPresenceHandle {
    async fn renew(&mut self) -> Result<(), FeedError> {
        let mut state = self.state.write().await;
        let now = Instant::now();
        match state.presences.get_mut(&self.rep_id) {
            Some(record) if record.version == self.version && record.is_live(now) => {
                record.expires_at = now + self.ttl;
                Ok(())
            }
            _ => Err(FeedError::PresenceLost(self.rep_id.clone())),
        }
    }

    async fn release(self: Box<Self>) -> Result<(), FeedError> {
        let mut state = self.state.write().await;
        if state
            .presences
            .get(&self.rep_id)
            .is_some_and(|r| r.version == self.version)
        {
            state.presences.remove(&self.rep_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn desire_rejects_duplicates() {
        let feed = MemoryFeed::new();
        feed.desire_task(Task::new("t1", "linux64")).await.unwrap();
        assert_eq!(
            feed.desire_task(Task::new("t1", "linux64")).await,
            Err(FeedError::AlreadyDesired("t1".to_string()))
        );
    }

    #[tokio::test]
    async fn claim_is_exclusive() {
        let feed = MemoryFeed::new();
        let task = Task::new("t1", "linux64");
        feed.desire_task(task.clone()).await.unwrap();

        assert!(feed.claim_task(&task, "rep-a").await.unwrap());
        assert!(!feed.claim_task(&task, "rep-b").await.unwrap());

        let stored = feed.task("t1").await.unwrap();
        assert_eq!(stored.state, TaskState::Claimed);
        assert_eq!(stored.claimed_by.as_deref(), Some("rep-a"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_claims_have_one_winner() {
        let feed = MemoryFeed::new();
        let task = Task::new("contested", "linux64");
        feed.desire_task(task.clone()).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..16 {
            let feed = feed.clone();
            let task = task.clone();
            handles.push(tokio::spawn(async move {
                feed.claim_task(&task, &format!("rep-{}", i)).await.unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn claim_of_unknown_task_is_an_error() {
        let feed = MemoryFeed::new();
        let err = feed
            .claim_task(&Task::new("ghost", "linux64"), "rep-a")
            .await
            .unwrap_err();
        assert_eq!(err, FeedError::TaskNotFound("ghost".to_string()));
    }

    #[tokio::test]
    async fn complete_resolves_once() {
        let feed = MemoryFeed::new();
        let task = Task::new("t1", "linux64");
        feed.desire_task(task.clone()).await.unwrap();
        feed.claim_task(&task, "rep-a").await.unwrap();
        feed.start_task("t1", "container-1").await.unwrap();

        feed.complete_task("t1", true, "oom", "").await.unwrap();
        assert!(matches!(
            feed.complete_task("t1", false, "", "ok").await,
            Err(FeedError::StateMismatch { .. })
        ));

        let stored = feed.task("t1").await.unwrap();
        assert_eq!(stored.state, TaskState::Completed);
        assert!(stored.failed);
        assert_eq!(stored.failure_reason, "oom");
        assert_eq!(stored.container_guid.as_deref(), Some("container-1"));
    }

    #[tokio::test]
    async fn pending_task_cannot_be_completed_or_started() {
        let feed = MemoryFeed::new();
        feed.desire_task(Task::new("t1", "linux64")).await.unwrap();
        assert!(feed.complete_task("t1", false, "", "").await.is_err());
        assert!(feed.start_task("t1", "c").await.is_err());
    }

    #[tokio::test]
    async fn watch_replays_pending_and_filters_by_stack() {
        let feed = MemoryFeed::new();
        feed.desire_task(Task::new("old", "linux64")).await.unwrap();
        feed.desire_task(Task::new("other", "windows")).await.unwrap();

        let mut stream = feed.watch_desired_tasks("linux64").await.unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap().guid, "old");

        feed.desire_task(Task::new("skip", "windows")).await.unwrap();
        feed.desire_task(Task::new("new", "linux64")).await.unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap().guid, "new");
    }

    #[tokio::test]
    async fn watch_skips_claimed_tasks_on_replay() {
        let feed = MemoryFeed::new();
        let task = Task::new("t1", "linux64");
        feed.desire_task(task.clone()).await.unwrap();
        feed.desire_task(Task::new("t2", "linux64")).await.unwrap();
        feed.claim_task(&task, "rep-a").await.unwrap();

        let mut stream = feed.watch_desired_tasks("linux64").await.unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap().guid, "t2");
    }

    #[tokio::test]
    async fn lrp_watch_and_claim() {
        let feed = MemoryFeed::new();
        let lrp = LrpSpec::new("lrp-1", "linux64");
        feed.desire_lrp(lrp.clone()).await.unwrap();

        let mut stream = feed.watch_desired_lrps("linux64").await.unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap().guid, "lrp-1");

        assert!(feed.claim_lrp(&lrp, "rep-a").await.unwrap());
        assert!(!feed.claim_lrp(&lrp, "rep-b").await.unwrap());
        assert_eq!(feed.lrp("lrp-1").await.unwrap().state, LrpState::Claimed);
    }

    #[tokio::test(start_paused = true)]
    async fn presence_expires_without_renewal() {
        let feed = MemoryFeed::new();
        let presence = RepPresence::new("rep-a", "linux64");
        let mut handle = feed
            .maintain_presence(&presence, Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(feed.live_presences().await, vec![presence.clone()]);

        tokio::time::advance(Duration::from_secs(6)).await;
        handle.renew().await.unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(feed.live_presences().await.len(), 1);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(feed.live_presences().await.is_empty());
        assert_eq!(
            handle.renew().await,
            Err(FeedError::PresenceLost("rep-a".to_string()))
        );
    }

    #[tokio::test]
    async fn reacquiring_presence_invalidates_old_handle() {
        let feed = MemoryFeed::new();
        let presence = RepPresence::new("rep-a", "linux64");
        let ttl = Duration::from_secs(30);

        let mut first = feed.maintain_presence(&presence, ttl).await.unwrap();
        let mut second = feed.maintain_presence(&presence, ttl).await.unwrap();

        assert!(first.renew().await.is_err());
        assert!(second.renew().await.is_ok());

        // Releasing the stale handle must not drop the live lease.
        first.release().await.unwrap();
        assert_eq!(feed.live_presences().await.len(), 1);
        second.release().await.unwrap();
        assert!(feed.live_presences().await.is_empty());
    }

    #[tokio::test]
    async fn revoked_presence_fails_renewal() {
        let feed = MemoryFeed::new();
        let presence = RepPresence::new("rep-a", "linux64");
        let mut handle = feed
            .maintain_presence(&presence, Duration::from_secs(30))
            .await
            .unwrap();
        assert!(feed.revoke_presence("rep-a").await);
        assert!(handle.renew().await.is_err());
    }
}
