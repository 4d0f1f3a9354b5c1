//! In-process [`Facade`] holding action records in memory.
//!
//! Watchers receive the ids of all enqueued actions for their agent as an
//! initial batch, then one batch per [`MemoryFacade::enqueue`] /
//! [`MemoryFacade::enqueue_batch`] call. Nothing is persisted.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use tokio::sync::{mpsc, Notify};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::action::{Action, ActionRecord, ActionStatus, FinishStatus, Params, Results, RunningAction};
use crate::error::FacadeError;
use crate::facade::{Facade, NotificationStream};
use crate::tag::{ActionTag, AgentTag};

type Batch = Result<Vec<String>, FacadeError>;

#[derive(Debug, Clone, Default)]
pub struct MemoryFacade {
    state: Arc<Mutex<MemoryState>>,
    changed: Arc<Notify>,
}

#[derive(Debug, Default)]
struct MemoryState {
    /// Records in enqueue order.
    records: Vec<ActionRecord>,
    watchers: Vec<Watcher>,
}

#[derive(Debug)]
struct Watcher {
    agent: AgentTag,
    tx: mpsc::UnboundedSender<Batch>,
}

impl MemoryState {
    fn find_mut(&mut self, tag: &ActionTag) -> Result<&mut ActionRecord, FacadeError> {
        self.records
            .iter_mut()
            .find(|r| r.tag == *tag)
            .ok_or_else(|| FacadeError::NotFound(tag.to_string()))
    }

    fn notify(&mut self, agent: &AgentTag, ids: Vec<String>) {
        self.watchers.retain(|w| {
            if w.agent != *agent {
                return !w.tx.is_closed();
            }
            w.tx.send(Ok(ids.clone())).is_ok()
        });
    }
}

impl MemoryFacade {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue one action for `agent` and notify its watchers.
    pub fn enqueue(&self, agent: &AgentTag, name: impl Into<String>, params: Params) -> ActionTag {
        let record = ActionRecord::enqueued(agent.clone(), name, params);
        let tag = record.tag;
        {
            let mut state = self.lock();
            state.records.push(record);
            state.notify(agent, vec![tag.id()]);
        }
        self.changed.notify_waiters();
        tag
    }

    /// Enqueue several actions and deliver their ids as a single batch.
    pub fn enqueue_batch<I, S>(&self, agent: &AgentTag, actions: I) -> Vec<ActionTag>
    where
        I: IntoIterator<Item = (S, Params)>,
        S: Into<String>,
    {
        let records: Vec<ActionRecord> = actions
            .into_iter()
            .map(|(name, params)| ActionRecord::enqueued(agent.clone(), name, params))
            .collect();
        let tags: Vec<ActionTag> = records.iter().map(|r| r.tag).collect();
        {
            let mut state = self.lock();
            state.records.extend(records);
            state.notify(agent, tags.iter().map(ActionTag::id).collect());
        }
        self.changed.notify_waiters();
        tags
    }

    /// Store a record as-is, without notifying anyone. Used to seed state
    /// such as actions left running by a previous worker.
    pub fn insert(&self, record: ActionRecord) {
        self.lock().records.push(record);
        self.changed.notify_waiters();
    }

    /// Push raw ids to `agent`'s watchers, whether or not they name real
    /// actions.
    pub fn notify_ids(&self, agent: &AgentTag, ids: Vec<String>) {
        self.lock().notify(agent, ids);
    }

    /// Fail every open notification stream with `error`.
    pub fn fail_watchers(&self, error: FacadeError) {
        let mut state = self.lock();
        for w in state.watchers.drain(..) {
            let _ = w.tx.send(Err(error.clone()));
        }
    }

    /// End every open notification stream.
    pub fn close_watchers(&self) {
        self.lock().watchers.clear();
    }

    pub fn record(&self, tag: &ActionTag) -> Option<ActionRecord> {
        self.lock().records.iter().find(|r| r.tag == *tag).cloned()
    }

    pub fn records(&self) -> Vec<ActionRecord> {
        self.lock().records.clone()
    }

    /// Number of `agent`'s actions that are still enqueued or running.
    pub fn unsettled(&self, agent: &AgentTag) -> usize {
        self.lock()
            .records
            .iter()
            .filter(|r| r.agent == *agent && !r.status.is_terminal())
            .count()
    }

    /// Wait until every action for `agent` has reached a terminal status.
    pub async fn wait_settled(&self, agent: &AgentTag) {
        loop {
            let changed = self.changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();
            if self.unsettled(agent) == 0 {
                return;
            }
            changed.await;
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        match self.state.lock() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl Facade for MemoryFacade {
    async fn watch_action_notifications(
        &self,
        agent: &AgentTag,
    ) -> Result<NotificationStream, FacadeError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.lock();
        let pending: Vec<String> = state
            .records
            .iter()
            .filter(|r| r.agent == *agent && r.status == ActionStatus::Enqueued)
            .map(|r| r.tag.id())
            .collect();
        // Like any watcher, the first event carries the current pending set,
        // even when it is empty.
        let _ = tx.send(Ok(pending));
        state.watchers.push(Watcher {
            agent: agent.clone(),
            tx,
        });
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }

    async fn running_actions(&self, agent: &AgentTag) -> Result<Vec<RunningAction>, FacadeError> {
        Ok(self
            .lock()
            .records
            .iter()
            .filter(|r| r.agent == *agent && r.status == ActionStatus::Running)
            .map(|r| RunningAction {
                tag: r.tag.to_string(),
                name: r.name.clone(),
            })
            .collect())
    }

    async fn action(&self, tag: &ActionTag) -> Result<Action, FacadeError> {
        self.lock()
            .records
            .iter()
            .find(|r| r.tag == *tag)
            .map(ActionRecord::action)
            .ok_or_else(|| FacadeError::NotFound(tag.to_string()))
    }

    async fn action_begin(&self, tag: &ActionTag) -> Result<(), FacadeError> {
        {
            let mut state = self.lock();
            let record = state.find_mut(tag)?;
            if record.status != ActionStatus::Enqueued {
                return Err(FacadeError::InvalidTransition {
                    tag: tag.to_string(),
                    status: record.status,
                    op: "begin",
                });
            }
            record.status = ActionStatus::Running;
            record.started_at = Some(Utc::now());
        }
        self.changed.notify_waiters();
        Ok(())
    }

    async fn action_finish(
        &self,
        tag: &ActionTag,
        status: FinishStatus,
        results: Results,
        message: &str,
    ) -> Result<(), FacadeError> {
        {
            let mut state = self.lock();
            let record = state.find_mut(tag)?;
            if record.status.is_terminal() {
                return Err(FacadeError::InvalidTransition {
                    tag: tag.to_string(),
                    status: record.status,
                    op: "finish",
                });
            }
            record.status = status.into();
            record.results = results;
            record.message = message.to_string();
            record.completed_at = Some(Utc::now());
        }
        self.changed.notify_waiters();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn agent() -> AgentTag {
        AgentTag::machine("0")
    }

    #[tokio::test]
    async fn watch_delivers_pending_then_new_batches() {
        let facade = MemoryFacade::new();
        let first = facade.enqueue(&agent(), "juju-run", Params::new());

        let mut stream = facade.watch_action_notifications(&agent()).await.unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap(), vec![first.id()]);

        let tags = facade.enqueue_batch(
            &agent(),
            vec![("a", Params::new()), ("b", Params::new())],
        );
        let batch = stream.next().await.unwrap().unwrap();
        assert_eq!(batch, tags.iter().map(ActionTag::id).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn watchers_only_see_their_agent() {
        let facade = MemoryFacade::new();
        let mut stream = facade.watch_action_notifications(&agent()).await.unwrap();
        assert!(stream.next().await.unwrap().unwrap().is_empty());

        facade.enqueue(&AgentTag::machine("1"), "juju-run", Params::new());
        let mine = facade.enqueue(&agent(), "juju-run", Params::new());
        assert_eq!(stream.next().await.unwrap().unwrap(), vec![mine.id()]);
    }

    #[tokio::test]
    async fn begin_and_finish_follow_lifecycle() {
        let facade = MemoryFacade::new();
        let tag = facade.enqueue(&agent(), "juju-run", Params::new());

        facade.action_begin(&tag).await.unwrap();
        assert_eq!(facade.record(&tag).unwrap().status, ActionStatus::Running);
        assert_eq!(facade.running_actions(&agent()).await.unwrap().len(), 1);

        // A running action cannot begin twice.
        assert!(matches!(
            facade.action_begin(&tag).await,
            Err(FacadeError::InvalidTransition { op: "begin", .. })
        ));

        let mut results = Results::new();
        results.insert("code".into(), 0.into());
        facade
            .action_finish(&tag, FinishStatus::Completed, results.clone(), "")
            .await
            .unwrap();
        let rec = facade.record(&tag).unwrap();
        assert_eq!(rec.status, ActionStatus::Completed);
        assert_eq!(rec.results, results);
        assert!(rec.completed_at.is_some());

        assert!(facade
            .action_finish(&tag, FinishStatus::Cancelled, Results::new(), "late")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn unknown_action_is_not_found() {
        let facade = MemoryFacade::new();
        let err = facade.action(&ActionTag::generate()).await.unwrap_err();
        assert!(matches!(err, FacadeError::NotFound(_)));
    }

    #[tokio::test]
    async fn wait_settled_returns_after_finish() {
        let facade = MemoryFacade::new();
        let tag = facade.enqueue(&agent(), "juju-run", Params::new());

        let waiter = {
            let facade = facade.clone();
            tokio::spawn(async move { facade.wait_settled(&agent()).await })
        };

        facade
            .action_finish(&tag, FinishStatus::Cancelled, Results::new(), "stop")
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("wait_settled should return")
            .unwrap();
        assert_eq!(facade.unsettled(&agent()), 0);
    }

    #[tokio::test]
    async fn closed_watchers_end_their_streams() {
        let facade = MemoryFacade::new();
        let mut stream = facade.watch_action_notifications(&agent()).await.unwrap();
        let _initial = stream.next().await;
        facade.close_watchers();
        assert!(stream.next().await.is_none());
    }
}
