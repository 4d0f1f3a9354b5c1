use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::action::{Action, FinishStatus, Results, RunningAction};
use crate::error::FacadeError;
use crate::tag::{ActionTag, AgentTag};

/// Batches of pending action ids for one agent. The stream ending means the
/// producer went away.
pub type NotificationStream = BoxStream<'static, Result<Vec<String>, FacadeError>>;

/// Everything the worker needs from the service that owns action state.
#[async_trait]
pub trait Facade: Send + Sync {
    /// Subscribe to ids of actions enqueued for `agent`.
    async fn watch_action_notifications(
        &self,
        agent: &AgentTag,
    ) -> Result<NotificationStream, FacadeError>;

    /// Actions currently marked running for `agent`.
    async fn running_actions(&self, agent: &AgentTag) -> Result<Vec<RunningAction>, FacadeError>;

    async fn action(&self, tag: &ActionTag) -> Result<Action, FacadeError>;

    /// Mark an action as running.
    async fn action_begin(&self, tag: &ActionTag) -> Result<(), FacadeError>;

    /// Move an action to a terminal status.
    async fn action_finish(
        &self,
        tag: &ActionTag,
        status: FinishStatus,
        results: Results,
        message: &str,
    ) -> Result<(), FacadeError>;
}
