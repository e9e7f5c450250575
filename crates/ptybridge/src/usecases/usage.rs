use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::domain::AgentTarget;
use crate::usecases::ports::RemoteApi;

pub const USAGE_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);

/// App name that turns heartbeat registration off.
pub const USAGE_APP_DISABLED: &str = "disable";

/// Periodic usage registration for an open session.
///
/// Reports once immediately, then on every interval until released or
/// dropped. Failures are logged and never end the session.
pub struct UsageHeartbeat {
    stop: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl UsageHeartbeat {
    pub fn start(api: Arc<dyn RemoteApi>, agent: &AgentTarget, app_name: &str) -> Self {
        Self::start_with_interval(api, agent, app_name, USAGE_HEARTBEAT_INTERVAL)
    }

    pub fn start_with_interval(
        api: Arc<dyn RemoteApi>,
        agent: &AgentTarget,
        app_name: &str,
        interval: Duration,
    ) -> Self {
        let stop = CancellationToken::new();
        let token = stop.clone();
        let workspace_id = agent.workspace_id;
        let agent_id = agent.agent_id;
        let app_name = app_name.to_string();

        let task = tokio::spawn(async move {
            loop {
                if let Err(err) = api.report_usage(workspace_id, agent_id, &app_name).await {
                    debug!(error = %err, app = %app_name, "usage heartbeat failed");
                }
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        });

        Self {
            stop,
            task: Some(task),
        }
    }

    /// Stops the heartbeat and waits for an in-flight report to settle.
    pub async fn release(mut self) {
        self.stop.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for UsageHeartbeat {
    fn drop(&mut self) {
        self.stop.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
