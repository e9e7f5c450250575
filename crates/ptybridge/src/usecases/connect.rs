use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use uuid::Uuid;

use crate::domain::AgentStatus;
use crate::domain::AgentTarget;
use crate::domain::Container;
use crate::domain::ReconnectId;
use crate::domain::TerminalSize;
use crate::domain::WorkspaceRef;
use crate::usecases::ports::DialRequest;
use crate::usecases::ports::RemoteApi;
use crate::usecases::ports::RemoteConnection;
use crate::usecases::ports::RemoteError;

pub const AGENT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct ConnectInput {
    pub target: WorkspaceRef,
    pub reconnect: ReconnectId,
    pub command: String,
    pub container: Option<String>,
    pub container_user: Option<String>,
    pub size: TerminalSize,
    pub agent_wait: Duration,
}

pub struct ConnectOutput {
    pub agent: AgentTarget,
    pub container: Option<Container>,
    pub connection: RemoteConnection,
}

#[async_trait]
pub trait ConnectUseCase: Send + Sync {
    async fn execute(
        &self,
        input: ConnectInput,
        cancel: &CancellationToken,
    ) -> Result<ConnectOutput, RemoteError>;
}

/// Resolves the target, waits for its agent, then dials the terminal.
pub struct ConnectUseCaseImpl<A: RemoteApi + ?Sized> {
    api: Arc<A>,
    poll_interval: Duration,
}

impl<A: RemoteApi + ?Sized> ConnectUseCaseImpl<A> {
    pub fn new(api: Arc<A>) -> Self {
        Self {
            api,
            poll_interval: AGENT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    async fn find_container(
        &self,
        agent_id: Uuid,
        needle: &str,
    ) -> Result<Container, RemoteError> {
        let containers = self.api.list_containers(agent_id).await?;
        if containers.is_empty() {
            return Err(RemoteError::NoContainers);
        }
        let available: Vec<String> = containers
            .iter()
            .map(|container| container.friendly_name.clone())
            .collect();
        containers
            .into_iter()
            .find(|container| container.matches(needle))
            .ok_or_else(|| RemoteError::ContainerNotFound {
                container: needle.to_string(),
                available,
            })
    }

    async fn wait_reachable(
        &self,
        agent_id: Uuid,
        wait: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), RemoteError> {
        let deadline = Instant::now() + wait;
        loop {
            let status = self.api.agent_status(agent_id).await?;
            if status == AgentStatus::Connected {
                return Ok(());
            }
            debug!(%agent_id, status = status.as_str(), "agent not reachable yet");

            let now = Instant::now();
            if now >= deadline {
                return Err(RemoteError::AgentUnreachable {
                    waited: wait,
                    last_status: status.as_str(),
                });
            }
            let nap = self.poll_interval.min(deadline - now);
            tokio::select! {
                _ = cancel.cancelled() => return Err(RemoteError::Cancelled),
                _ = tokio::time::sleep(nap) => {}
            }
        }
    }
}

#[async_trait]
impl<A: RemoteApi + ?Sized> ConnectUseCase for ConnectUseCaseImpl<A> {
    #[tracing::instrument(
        skip(self, input, cancel),
        fields(
            target = %input.target,
            reconnect = %input.reconnect,
            container = ?input.container,
            size = %input.size
        )
    )]
    async fn execute(
        &self,
        input: ConnectInput,
        cancel: &CancellationToken,
    ) -> Result<ConnectOutput, RemoteError> {
        let agent = self.api.resolve_agent(&input.target).await?;

        let container = match input.container.as_deref() {
            Some(needle) => Some(self.find_container(agent.agent_id, needle).await?),
            None => None,
        };

        self.wait_reachable(agent.agent_id, input.agent_wait, cancel)
            .await?;

        let request = DialRequest {
            agent_id: agent.agent_id,
            reconnect: input.reconnect,
            command: input.command,
            container: container.as_ref().map(|c| c.id.clone()),
            container_user: input.container_user,
            size: input.size,
        };
        let connection = tokio::select! {
            _ = cancel.cancelled() => return Err(RemoteError::Cancelled),
            connection = self.api.dial(&request) => connection?,
        };
        info!(agent = %agent.agent_name, "terminal connection open");

        Ok(ConnectOutput {
            agent,
            container,
            connection,
        })
    }
}
