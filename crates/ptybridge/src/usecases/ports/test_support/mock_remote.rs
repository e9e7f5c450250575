//! Scripted remote API for use case tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::AgentStatus;
use crate::domain::AgentTarget;
use crate::domain::Container;
use crate::domain::WorkspaceRef;
use crate::usecases::ports::DialRequest;
use crate::usecases::ports::RemoteApi;
use crate::usecases::ports::RemoteConnection;
use crate::usecases::ports::RemoteError;
use crate::usecases::ports::TransportEnd;

pub struct MockRemoteApi {
    pub target: AgentTarget,
    containers: Vec<Container>,
    statuses: Mutex<VecDeque<AgentStatus>>,
    calls: Mutex<Vec<&'static str>>,
    dials: Mutex<Vec<DialRequest>>,
    transports: Mutex<Vec<TransportEnd>>,
    usage_reports: AtomicUsize,
    fail_usage: bool,
}

impl MockRemoteApi {
    pub fn new() -> Self {
        Self {
            target: AgentTarget {
                workspace_id: Uuid::new_v4(),
                workspace_name: "dev".to_string(),
                agent_id: Uuid::new_v4(),
                agent_name: "main".to_string(),
            },
            containers: Vec::new(),
            statuses: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            dials: Mutex::new(Vec::new()),
            transports: Mutex::new(Vec::new()),
            usage_reports: AtomicUsize::new(0),
            fail_usage: false,
        }
    }

    pub fn with_containers(mut self, containers: &[(&str, &str)]) -> Self {
        self.containers = containers
            .iter()
            .map(|(id, name)| Container {
                id: id.to_string(),
                friendly_name: name.to_string(),
            })
            .collect();
        self
    }

    /// Statuses returned by successive polls; the last one repeats.
    pub fn with_statuses(self, statuses: &[AgentStatus]) -> Self {
        *self.statuses.lock().unwrap() = statuses.iter().copied().collect();
        self
    }

    pub fn with_failing_usage(mut self) -> Self {
        self.fail_usage = true;
        self
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub fn dials(&self) -> Vec<DialRequest> {
        self.dials.lock().unwrap().clone()
    }

    pub fn take_transport(&self) -> Option<TransportEnd> {
        self.transports.lock().unwrap().pop()
    }

    pub fn usage_reports(&self) -> usize {
        self.usage_reports.load(Ordering::SeqCst)
    }

    fn record(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }
}

impl Default for MockRemoteApi {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteApi for MockRemoteApi {
    async fn resolve_agent(&self, target: &WorkspaceRef) -> Result<AgentTarget, RemoteError> {
        self.record("resolve_agent");
        if target.workspace != self.target.workspace_name {
            return Err(RemoteError::WorkspaceNotFound {
                workspace: target.workspace.clone(),
            });
        }
        Ok(self.target.clone())
    }

    async fn agent_status(&self, _agent_id: Uuid) -> Result<AgentStatus, RemoteError> {
        self.record("agent_status");
        let mut statuses = self.statuses.lock().unwrap();
        let status = if statuses.len() > 1 {
            statuses.pop_front()
        } else {
            statuses.front().copied()
        };
        Ok(status.unwrap_or(AgentStatus::Connected))
    }

    async fn list_containers(&self, _agent_id: Uuid) -> Result<Vec<Container>, RemoteError> {
        self.record("list_containers");
        Ok(self.containers.clone())
    }

    async fn dial(&self, request: &DialRequest) -> Result<RemoteConnection, RemoteError> {
        self.record("dial");
        self.dials.lock().unwrap().push(request.clone());
        let (connection, transport) = RemoteConnection::pair();
        self.transports.lock().unwrap().push(transport);
        Ok(connection)
    }

    async fn report_usage(
        &self,
        _workspace_id: Uuid,
        _agent_id: Uuid,
        _app_name: &str,
    ) -> Result<(), RemoteError> {
        self.usage_reports.fetch_add(1, Ordering::SeqCst);
        if self.fail_usage {
            return Err(RemoteError::Transport("usage endpoint down".to_string()));
        }
        Ok(())
    }
}
