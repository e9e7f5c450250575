//! HTTP + WebSocket client for a remote deployment's agent API.

mod pump;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tracing::debug;
use url::Url;
use uuid::Uuid;

use crate::domain::AgentStatus;
use crate::domain::AgentTarget;
use crate::domain::Container;
use crate::domain::WorkspaceRef;
use crate::usecases::ports::DialRequest;
use crate::usecases::ports::RemoteApi;
use crate::usecases::ports::RemoteConnection;
use crate::usecases::ports::RemoteError;

pub const SESSION_TOKEN_HEADER: &str = "coder-session-token";

pub struct HttpRemoteApi {
    base: Url,
    token: Option<String>,
    http: reqwest::Client,
}

impl HttpRemoteApi {
    pub fn new(base: &str, token: Option<String>) -> Result<Self, RemoteError> {
        let invalid = |reason: &str| RemoteError::InvalidUrl {
            url: base.to_string(),
            reason: reason.to_string(),
        };
        let url = Url::parse(base).map_err(|e| invalid(&e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid("scheme must be http or https"));
        }
        if url.cannot_be_a_base() {
            return Err(invalid("not a base URL"));
        }
        let http = reqwest::Client::builder()
            .user_agent(concat!("ptybridge/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        Ok(Self {
            base: url,
            token: token.filter(|t| !t.is_empty()),
            http,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, RemoteError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| RemoteError::InvalidUrl {
                url: self.base.to_string(),
                reason: "not a base URL".to_string(),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// WebSocket URL of the reconnecting terminal endpoint.
    pub fn pty_url(&self, request: &DialRequest) -> Result<Url, RemoteError> {
        let agent_id = request.agent_id.to_string();
        let mut url = self.endpoint(&["api", "v2", "workspaceagents", &agent_id, "pty"])?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("reconnect", &request.reconnect.to_string())
                .append_pair("width", &request.size.width.to_string())
                .append_pair("height", &request.size.height.to_string())
                .append_pair("command", &request.command);
            if let Some(container) = &request.container {
                query.append_pair("container", container);
            }
            if let Some(user) = &request.container_user {
                query.append_pair("container_user", user);
            }
        }
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme).map_err(|()| RemoteError::InvalidUrl {
            url: url.to_string(),
            reason: "cannot switch to a websocket scheme".to_string(),
        })?;
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        not_found: impl FnOnce() -> RemoteError,
    ) -> Result<T, RemoteError> {
        let mut request = self.http.get(url);
        if let Some(token) = &self.token {
            request = request.header(SESSION_TOKEN_HEADER, token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        let response = check_status(response, not_found).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| RemoteError::Transport(format!("invalid response body: {e}")))
    }
}

async fn check_status(
    response: reqwest::Response,
    not_found: impl FnOnce() -> RemoteError,
) -> Result<reqwest::Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiMessage>(&body)
        .map(|m| m.render())
        .unwrap_or(body);
    Err(match status {
        StatusCode::NOT_FOUND => not_found(),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::Unauthorized(message),
        _ => RemoteError::Api {
            status: status.as_u16(),
            message,
        },
    })
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    message: String,
    #[serde(default)]
    detail: String,
}

impl ApiMessage {
    fn render(self) -> String {
        if self.detail.is_empty() {
            self.message
        } else {
            format!("{}: {}", self.message, self.detail)
        }
    }
}

#[derive(Debug, Deserialize)]
struct WorkspacePayload {
    id: Uuid,
    name: String,
    latest_build: BuildPayload,
}

#[derive(Debug, Deserialize)]
struct BuildPayload {
    #[serde(default)]
    resources: Vec<ResourcePayload>,
}

#[derive(Debug, Deserialize)]
struct ResourcePayload {
    #[serde(default)]
    agents: Option<Vec<AgentPayload>>,
}

#[derive(Debug, Deserialize)]
struct AgentPayload {
    id: Uuid,
    name: String,
    #[serde(default)]
    status: String,
}

#[derive(Debug, Deserialize)]
struct ContainersPayload {
    #[serde(default)]
    containers: Vec<ContainerPayload>,
}

#[derive(Debug, Deserialize)]
struct ContainerPayload {
    id: String,
    #[serde(default)]
    friendly_name: String,
}

#[derive(Debug, Serialize)]
struct UsageRequest<'a> {
    agent_id: Uuid,
    app_name: &'a str,
}

fn select_agent(
    workspace: WorkspacePayload,
    requested: Option<&str>,
) -> Result<AgentTarget, RemoteError> {
    let agents: Vec<AgentPayload> = workspace
        .latest_build
        .resources
        .into_iter()
        .flat_map(|resource| resource.agents.unwrap_or_default())
        .collect();
    let names = || agents.iter().map(|a| a.name.clone()).collect::<Vec<_>>();

    let chosen = match requested {
        Some(name) => agents.iter().find(|a| a.name == name).ok_or_else(|| {
            RemoteError::AgentNotFound {
                workspace: workspace.name.clone(),
                agent: name.to_string(),
                available: names(),
            }
        })?,
        None => match agents.as_slice() {
            [] => {
                return Err(RemoteError::NoAgents {
                    workspace: workspace.name,
                });
            }
            [only] => only,
            _ => {
                return Err(RemoteError::AmbiguousAgent {
                    workspace: workspace.name.clone(),
                    available: names(),
                });
            }
        },
    };

    Ok(AgentTarget {
        workspace_id: workspace.id,
        workspace_name: workspace.name.clone(),
        agent_id: chosen.id,
        agent_name: chosen.name.clone(),
    })
}

#[async_trait]
impl RemoteApi for HttpRemoteApi {
    async fn resolve_agent(&self, target: &WorkspaceRef) -> Result<AgentTarget, RemoteError> {
        let url = self.endpoint(&["api", "v2", "users", &target.owner, "workspace", &target.workspace])?;
        let workspace: WorkspacePayload = self
            .get_json(url, || RemoteError::WorkspaceNotFound {
                workspace: target.to_string(),
            })
            .await?;
        select_agent(workspace, target.agent.as_deref())
    }

    async fn agent_status(&self, agent_id: Uuid) -> Result<AgentStatus, RemoteError> {
        let id = agent_id.to_string();
        let url = self.endpoint(&["api", "v2", "workspaceagents", &id])?;
        let agent: AgentPayload = self
            .get_json(url, || RemoteError::Api {
                status: 404,
                message: format!("agent {id} not found"),
            })
            .await?;
        Ok(AgentStatus::parse(&agent.status))
    }

    async fn list_containers(&self, agent_id: Uuid) -> Result<Vec<Container>, RemoteError> {
        let id = agent_id.to_string();
        let url = self.endpoint(&["api", "v2", "workspaceagents", &id, "containers"])?;
        let payload: ContainersPayload = self.get_json(url, || RemoteError::NoContainers).await?;
        Ok(payload
            .containers
            .into_iter()
            .map(|c| Container {
                id: c.id,
                friendly_name: c.friendly_name,
            })
            .collect())
    }

    async fn dial(&self, request: &DialRequest) -> Result<RemoteConnection, RemoteError> {
        let url = self.pty_url(request)?;
        let mut ws_request = url
            .as_str()
            .into_client_request()
            .map_err(|e| RemoteError::Dial(e.to_string()))?;
        if let Some(token) = &self.token {
            let value =
                HeaderValue::from_str(token).map_err(|e| RemoteError::Dial(e.to_string()))?;
            ws_request.headers_mut().insert(SESSION_TOKEN_HEADER, value);
        }

        debug!(url = %redact_query(&url), "dialing reconnecting terminal");
        let (stream, _response) = tokio_tungstenite::connect_async(ws_request)
            .await
            .map_err(dial_error)?;

        let (connection, transport) = RemoteConnection::pair();
        let pump = tokio::spawn(pump::run(stream, transport));
        Ok(connection.with_pump(pump))
    }

    async fn report_usage(
        &self,
        workspace_id: Uuid,
        agent_id: Uuid,
        app_name: &str,
    ) -> Result<(), RemoteError> {
        let id = workspace_id.to_string();
        let url = self.endpoint(&["api", "v2", "workspaces", &id, "usage"])?;
        let mut request = self.http.post(url).json(&UsageRequest { agent_id, app_name });
        if let Some(token) = &self.token {
            request = request.header(SESSION_TOKEN_HEADER, token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        check_status(response, || RemoteError::Api {
            status: 404,
            message: "usage endpoint not found".to_string(),
        })
        .await?;
        Ok(())
    }
}

fn dial_error(err: tungstenite::Error) -> RemoteError {
    match err {
        tungstenite::Error::Http(response) => {
            let status = response.status();
            let body = response
                .body()
                .as_deref()
                .map(|b| String::from_utf8_lossy(b).into_owned())
                .unwrap_or_default();
            let message = serde_json::from_str::<ApiMessage>(&body)
                .map(|m| m.render())
                .unwrap_or(body);
            match status.as_u16() {
                401 | 403 => RemoteError::Unauthorized(message),
                code => RemoteError::Dial(format!("server answered {code}: {message}")),
            }
        }
        other => RemoteError::Dial(other.to_string()),
    }
}

fn redact_query(url: &Url) -> String {
    let mut url = url.clone();
    url.set_query(None);
    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ReconnectId;
    use crate::domain::TerminalSize;

    fn workspace(agents: &[&str]) -> WorkspacePayload {
        WorkspacePayload {
            id: Uuid::new_v4(),
            name: "dev".to_string(),
            latest_build: BuildPayload {
                resources: vec![
                    ResourcePayload { agents: None },
                    ResourcePayload {
                        agents: Some(
                            agents
                                .iter()
                                .map(|name| AgentPayload {
                                    id: Uuid::new_v4(),
                                    name: name.to_string(),
                                    status: "connected".to_string(),
                                })
                                .collect(),
                        ),
                    },
                ],
            },
        }
    }

    #[test]
    fn test_rejects_non_http_urls() {
        assert!(HttpRemoteApi::new("ftp://example.com", None).is_err());
        assert!(HttpRemoteApi::new("not a url", None).is_err());
        assert!(HttpRemoteApi::new("https://example.com", None).is_ok());
    }

    #[test]
    fn test_pty_url_carries_dial_parameters() {
        let api = HttpRemoteApi::new("https://dev.example.com/", None).unwrap();
        let reconnect: ReconnectId = "0b9c5d6e-1f2a-4b3c-8d4e-5f6a7b8c9d0e".parse().unwrap();
        let agent_id = Uuid::new_v4();
        let url = api
            .pty_url(&DialRequest {
                agent_id,
                reconnect,
                command: "htop -d 5".to_string(),
                container: Some("c1".to_string()),
                container_user: Some("root".to_string()),
                size: TerminalSize::new(120, 40),
            })
            .unwrap();

        assert_eq!(url.scheme(), "wss");
        assert_eq!(url.path(), format!("/api/v2/workspaceagents/{agent_id}/pty"));
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("reconnect".to_string(), reconnect.to_string()),
                ("width".to_string(), "120".to_string()),
                ("height".to_string(), "40".to_string()),
                ("command".to_string(), "htop -d 5".to_string()),
                ("container".to_string(), "c1".to_string()),
                ("container_user".to_string(), "root".to_string()),
            ]
        );
    }

    #[test]
    fn test_plain_http_dials_ws_under_base_path() {
        let api = HttpRemoteApi::new("http://127.0.0.1:3000/prefix", None).unwrap();
        let url = api
            .pty_url(&DialRequest {
                agent_id: Uuid::nil(),
                reconnect: ReconnectId::generate(),
                command: String::new(),
                container: None,
                container_user: None,
                size: TerminalSize::FALLBACK,
            })
            .unwrap();
        assert_eq!(url.scheme(), "ws");
        assert!(url.path().starts_with("/prefix/api/v2/workspaceagents/"));
        assert!(!url.query_pairs().any(|(k, _)| k == "container"));
    }

    #[test]
    fn test_single_agent_is_selected_implicitly() {
        let target = select_agent(workspace(&["main"]), None).unwrap();
        assert_eq!(target.agent_name, "main");
        assert_eq!(target.workspace_name, "dev");
    }

    #[test]
    fn test_multiple_agents_need_a_name() {
        let err = select_agent(workspace(&["a", "b"]), None).unwrap_err();
        assert!(matches!(err, RemoteError::AmbiguousAgent { .. }));
        assert_eq!(err.exit_code(), 64);

        let target = select_agent(workspace(&["a", "b"]), Some("b")).unwrap();
        assert_eq!(target.agent_name, "b");
    }

    #[test]
    fn test_missing_agent_lists_available() {
        let err = select_agent(workspace(&["a", "b"]), Some("c")).unwrap_err();
        match err {
            RemoteError::AgentNotFound { available, .. } => {
                assert_eq!(available, vec!["a".to_string(), "b".to_string()])
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_workspace_without_agents_is_not_found() {
        let err = select_agent(workspace(&[]), None).unwrap_err();
        assert!(matches!(err, RemoteError::NoAgents { .. }));
        assert_eq!(err.exit_code(), 69);
    }

    #[test]
    fn test_redact_query_drops_parameters() {
        let url = Url::parse("wss://h/api?reconnect=x&command=secret").unwrap();
        assert_eq!(redact_query(&url), "wss://h/api");
    }
}
