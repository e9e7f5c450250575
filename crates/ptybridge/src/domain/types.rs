//! Domain value types.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid reconnect id '{value}': {reason}")]
pub struct InvalidReconnectId {
    pub value: String,
    pub reason: String,
}

/// Identifies a logical remote terminal across physical reconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReconnectId(Uuid);

impl ReconnectId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl FromStr for ReconnectId {
    type Err = InvalidReconnectId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|err| InvalidReconnectId {
                value: s.to_string(),
                reason: err.to_string(),
            })
    }
}

impl fmt::Display for ReconnectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamTag {
    Stdout,
    Stderr,
}

impl StreamTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamTag::Stdout => "stdout",
            StreamTag::Stderr => "stderr",
        }
    }
}

impl fmt::Display for StreamTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One line of child output. `Bytes` keeps fan-out clones cheap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamChunk {
    pub tag: StreamTag,
    pub data: Bytes,
}

impl StreamChunk {
    pub fn new(tag: StreamTag, data: impl Into<Bytes>) -> Self {
        Self {
            tag,
            data: data.into(),
        }
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

/// Client-to-server frame on a reconnecting terminal connection.
///
/// Encoded as one JSON object per frame: `{"data": "..."}` for keystrokes,
/// `{"width": N, "height": N}` for a resize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ControlEvent {
    Data { data: String },
    Resize { width: u16, height: u16 },
}

impl ControlEvent {
    pub fn data(text: impl Into<String>) -> Self {
        Self::Data { data: text.into() }
    }

    pub fn resize(size: TerminalSize) -> Self {
        Self::Resize {
            width: size.width,
            height: size.height,
        }
    }

    /// JSON object followed by a newline.
    pub fn encode(&self) -> Result<Bytes, serde_json::Error> {
        let mut buf = serde_json::to_vec(self)?;
        buf.push(b'\n');
        Ok(Bytes::from(buf))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TerminalSize {
    pub width: u16,
    pub height: u16,
}

impl TerminalSize {
    pub const FALLBACK: TerminalSize = TerminalSize {
        width: 80,
        height: 24,
    };

    pub fn new(width: u16, height: u16) -> Self {
        Self { width, height }
    }
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self::FALLBACK
    }
}

impl fmt::Display for TerminalSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid workspace '{value}': {reason}")]
pub struct InvalidWorkspaceRef {
    pub value: String,
    pub reason: &'static str,
}

/// A `[owner/]workspace[.agent]` target as typed by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceRef {
    pub owner: String,
    pub workspace: String,
    pub agent: Option<String>,
}

impl WorkspaceRef {
    pub const DEFAULT_OWNER: &'static str = "me";
}

impl FromStr for WorkspaceRef {
    type Err = InvalidWorkspaceRef;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason| InvalidWorkspaceRef {
            value: s.to_string(),
            reason,
        };
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(invalid("workspace name is empty"));
        }

        let (owner, rest) = match trimmed.split_once('/') {
            Some((owner, rest)) => {
                if owner.is_empty() {
                    return Err(invalid("owner is empty"));
                }
                if rest.contains('/') {
                    return Err(invalid("expected [owner/]workspace[.agent]"));
                }
                (owner.to_string(), rest)
            }
            None => (Self::DEFAULT_OWNER.to_string(), trimmed),
        };

        let (workspace, agent) = match rest.split_once('.') {
            Some((workspace, agent)) => {
                if agent.is_empty() {
                    return Err(invalid("agent name is empty"));
                }
                (workspace, Some(agent.to_string()))
            }
            None => (rest, None),
        };
        if workspace.is_empty() {
            return Err(invalid("workspace name is empty"));
        }

        Ok(Self {
            owner,
            workspace: workspace.to_string(),
            agent,
        })
    }
}

impl fmt::Display for WorkspaceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.workspace)?;
        if let Some(agent) = &self.agent {
            write!(f, ".{agent}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentTarget {
    pub workspace_id: Uuid,
    pub workspace_name: String,
    pub agent_id: Uuid,
    pub agent_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    pub id: String,
    pub friendly_name: String,
}

impl Container {
    pub fn matches(&self, needle: &str) -> bool {
        self.id == needle || self.friendly_name == needle
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStatus {
    Connecting,
    Connected,
    Disconnected,
    Timeout,
    Unknown,
}

impl AgentStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "connecting" => Self::Connecting,
            "connected" => Self::Connected,
            "disconnected" => Self::Disconnected,
            "timeout" => Self::Timeout,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Timeout => "timeout",
            Self::Unknown => "unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconnect_id_parses_and_displays_hyphenated() {
        let id: ReconnectId = "0B9C5D6E-1F2A-4B3C-8D4E-5F6A7B8C9D0E".parse().unwrap();
        assert_eq!(id.to_string(), "0b9c5d6e-1f2a-4b3c-8d4e-5f6a7b8c9d0e");
        let again: ReconnectId = id.to_string().parse().unwrap();
        assert_eq!(id, again);
    }

    #[test]
    fn test_reconnect_id_rejects_garbage() {
        let err = "not-a-uuid".parse::<ReconnectId>().unwrap_err();
        assert_eq!(err.value, "not-a-uuid");
        assert!(err.to_string().contains("not-a-uuid"));
        assert!("".parse::<ReconnectId>().is_err());
    }

    #[test]
    fn test_generated_ids_are_distinct() {
        assert_ne!(ReconnectId::generate(), ReconnectId::generate());
    }

    #[test]
    fn test_control_event_wire_format() {
        let data = ControlEvent::data("ls\r").encode().unwrap();
        assert_eq!(&data[..], b"{\"data\":\"ls\\r\"}\n");

        let resize = ControlEvent::resize(TerminalSize::new(120, 40))
            .encode()
            .unwrap();
        assert_eq!(&resize[..], b"{\"width\":120,\"height\":40}\n");
    }

    #[test]
    fn test_control_event_decodes_both_shapes() {
        let data: ControlEvent = serde_json::from_str(r#"{"data":"x"}"#).unwrap();
        assert_eq!(data, ControlEvent::data("x"));

        let resize: ControlEvent = serde_json::from_str(r#"{"height":2,"width":1}"#).unwrap();
        assert_eq!(resize, ControlEvent::resize(TerminalSize::new(1, 2)));
    }

    #[test]
    fn test_workspace_ref_defaults_owner() {
        let target: WorkspaceRef = "dev".parse().unwrap();
        assert_eq!(target.owner, "me");
        assert_eq!(target.workspace, "dev");
        assert_eq!(target.agent, None);
    }

    #[test]
    fn test_workspace_ref_full_form() {
        let target: WorkspaceRef = "alice/dev.main".parse().unwrap();
        assert_eq!(target.owner, "alice");
        assert_eq!(target.workspace, "dev");
        assert_eq!(target.agent.as_deref(), Some("main"));
        assert_eq!(target.to_string(), "alice/dev.main");
    }

    #[test]
    fn test_workspace_ref_rejects_empty_parts() {
        for bad in ["", "/dev", "alice/", "dev.", ".main", "a/b/c"] {
            assert!(bad.parse::<WorkspaceRef>().is_err(), "{bad:?} should fail");
        }
    }

    #[test]
    fn test_container_matches_id_or_name_exactly() {
        let container = Container {
            id: "abc123".to_string(),
            friendly_name: "web".to_string(),
        };
        assert!(container.matches("abc123"));
        assert!(container.matches("web"));
        assert!(!container.matches("we"));
        assert!(!container.matches("abc"));
    }

    #[test]
    fn test_agent_status_parse() {
        assert_eq!(AgentStatus::parse("connected"), AgentStatus::Connected);
        assert_eq!(AgentStatus::parse("weird"), AgentStatus::Unknown);
    }
}
