use std::time::Duration;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use clap::ValueHint;
pub use clap_complete::Shell;
use ptybridge_common::parse_duration;

use crate::app::gateway::DEFAULT_HOST;
use crate::app::gateway::DEFAULT_PORT;

pub const DEFAULT_USAGE_APP: &str = "reconnecting-pty";
pub const DEFAULT_REMOTE_COMMAND: &str = "";

const LONG_ABOUT: &str = "\
Multiplex interactive byte streams between processes and clients.\n\
\n\
stdio-sse exposes a local command over HTTP: POST writes to its stdin and\n\
every request streams its stdout/stderr as server-sent events.\n\
rpty attaches this terminal to a reconnecting remote terminal session.";

#[derive(Debug, Parser)]
#[command(name = "ptybridge")]
#[command(author, version, propagate_version = true)]
#[command(about = "Bridge local and remote terminal streams")]
#[command(long_about = LONG_ABOUT)]
#[command(subcommand_required = true, arg_required_else_help = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Disable colored output (a non-empty NO_COLOR does the same)
    #[arg(long, global = true, help_heading = "Output Options")]
    pub no_color: bool,

    /// Enable debug logging on stderr
    #[arg(short, long, global = true, help_heading = "Debug Options")]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Serve a local command's stdio over HTTP with server-sent events
    #[command(name = "stdio-sse")]
    #[command(after_long_help = "\
EXAMPLES:
    ptybridge stdio-sse -- tee
    ptybridge stdio-sse --port 0 --timeout 10m -- python3 -u repl.py
    curl -N -d 'hello' http://127.0.0.1:8080/")]
    StdioSse(StdioSseArgs),

    /// Attach to a reconnecting terminal on a remote workspace agent
    #[command(after_long_help = "\
EXAMPLES:
    ptybridge rpty --url https://coder.example.com dev
    ptybridge rpty dev.main --container web -- htop
    ptybridge rpty alice/dev --reconnect 8b1f0c1e-6a43-4f0e-9a55-27c3f2a1d0b4")]
    Rpty(RptyArgs),

    /// Generate shell completion scripts
    Completions {
        #[arg(value_enum, value_name = "SHELL")]
        shell: Shell,
    },
}

#[derive(Debug, Clone, Args)]
pub struct StdioSseArgs {
    /// Address to listen on
    #[arg(long, env = "PTYBRIDGE_HOST", default_value = DEFAULT_HOST)]
    pub host: String,

    /// Port to listen on (0 picks an ephemeral port)
    #[arg(long, env = "PTYBRIDGE_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// End the session after this long (e.g. 30s, 5m, 1h)
    #[arg(long, env = "PTYBRIDGE_TIMEOUT", value_name = "DURATION", value_parser = parse_duration)]
    pub timeout: Option<Duration>,

    /// Allow binding a non-loopback address
    #[arg(long, env = "PTYBRIDGE_ALLOW_REMOTE")]
    pub allow_remote: bool,

    /// Command to run, with its arguments (use -- before flags)
    #[arg(
        trailing_var_arg = true,
        value_name = "COMMAND",
        value_hint = ValueHint::CommandWithArguments
    )]
    pub command: Vec<String>,
}

#[derive(Debug, Clone, Args)]
pub struct RptyArgs {
    /// Target as [owner/]workspace[.agent]
    #[arg(value_name = "WORKSPACE")]
    pub target: String,

    /// Command to run in the remote terminal (defaults to the agent's shell)
    #[arg(trailing_var_arg = true, value_name = "COMMAND")]
    pub command: Vec<String>,

    /// Deployment URL
    #[arg(long, env = "PTYBRIDGE_URL", value_hint = ValueHint::Url)]
    pub url: String,

    /// Session token
    #[arg(long, env = "PTYBRIDGE_SESSION_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Attach inside this container (id or name)
    #[arg(long, value_name = "CONTAINER")]
    pub container: Option<String>,

    /// User to run as inside the container
    #[arg(long, value_name = "USER", requires = "container")]
    pub container_user: Option<String>,

    /// Resume the session with this id instead of starting a new one
    #[arg(long, value_name = "UUID")]
    pub reconnect: Option<String>,

    /// App name for usage heartbeats ("disable" turns them off)
    #[arg(long, env = "PTYBRIDGE_USAGE_APP", default_value = DEFAULT_USAGE_APP)]
    pub usage_app: String,

    /// How long to wait for the agent to become reachable
    #[arg(long, value_name = "DURATION", default_value = "5m", value_parser = parse_duration)]
    pub agent_wait: Duration,
}

impl Commands {
    /// Commands whose stdout is payload rather than a place for log records.
    pub fn writes_stdout(&self) -> bool {
        matches!(self, Commands::Rpty(_) | Commands::Completions { .. })
    }
}

impl RptyArgs {
    pub fn remote_command(&self) -> String {
        if self.command.is_empty() {
            DEFAULT_REMOTE_COMMAND.to_string()
        } else {
            self.command.join(" ")
        }
    }
}
