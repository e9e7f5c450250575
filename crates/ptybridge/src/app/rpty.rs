#![expect(clippy::print_stderr, reason = "Session notices go to stderr")]

//! Remote terminal runner: connects, attaches the local terminal and tears
//! down in reverse order once the session ends.

use std::sync::Arc;

use ptybridge_common::Colors;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::app::commands::RptyArgs;
use crate::app::error::RptyError;
use crate::domain::ReconnectId;
use crate::domain::WorkspaceRef;
use crate::infra::remote::HttpRemoteApi;
use crate::infra::terminal::CrosstermTerminal;
use crate::infra::terminal::RawModeGuard;
use crate::infra::terminal::platform_resize_source;
use crate::infra::terminal::spawn_stdin_reader;
use crate::usecases::ConnectInput;
use crate::usecases::ConnectOutput;
use crate::usecases::ConnectUseCase;
use crate::usecases::ConnectUseCaseImpl;
use crate::usecases::ResizeFeed;
use crate::usecases::SessionIo;
use crate::usecases::USAGE_APP_DISABLED;
use crate::usecases::UsageHeartbeat;
use crate::usecases::ports::RemoteApi;
use crate::usecases::ports::RemoteConnection;
use crate::usecases::ports::RemoteError;
use crate::usecases::ports::TerminalMode;
use crate::usecases::run_session;

/// Validated invocation, built before any network traffic.
#[derive(Debug)]
struct Invocation {
    reconnect: ReconnectId,
    target: WorkspaceRef,
}

impl Invocation {
    fn parse(args: &RptyArgs) -> Result<Self, RptyError> {
        let reconnect = match args.reconnect.as_deref() {
            Some(raw) => raw.parse::<ReconnectId>()?,
            None => ReconnectId::generate(),
        };
        let target = args.target.parse::<WorkspaceRef>()?;
        Ok(Self { reconnect, target })
    }
}

pub async fn run(args: &RptyArgs, cancel: CancellationToken) -> Result<(), RptyError> {
    let Invocation { reconnect, target } = Invocation::parse(args)?;
    let api: Arc<dyn RemoteApi> = Arc::new(HttpRemoteApi::new(&args.url, args.token.clone())?);

    let terminal = CrosstermTerminal;
    let interactive = CrosstermTerminal::is_interactive();
    let size = terminal.initial_size();
    debug!(%target, %reconnect, %size, interactive, "connecting");

    let input = ConnectInput {
        target,
        reconnect,
        command: args.remote_command(),
        container: args.container.clone(),
        container_user: args.container_user.clone(),
        size,
        agent_wait: args.agent_wait,
    };
    let connect = ConnectUseCaseImpl::new(Arc::clone(&api));
    let ConnectOutput {
        agent,
        container,
        connection,
    } = match connect.execute(input, &cancel).await {
        Ok(output) => output,
        Err(RemoteError::Cancelled) => {
            info!("interrupted before the session started");
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    };

    let mut label = format!("{}.{}", agent.workspace_name, agent.agent_name);
    if let Some(container) = &container {
        label.push_str(&format!(" [{}]", container.friendly_name));
    }
    info!(
        workspace = %agent.workspace_name,
        agent = %agent.agent_name,
        %reconnect,
        "remote terminal attached"
    );
    eprintln!("{} {}", Colors::success("Connected to"), Colors::bold(&label));

    let heartbeat = (args.usage_app != USAGE_APP_DISABLED)
        .then(|| UsageHeartbeat::start(Arc::clone(&api), &agent, &args.usage_app));

    let RemoteConnection {
        writer,
        output,
        closer,
    } = connection;

    let mode: Arc<dyn TerminalMode> = Arc::new(terminal);
    let mut raw_mode = if interactive {
        match RawModeGuard::enter(mode) {
            Ok(guard) => Some(guard),
            Err(err) => {
                closer.close().await;
                return Err(err.into());
            }
        }
    } else {
        None
    };

    let resize = interactive.then(|| ResizeFeed {
        source: platform_resize_source(),
        size_reader: Arc::new(terminal),
        reported: size,
    });
    let io = SessionIo {
        input: spawn_stdin_reader(),
        output: tokio::io::stdout(),
        resize,
    };

    let result = run_session(writer, output, io, &cancel).await;

    closer.close().await;
    if let Some(guard) = raw_mode.as_mut()
        && let Err(err) = guard.restore()
    {
        warn!(error = %err, "failed to restore terminal");
    }
    drop(raw_mode);
    if let Some(heartbeat) = heartbeat {
        heartbeat.release().await;
    }

    if interactive {
        eprintln!();
    }
    eprintln!(
        "Session closed. Reconnect with --reconnect {}",
        Colors::ident(&reconnect.to_string())
    );

    let end = result?;
    debug!(?end, "session ended");
    Ok(())
}
