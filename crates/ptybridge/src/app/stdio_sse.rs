#![expect(clippy::print_stderr, reason = "Listening notice goes to stderr")]

use ptybridge_common::Colors;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::app::commands::StdioSseArgs;
use crate::app::gateway::GatewayConfig;
use crate::app::gateway::GatewayError;
use crate::app::gateway::GatewayOutcome;
use crate::app::gateway::RunningGateway;
use crate::infra::process::ProcessSpec;

impl From<&StdioSseArgs> for GatewayConfig {
    fn from(args: &StdioSseArgs) -> Self {
        Self {
            host: args.host.clone(),
            port: args.port,
            timeout: args.timeout,
            allow_remote: args.allow_remote,
        }
    }
}

/// Serves the command until it exits, the timeout elapses or `cancel` fires.
pub async fn serve(
    args: &StdioSseArgs,
    cancel: CancellationToken,
) -> Result<GatewayOutcome, GatewayError> {
    let spec = ProcessSpec::from_argv(&args.command).ok_or(GatewayError::MissingCommand)?;
    let config = GatewayConfig::from(args);

    let gateway = RunningGateway::start(&config, &spec, cancel.child_token()).await?;
    eprintln!(
        "{} {} {}",
        Colors::success("Listening on"),
        gateway.url(),
        Colors::dim(&format!("({})", spec.program))
    );

    let outcome = gateway.wait().await;
    info!(
        exit = ?outcome.exit,
        timed_out = outcome.timed_out,
        "gateway session closed"
    );
    Ok(outcome)
}
