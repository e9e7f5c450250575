#![expect(clippy::print_stderr, reason = "CLI errors are emitted here")]

//! CLI application layer and composition root wiring.

use std::fmt::Display;
use std::future::Future;
use std::io;
use std::io::Write;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use clap::CommandFactory;
use clap::Parser;
use clap_complete::generate;
use ptybridge_common::Colors;
use ptybridge_common::color_init;
use ptybridge_common::telemetry;
use ptybridge_common::telemetry::TelemetryOptions;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub mod commands;
pub mod error;
pub mod gateway;
mod rpty;
mod stdio_sse;

use crate::app::commands::Cli;
use crate::app::commands::Commands;
use crate::app::commands::Shell;
use crate::app::error::RptyError;
use crate::app::gateway::GatewayError;
use crate::infra::signal_handler::SignalHandler;

const PROGRAM_NAME: &str = "ptybridge";

/// Bound on waiting for stray blocking tasks once the command returns.
const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(100);

/// Exit codes following sysexits.h.
mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL_ERROR: i32 = 1;
}

pub struct Application;

impl Application {
    pub fn new() -> Self {
        Self
    }

    pub fn run(&self) -> Result<i32> {
        let cli = Cli::parse();
        let _telemetry = telemetry::init_tracing(TelemetryOptions {
            verbose: cli.verbose,
            stdout_reserved: cli.command.writes_stdout(),
        });
        color_init(cli.no_color);
        debug!(command = ?cli.command, "CLI command parsed");

        let exit_code = match self.execute(cli.command) {
            Ok(()) => exit_codes::SUCCESS,
            Err(e) => self.handle_error(e),
        };
        Ok(exit_code)
    }

    fn execute(&self, command: Commands) -> Result<()> {
        match command {
            Commands::StdioSse(args) => {
                block_on(|cancel| async move { stdio_sse::serve(&args, cancel).await })?
                    .context("stdio-sse session failed")?;
            }
            Commands::Rpty(args) => {
                block_on(|cancel| async move { rpty::run(&args, cancel).await })?
                    .context("remote terminal session failed")?;
            }
            Commands::Completions { shell } => {
                print_completions(shell, &mut io::stdout().lock())?;
            }
        }
        Ok(())
    }

    fn handle_error(&self, e: anyhow::Error) -> i32 {
        if let Some(err) = find_error::<RptyError>(&e) {
            print_error(err, &err.suggestion(), err.is_retryable());
            err.exit_code()
        } else if let Some(err) = find_error::<GatewayError>(&e) {
            print_error(err, &err.suggestion(), err.is_retryable());
            err.exit_code()
        } else {
            eprintln!("{}: {} {:#}", PROGRAM_NAME, Colors::error("Error:"), e);
            exit_codes::GENERAL_ERROR
        }
    }
}

impl Default for Application {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs one invocation on a fresh runtime with SIGINT/SIGTERM wired to the
/// root cancellation token.
fn block_on<F, Fut, T>(command: F) -> Result<T>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = T>,
{
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    let cancel = CancellationToken::new();

    let result = runtime.block_on(async {
        let _signals =
            SignalHandler::setup(cancel.clone()).context("failed to install signal handlers")?;
        Ok::<_, anyhow::Error>(command(cancel.clone()).await)
    });

    // The stdin reader thread may still be blocked in read(2).
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);
    result
}

/// A reader that exits early (`| head`) is not an error.
fn print_completions(shell: Shell, out: &mut impl Write) -> Result<()> {
    let mut script = Vec::new();
    generate(shell, &mut Cli::command(), PROGRAM_NAME, &mut script);
    match out.write_all(&script).and_then(|()| out.flush()) {
        Err(err) if err.kind() == io::ErrorKind::BrokenPipe => {
            debug!("completions reader closed stdout early");
            Ok(())
        }
        result => result.context("failed to write completion script"),
    }
}

fn print_error(error: &dyn Display, suggestion: &str, retryable: bool) {
    eprintln!("{}: {} {}", PROGRAM_NAME, Colors::error("Error:"), error);
    eprintln!("{} {}", Colors::dim("Suggestion:"), suggestion);
    if retryable {
        eprintln!(
            "{}",
            Colors::dim("(This error may be transient - retry may succeed)")
        );
    }
}

fn find_error<T: std::error::Error + 'static>(error: &anyhow::Error) -> Option<&T> {
    error.chain().find_map(|source| source.downcast_ref::<T>())
}
