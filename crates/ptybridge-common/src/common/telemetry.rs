#![expect(clippy::print_stderr, reason = "Tracing not initialized yet")]

//! Tracing setup.
//!
//! `rpty` copies remote terminal bytes to stdout and `completions` prints a
//! script there, so those commands mark stdout as reserved: a request to log
//! to stdout is then redirected to stderr instead of corrupting the payload.

use std::io::IsTerminal;
use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

const LOG_FILE_ENV: &str = "PTYBRIDGE_LOG";
const LOG_FORMAT_ENV: &str = "PTYBRIDGE_LOG_FORMAT";
const LOG_STREAM_ENV: &str = "PTYBRIDGE_LOG_STREAM";

#[derive(Debug, Clone, Copy, Default)]
pub struct TelemetryOptions {
    /// `debug` instead of `warn` when `RUST_LOG` is unset.
    pub verbose: bool,
    /// stdout carries command output and must never receive log records.
    pub stdout_reserved: bool,
}

#[derive(Debug)]
pub struct TelemetryGuard {
    _guard: Option<WorkerGuard>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum LogSink {
    File(PathBuf),
    Stderr,
    Stdout,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct LogSettings {
    sink: LogSink,
    json: bool,
    /// A stdout stream was asked for but stdout is reserved.
    stdout_refused: bool,
}

impl LogSettings {
    fn from_env(stdout_reserved: bool) -> Self {
        let var = |key| std::env::var(key).ok();
        Self::resolve(
            var(LOG_FILE_ENV).as_deref(),
            var(LOG_FORMAT_ENV).as_deref(),
            var(LOG_STREAM_ENV).as_deref(),
            stdout_reserved,
        )
    }

    fn resolve(
        file: Option<&str>,
        format: Option<&str>,
        stream: Option<&str>,
        stdout_reserved: bool,
    ) -> Self {
        let json = format.is_some_and(|f| f.trim().eq_ignore_ascii_case("json"));
        let wants_stdout = stream.is_some_and(|s| s.trim().eq_ignore_ascii_case("stdout"));
        let file = file.map(str::trim).filter(|path| !path.is_empty());

        let (sink, stdout_refused) = match file {
            Some(path) => (LogSink::File(PathBuf::from(path)), false),
            None if wants_stdout && stdout_reserved => (LogSink::Stderr, true),
            None if wants_stdout => (LogSink::Stdout, false),
            None => (LogSink::Stderr, false),
        };
        Self {
            sink,
            json,
            stdout_refused,
        }
    }
}

fn open_writer(sink: &LogSink) -> (BoxMakeWriter, Option<WorkerGuard>, bool) {
    match sink {
        LogSink::File(path) => match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
        {
            Ok(file) => {
                let (non_blocking, guard) = tracing_appender::non_blocking(file);
                (BoxMakeWriter::new(non_blocking), Some(guard), false)
            }
            Err(err) => {
                eprintln!(
                    "Warning: failed to open log file {}: {}",
                    path.display(),
                    err
                );
                open_writer(&LogSink::Stderr)
            }
        },
        LogSink::Stderr => (
            BoxMakeWriter::new(std::io::stderr),
            None,
            std::io::stderr().is_terminal(),
        ),
        LogSink::Stdout => (
            BoxMakeWriter::new(std::io::stdout),
            None,
            std::io::stdout().is_terminal(),
        ),
    }
}

pub fn init_tracing(options: TelemetryOptions) -> TelemetryGuard {
    let default_level = if options.verbose { "debug" } else { "warn" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let settings = LogSettings::from_env(options.stdout_reserved);
    let (writer, guard, ansi) = open_writer(&settings.sink);

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(writer);
    let installed = if settings.json {
        builder.with_ansi(false).json().try_init()
    } else {
        builder.with_ansi(ansi).try_init()
    };
    if installed.is_err() {
        return TelemetryGuard { _guard: None };
    }

    if settings.stdout_refused {
        tracing::warn!(
            "{LOG_STREAM_ENV}=stdout ignored: stdout carries command output, logging to stderr"
        );
    }
    TelemetryGuard { _guard: guard }
}
