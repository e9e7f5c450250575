#![deny(clippy::all)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

//! Stream multiplexing for local subprocesses (HTTP/SSE gateway) and remote
//! reconnecting terminal sessions.

pub mod app;
pub mod domain;
pub mod infra;
pub mod usecases;

pub use app::Application;
