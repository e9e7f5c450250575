pub mod hub;
pub mod process;
pub mod remote;
pub mod signal_handler;
pub mod terminal;
