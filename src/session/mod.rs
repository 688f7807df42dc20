//! Live session: lifecycle state machine, command surface and controller.

pub mod command;
pub mod config;
pub mod controller;
pub mod state;

pub use command::{Command, ParseCommandError, Reply};
pub use config::SessionConfig;
pub use controller::{ModelFactory, SessionController};
pub use state::{SessionState, Transition};
