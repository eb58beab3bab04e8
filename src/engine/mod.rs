//! Engine module housing the capture lifecycle.
//!
//! - `state`: session state machine and committed status
//! - `session`: the capture worker bound to one device
//! - `core`: `EngineHandle`, the control surface shared by CLI, HTTP and tests

pub mod core;
pub mod session;
pub mod state;

pub use core::EngineHandle;
pub use session::SessionParams;
pub use state::{EngineStatus, SessionState};
