pub mod call_session_controller;
pub mod config;
pub mod signaling_store;
pub mod tracing_helper;

pub use call_session_controller::{
    CallEvent, CallRole, CallSessionController, CallSnapshot, CallState, ControllerOptions,
    StartOrJoin,
};
