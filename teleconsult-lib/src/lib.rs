pub mod connection;
pub mod signaling_server;
