pub mod call_session;
