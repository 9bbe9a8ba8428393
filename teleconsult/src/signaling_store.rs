mod signaling_server_store;

#[cfg(test)]
pub(crate) mod memory_store;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use teleconsult_lib::{
    connection::signaling::{CandidatePayload, CompressedSdp},
    signaling_server::call_session::{GetCallSessionResponseOkBody, Role},
};
use thiserror::Error;

pub use signaling_server_store::SignalingServerStore;

/// The stored record as both parties see it.
pub type CallSession = GetCallSessionResponseOkBody;

#[derive(Debug, Error)]
pub enum CreateSessionError {
    #[error("call session already exists")]
    AlreadyExists,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum RecordAnswerError {
    #[error("call session not found")]
    NotFound,
    #[error("call session is already answered")]
    AlreadyAnswered,
    #[error("the offering party cannot answer its own call")]
    SameParty,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, Default)]
pub struct PullResult {
    /// Only ever present for the offering party.
    pub answer: Option<CompressedSdp>,
    /// The whole counterpart partition, oldest first.
    pub candidates: Vec<CandidatePayload>,
    pub retry_after: Option<Duration>,
}

#[async_trait]
pub trait SignalingStore: Send + Sync + 'static {
    async fn create_session(
        &self,
        appointment_id: &str,
        offer: CompressedSdp,
        offering_party_id: &str,
    ) -> Result<(), CreateSessionError>;

    async fn read_session(&self, appointment_id: &str) -> Result<Option<CallSession>>;

    async fn record_answer(
        &self,
        appointment_id: &str,
        answer: CompressedSdp,
        answering_party_id: &str,
    ) -> Result<(), RecordAnswerError>;

    async fn append_candidate(
        &self,
        appointment_id: &str,
        role: Role,
        payload: CandidatePayload,
    ) -> Result<()>;

    async fn pull(&self, appointment_id: &str, role: Role) -> Result<PullResult>;

    /// Succeeds when there is nothing to delete.
    async fn delete_session(&self, appointment_id: &str) -> Result<()>;
}
