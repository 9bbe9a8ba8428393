mod dynamodb;
mod file;

use derive_new::new;
pub use dynamodb::DynamoDB;
pub use file::File;

use anyhow::Result;
use getset::Getters;
use serde::{Deserialize, Serialize};
use teleconsult_lib::{
    connection::signaling::{CandidatePayload, CompressedSdp},
    signaling_server::call_session::{CallSessionStatus, Role},
};

#[derive(Clone, Debug, Deserialize, Getters, Serialize, new)]
pub struct CallSession {
    /// primary
    #[get = "pub"]
    appointment_id: String,
    #[get = "pub"]
    offer: CompressedSdp,
    #[new(default)]
    #[get = "pub"]
    answer: Option<CompressedSdp>,
    #[get = "pub"]
    offering_party_id: String,
    #[new(default)]
    status: CallSessionStatus,
    ttl_sec: u64,
}

impl CallSession {
    pub fn status(&self) -> CallSessionStatus {
        self.status
    }

    pub fn into_answer(self) -> Option<CompressedSdp> {
        self.answer
    }

    pub fn is_expired(&self, now_sec: u64) -> bool {
        now_sec > self.ttl_sec
    }
}

#[derive(Clone, Debug, Deserialize, Getters, Serialize)]
pub struct CandidateRecord {
    /// primary
    #[get = "pub"]
    appointment_id: String,
    /// `{role}#{nanos}#{uuid}`, so that a range query on the role prefix
    /// returns the partition in insertion order.
    #[get = "pub"]
    sort_key: String,
    role: Role,
    #[get = "pub"]
    payload: CandidatePayload,
    ttl_sec: u64,
}

impl CandidateRecord {
    pub fn new(
        appointment_id: String,
        role: Role,
        seq_nanos: u128,
        payload: CandidatePayload,
        ttl_sec: u64,
    ) -> Self {
        let sort_key = format!("{}#{:020}#{}", role, seq_nanos, uuid::Uuid::new_v4());
        Self {
            appointment_id,
            sort_key,
            role,
            payload,
            ttl_sec,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn into_payload(self) -> CandidatePayload {
        self.payload
    }
}

#[derive(Debug)]
pub enum PutError {
    Conflict,
    Unknown(anyhow::Error),
}

pub trait CallSessionTables: Send + Sync + 'static {
    async fn put_call_session(&self, session: CallSession) -> Result<(), PutError>;
    async fn find_call_session(&self, appointment_id: String) -> Result<Option<CallSession>>;
    /// Conflicts unless the session exists and is still pending.
    async fn put_answer(
        &self,
        appointment_id: String,
        answer: CompressedSdp,
        ttl_sec: u64,
    ) -> Result<(), PutError>;
    async fn keep_call_session(&self, appointment_id: String, ttl_sec: u64) -> Result<bool>;
    async fn remove_call_session(&self, appointment_id: String) -> Result<bool>;
}

pub trait CandidateTables: Send + Sync + 'static {
    async fn append_candidate(&self, candidate: CandidateRecord) -> Result<()>;
    async fn find_candidates(
        &self,
        appointment_id: String,
        role: Role,
    ) -> Result<Vec<CandidateRecord>>;
    async fn remove_candidates(&self, appointment_id: String) -> Result<()>;
}

pub trait Database: CallSessionTables + CandidateTables {}
