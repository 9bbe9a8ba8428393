use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex, PoisonError,
    },
    time::Duration,
};

use anyhow::{bail, Result};
use async_trait::async_trait;
use teleconsult_lib::{
    connection::signaling::{CandidatePayload, CompressedSdp},
    signaling_server::call_session::{CallSessionStatus, Role},
};

use super::{CallSession, CreateSessionError, PullResult, RecordAnswerError, SignalingStore};

struct Entry {
    offer: CompressedSdp,
    answer: Option<CompressedSdp>,
    offering_party_id: String,
    offering: Vec<CandidatePayload>,
    answering: Vec<CandidatePayload>,
}

impl Entry {
    fn partition(&mut self, role: Role) -> &mut Vec<CandidatePayload> {
        match role {
            Role::Offering => &mut self.offering,
            Role::Answering => &mut self.answering,
        }
    }
}

/// Same semantics as the signaling server, kept in memory.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    hide_next_read: AtomicBool,
    retry_after: Mutex<Option<Duration>>,
    pull_count: AtomicUsize,
    delete_count: AtomicUsize,
}

impl MemoryStore {
    /// The next `read_session` reports nothing, as if the session were
    /// created right after the read.
    pub fn hide_next_read(&self) {
        self.hide_next_read.store(true, Ordering::SeqCst);
    }

    /// What `pull` reports as the server's suggested wait.
    pub fn set_retry_after(&self, retry_after: Option<Duration>) {
        *self.retry_after.lock().unwrap_or_else(PoisonError::into_inner) = retry_after;
    }

    pub fn pull_count(&self) -> usize {
        self.pull_count.load(Ordering::SeqCst)
    }

    pub fn delete_count(&self) -> usize {
        self.delete_count.load(Ordering::SeqCst)
    }

    pub fn candidates(&self, appointment_id: &str, role: Role) -> Vec<CandidatePayload> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries
            .get_mut(appointment_id)
            .map(|x| x.partition(role).clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl SignalingStore for MemoryStore {
    async fn create_session(
        &self,
        appointment_id: &str,
        offer: CompressedSdp,
        offering_party_id: &str,
    ) -> Result<(), CreateSessionError> {
        tokio::task::yield_now().await;
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.contains_key(appointment_id) {
            return Err(CreateSessionError::AlreadyExists);
        }
        let entry = Entry {
            offer,
            answer: None,
            offering_party_id: offering_party_id.to_owned(),
            offering: vec![],
            answering: vec![],
        };
        entries.insert(appointment_id.to_owned(), entry);
        Ok(())
    }

    async fn read_session(&self, appointment_id: &str) -> Result<Option<CallSession>> {
        tokio::task::yield_now().await;
        if self.hide_next_read.swap(false, Ordering::SeqCst) {
            return Ok(None);
        }
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(appointment_id).map(|x| {
            let status = if x.answer.is_some() {
                CallSessionStatus::Connected
            } else {
                CallSessionStatus::Pending
            };
            CallSession::new(
                x.offer.clone(),
                x.answer.clone(),
                x.offering_party_id.clone(),
                status,
            )
        }))
    }

    async fn record_answer(
        &self,
        appointment_id: &str,
        answer: CompressedSdp,
        answering_party_id: &str,
    ) -> Result<(), RecordAnswerError> {
        tokio::task::yield_now().await;
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(entry) = entries.get_mut(appointment_id) else {
            return Err(RecordAnswerError::NotFound);
        };
        if entry.offering_party_id == answering_party_id {
            return Err(RecordAnswerError::SameParty);
        }
        if entry.answer.is_some() {
            return Err(RecordAnswerError::AlreadyAnswered);
        }
        entry.answer = Some(answer);
        Ok(())
    }

    async fn append_candidate(
        &self,
        appointment_id: &str,
        role: Role,
        payload: CandidatePayload,
    ) -> Result<()> {
        tokio::task::yield_now().await;
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(entry) = entries.get_mut(appointment_id) else {
            bail!("call session not found");
        };
        entry.partition(role).push(payload);
        Ok(())
    }

    async fn pull(&self, appointment_id: &str, role: Role) -> Result<PullResult> {
        tokio::task::yield_now().await;
        self.pull_count.fetch_add(1, Ordering::SeqCst);
        let retry_after = *self.retry_after.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(entry) = entries.get_mut(appointment_id) else {
            bail!("call session not found");
        };
        let answer = match role {
            Role::Offering => entry.answer.clone(),
            Role::Answering => None,
        };
        Ok(PullResult {
            answer,
            candidates: entry.partition(role.counterpart()).clone(),
            retry_after,
        })
    }

    async fn delete_session(&self, appointment_id: &str) -> Result<()> {
        tokio::task::yield_now().await;
        self.delete_count.fetch_add(1, Ordering::SeqCst);
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(appointment_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sdp(text: &str) -> CompressedSdp {
        CompressedSdp::compress(text).unwrap()
    }

    #[tokio::test]
    async fn record_answer_is_write_once() {
        let store = MemoryStore::default();
        store
            .create_session("A-100", sdp("offer"), "doctor")
            .await
            .unwrap();
        assert!(matches!(
            store.create_session("A-100", sdp("offer"), "patient").await,
            Err(CreateSessionError::AlreadyExists)
        ));
        assert!(matches!(
            store.record_answer("A-100", sdp("answer"), "doctor").await,
            Err(RecordAnswerError::SameParty)
        ));
        store
            .record_answer("A-100", sdp("answer"), "patient")
            .await
            .unwrap();
        assert!(matches!(
            store.record_answer("A-100", sdp("again"), "patient").await,
            Err(RecordAnswerError::AlreadyAnswered)
        ));
        let session = store.read_session("A-100").await.unwrap().unwrap();
        assert_eq!(session.status(), CallSessionStatus::Connected);

        store.delete_session("A-100").await.unwrap();
        store.delete_session("A-100").await.unwrap();
        assert!(store.read_session("A-100").await.unwrap().is_none());
    }
}
