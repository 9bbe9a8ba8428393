use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use teleconsult_lib::{
    connection::signaling::CompressedSdp,
    signaling_server::call_session::{CallSessionStatus, Role},
};
use tokio::{fs, sync::Mutex};

use super::{CallSession, CallSessionTables, CandidateRecord, CandidateTables, Database, PutError};

#[derive(Default, Deserialize, Serialize)]
struct Store {
    #[serde(default)]
    call_sessions: Vec<CallSession>,
    #[serde(default)]
    candidates: Vec<CandidateRecord>,
}

/// A JSON document on disk. Every operation is a read-modify-write of the
/// whole document under one lock.
pub struct File {
    path: PathBuf,
    lock: Mutex<()>,
}

impl File {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    async fn read(&self) -> Result<Store> {
        let Ok(text) = fs::read_to_string(&self.path).await else {
            return Ok(Store::default());
        };
        if text.trim().is_empty() {
            return Ok(Store::default());
        }
        Ok(serde_json::from_str(&text)?)
    }

    async fn write(&self, store: &Store) -> Result<()> {
        Ok(fs::write(&self.path, serde_json::to_string_pretty(store)?).await?)
    }
}

impl Default for File {
    fn default() -> Self {
        Self::new("store.json")
    }
}

impl CallSessionTables for File {
    async fn put_call_session(&self, session: CallSession) -> Result<(), PutError> {
        let _guard = self.lock.lock().await;
        let mut store = self.read().await.map_err(PutError::Unknown)?;
        if store
            .call_sessions
            .iter()
            .any(|x| x.appointment_id == session.appointment_id)
        {
            return Err(PutError::Conflict);
        }
        store.call_sessions.push(session);
        self.write(&store).await.map_err(PutError::Unknown)
    }

    async fn find_call_session(&self, appointment_id: String) -> Result<Option<CallSession>> {
        let _guard = self.lock.lock().await;
        Ok(self
            .read()
            .await?
            .call_sessions
            .into_iter()
            .find(|x| x.appointment_id == appointment_id))
    }

    async fn put_answer(
        &self,
        appointment_id: String,
        answer: CompressedSdp,
        ttl_sec: u64,
    ) -> Result<(), PutError> {
        let _guard = self.lock.lock().await;
        let mut store = self.read().await.map_err(PutError::Unknown)?;
        let Some(session) = store
            .call_sessions
            .iter_mut()
            .find(|x| x.appointment_id == appointment_id)
        else {
            return Err(PutError::Conflict);
        };
        if session.status != CallSessionStatus::Pending {
            return Err(PutError::Conflict);
        }
        session.answer = Some(answer);
        session.status = CallSessionStatus::Connected;
        session.ttl_sec = ttl_sec;
        self.write(&store).await.map_err(PutError::Unknown)
    }

    async fn keep_call_session(&self, appointment_id: String, ttl_sec: u64) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let mut store = self.read().await?;
        let Some(session) = store
            .call_sessions
            .iter_mut()
            .find(|x| x.appointment_id == appointment_id)
        else {
            return Ok(false);
        };
        session.ttl_sec = ttl_sec;
        self.write(&store).await?;
        Ok(true)
    }

    async fn remove_call_session(&self, appointment_id: String) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let mut store = self.read().await?;
        let len = store.call_sessions.len();
        store
            .call_sessions
            .retain(|x| x.appointment_id != appointment_id);
        if store.call_sessions.len() == len {
            return Ok(false);
        }
        self.write(&store).await?;
        Ok(true)
    }
}

impl CandidateTables for File {
    async fn append_candidate(&self, candidate: CandidateRecord) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut store = self.read().await?;
        store.candidates.push(candidate);
        self.write(&store).await
    }

    async fn find_candidates(
        &self,
        appointment_id: String,
        role: Role,
    ) -> Result<Vec<CandidateRecord>> {
        let _guard = self.lock.lock().await;
        Ok(self
            .read()
            .await?
            .candidates
            .into_iter()
            .filter(|x| x.appointment_id == appointment_id && x.role == role)
            .collect())
    }

    async fn remove_candidates(&self, appointment_id: String) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut store = self.read().await?;
        store
            .candidates
            .retain(|x| x.appointment_id != appointment_id);
        self.write(&store).await
    }
}

impl Database for File {}

#[cfg(test)]
mod tests {
    use teleconsult_lib::connection::signaling::CandidatePayload;

    use super::*;

    fn sdp(text: &str) -> CompressedSdp {
        CompressedSdp::compress(text).unwrap()
    }

    #[tokio::test]
    async fn answer_is_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let db = File::new(dir.path().join("store.json"));
        let session = CallSession::new("A-100".into(), sdp("offer"), "doctor".into(), 100);
        db.put_call_session(session.clone()).await.unwrap();
        assert!(matches!(
            db.put_call_session(session).await,
            Err(PutError::Conflict)
        ));

        db.put_answer("A-100".into(), sdp("answer"), 200)
            .await
            .unwrap();
        assert!(matches!(
            db.put_answer("A-100".into(), sdp("again"), 300).await,
            Err(PutError::Conflict)
        ));

        let found = db.find_call_session("A-100".into()).await.unwrap().unwrap();
        assert_eq!(found.status(), CallSessionStatus::Connected);
        assert_eq!(found.into_answer(), Some(sdp("answer")));
    }

    #[tokio::test]
    async fn candidates_are_partitioned_by_role_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let db = File::new(dir.path().join("store.json"));
        for (seq, role, candidate) in [
            (1, Role::Offering, "o1"),
            (2, Role::Answering, "a1"),
            (3, Role::Offering, "o2"),
        ] {
            let record = CandidateRecord::new(
                "A-100".into(),
                role,
                seq,
                CandidatePayload::new(candidate),
                100,
            );
            db.append_candidate(record).await.unwrap();
        }

        let offering: Vec<_> = db
            .find_candidates("A-100".into(), Role::Offering)
            .await
            .unwrap()
            .into_iter()
            .map(|x| x.into_payload().candidate)
            .collect();
        assert_eq!(offering, vec!["o1", "o2"]);

        db.remove_candidates("A-100".into()).await.unwrap();
        assert!(db
            .find_candidates("A-100".into(), Role::Answering)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn removing_an_absent_session_reports_false() {
        let dir = tempfile::tempdir().unwrap();
        let db = File::new(dir.path().join("store.json"));
        assert!(!db.remove_call_session("nothing".into()).await.unwrap());
        assert!(!db.keep_call_session("nothing".into(), 10).await.unwrap());
    }
}
