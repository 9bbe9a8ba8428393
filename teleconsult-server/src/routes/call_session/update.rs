use anyhow::Result;
use teleconsult_lib::signaling_server::call_session::{
    PostAnswerRequestBody, PostAnswerResponse, PostCandidateRequestBody, PostCandidateResponse,
    Role,
};
use tracing::info;

use crate::{
    database::{CandidateRecord, Database, PutError},
    routes::{
        call_session::read::find_valid_session,
        session_utils::{now_nanos, now_sec, ttl_sec},
    },
};

pub async fn post_answer(
    db: &impl Database,
    appointment_id: &str,
    body: PostAnswerRequestBody,
) -> Result<PostAnswerResponse> {
    let now_sec = now_sec();
    let Some(session) = find_valid_session(db, now_sec, appointment_id.to_owned()).await? else {
        return Ok(PostAnswerResponse::NotFound);
    };
    let (answer, answering_party_id) = body.into_inner();
    if session.offering_party_id() == &answering_party_id {
        return Ok(PostAnswerResponse::Forbidden);
    }
    if session.answer().is_some() {
        return Ok(PostAnswerResponse::Conflict);
    }
    match db
        .put_answer(appointment_id.to_owned(), answer, ttl_sec(now_sec))
        .await
    {
        Ok(()) => {
            info!("[Call Session] Answered: {}", appointment_id);
            Ok(PostAnswerResponse::Ok)
        }
        Err(PutError::Conflict) => Ok(PostAnswerResponse::Conflict),
        Err(PutError::Unknown(err)) => Err(err),
    }
}

pub async fn post_candidate(
    db: &impl Database,
    appointment_id: &str,
    role: Role,
    body: PostCandidateRequestBody,
) -> Result<PostCandidateResponse> {
    let now_sec = now_sec();
    if find_valid_session(db, now_sec, appointment_id.to_owned())
        .await?
        .is_none()
    {
        return Ok(PostCandidateResponse::NotFound);
    }
    let record = CandidateRecord::new(
        appointment_id.to_owned(),
        role,
        now_nanos(),
        body.into_payload(),
        ttl_sec(now_sec),
    );
    db.append_candidate(record).await?;
    Ok(PostCandidateResponse::Created)
}
