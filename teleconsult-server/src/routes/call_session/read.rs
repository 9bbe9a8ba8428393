use anyhow::Result;
use teleconsult_lib::signaling_server::call_session::{
    GetCallSessionResponse, GetCallSessionResponseOkBody, GetPollResponse, GetPollResponseOkBody,
    Role,
};
use tracing::{debug, info};

use crate::{
    database::{CallSession, Database},
    routes::session_utils::{now_sec, ttl_sec, RETRY_AFTER_INTERVAL_SEC},
};

pub async fn find_valid_session(
    db: &impl Database,
    now_sec: u64,
    appointment_id: String,
) -> Result<Option<CallSession>> {
    let Some(session) = db.find_call_session(appointment_id).await? else {
        return Ok(None);
    };
    if !session.is_expired(now_sec) {
        return Ok(Some(session));
    }
    db.remove_call_session(session.appointment_id().clone())
        .await?;
    db.remove_candidates(session.appointment_id().clone())
        .await?;
    info!("[Call Session] Expired: {}", session.appointment_id());
    Ok(None)
}

pub async fn get_call_session(
    db: &impl Database,
    appointment_id: &str,
) -> Result<GetCallSessionResponse> {
    let Some(session) = find_valid_session(db, now_sec(), appointment_id.to_owned()).await? else {
        return Ok(GetCallSessionResponse::NotFound);
    };
    let status = session.status();
    let offering_party_id = session.offering_party_id().clone();
    let offer = session.offer().clone();
    let body =
        GetCallSessionResponseOkBody::new(offer, session.into_answer(), offering_party_id, status);
    Ok(GetCallSessionResponse::Ok(body))
}

pub async fn get_poll(
    db: &impl Database,
    appointment_id: &str,
    role: Role,
) -> Result<GetPollResponse> {
    let now_sec = now_sec();
    let Some(session) = find_valid_session(db, now_sec, appointment_id.to_owned()).await? else {
        return Ok(GetPollResponse::NotFound);
    };
    db.keep_call_session(appointment_id.to_owned(), ttl_sec(now_sec))
        .await?;
    let answer = match role {
        Role::Offering => session.into_answer(),
        Role::Answering => None,
    };
    let candidates: Vec<_> = db
        .find_candidates(appointment_id.to_owned(), role.counterpart())
        .await?
        .into_iter()
        .map(|x| x.into_payload())
        .collect();
    debug!(
        "[Call Session] Poll: {} {} answer={} candidates={}",
        appointment_id,
        role,
        answer.is_some(),
        candidates.len()
    );
    let body = GetPollResponseOkBody::new(answer, candidates);
    Ok(GetPollResponse::ok(RETRY_AFTER_INTERVAL_SEC, body))
}
