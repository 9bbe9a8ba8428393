use anyhow::{bail, Result};
use teleconsult_lib::signaling_server::call_session::{
    PutCallSessionRequestBody, PutCallSessionResponse,
};
use tracing::info;

use crate::{
    database::{CallSession, Database, PutError},
    routes::{
        call_session::read::find_valid_session,
        session_utils::{now_sec, ttl_sec},
    },
};

pub async fn put_call_session(
    db: &impl Database,
    appointment_id: &str,
    body: PutCallSessionRequestBody,
) -> Result<PutCallSessionResponse> {
    let now_sec = now_sec();
    if find_valid_session(db, now_sec, appointment_id.to_owned())
        .await?
        .is_some()
    {
        return Ok(PutCallSessionResponse::Conflict);
    }
    let (offer, offering_party_id) = body.into_inner();
    let session = CallSession::new(
        appointment_id.to_owned(),
        offer,
        offering_party_id,
        ttl_sec(now_sec),
    );
    match db.put_call_session(session).await {
        Ok(()) => {}
        Err(PutError::Conflict) => return Ok(PutCallSessionResponse::Conflict),
        Err(PutError::Unknown(err)) => bail!("{:?}", err),
    }
    // Leftovers of an earlier call for the same appointment.
    db.remove_candidates(appointment_id.to_owned()).await?;
    info!("[Call Session] Created: {}", appointment_id);
    Ok(PutCallSessionResponse::Created)
}
