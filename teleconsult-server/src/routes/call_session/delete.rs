use anyhow::Result;
use teleconsult_lib::signaling_server::call_session::DeleteCallSessionResponse;
use tracing::info;

use crate::database::Database;

pub async fn delete_call_session(
    db: &impl Database,
    appointment_id: &str,
) -> Result<DeleteCallSessionResponse> {
    let removed = db.remove_call_session(appointment_id.to_owned()).await?;
    db.remove_candidates(appointment_id.to_owned()).await?;
    if removed {
        info!("[Call Session] Removed: {}", appointment_id);
    }
    Ok(DeleteCallSessionResponse::NoContent)
}
