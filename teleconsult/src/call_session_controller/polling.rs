use std::{collections::HashSet, sync::Arc, time::Duration};

use teleconsult_lib::{
    connection::{
        signaling::{CandidatePayload, SessionDescription},
        ConnectionState, PeerLink,
    },
    signaling_server::call_session::Role,
};
use tokio::{
    sync::{watch, Mutex},
    time::{sleep_until, Instant},
};
use tracing::{debug, info, trace, warn};

use crate::signaling_store::{PullResult, SignalingStore};

use super::{CallEvent, CallState, Shared};

/// Lower bound for the wait between polls, whatever the server suggests.
const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

pub(super) struct PollContext<S, L> {
    pub shared: Arc<Shared<S>>,
    pub link: Arc<Mutex<L>>,
    pub role: Role,
    pub poll_interval: Duration,
    pub negotiation_timeout: Duration,
    pub connection_state_rx: watch::Receiver<ConnectionState>,
}

struct Applied {
    answer: bool,
    candidates: HashSet<CandidatePayload>,
}

async fn apply<L: PeerLink>(link: &Mutex<L>, role: Role, pulled: PullResult, applied: &mut Applied) {
    let link = link.lock().await;
    if role == Role::Offering && !applied.answer {
        if let Some(answer) = pulled.answer {
            if link.has_remote_description().await {
                applied.answer = true;
            } else {
                match link
                    .set_remote_description(SessionDescription::answer(answer))
                    .await
                {
                    Ok(()) => {
                        info!("answer applied");
                        applied.answer = true;
                    }
                    Err(err) => warn!("failed to apply answer: {:#}", err),
                }
            }
        }
    }
    // Candidates wait until the remote description is in place; the server
    // returns them again on the next poll.
    if !link.has_remote_description().await {
        return;
    }
    for candidate in pulled.candidates {
        if applied.candidates.contains(&candidate) {
            continue;
        }
        trace!("remote candidate: {}", candidate.candidate);
        if let Err(err) = link.add_remote_candidate(candidate.clone()).await {
            debug!("failed to add remote candidate: {:#}", err);
        }
        applied.candidates.insert(candidate);
    }
}

/// Pulls the counterpart's answer and candidates until the connection comes
/// up or the negotiation deadline passes.
pub(super) async fn poll_loop<S: SignalingStore, L: PeerLink>(mut ctx: PollContext<S, L>) {
    let deadline = Instant::now() + ctx.negotiation_timeout;
    let mut applied = Applied {
        answer: ctx.role == Role::Answering,
        candidates: HashSet::new(),
    };
    loop {
        if *ctx.connection_state_rx.borrow() == ConnectionState::Connected {
            break;
        }
        if Instant::now() >= deadline {
            let message = "negotiation timed out".to_owned();
            warn!("{}", message);
            let mut failed = false;
            ctx.shared.update(|snapshot| {
                if snapshot.state == CallState::Negotiating {
                    snapshot.state = CallState::Failed;
                    snapshot.last_error = Some(message.clone());
                    failed = true;
                }
            });
            if failed {
                if let Err(err) = ctx.link.lock().await.abandon().await {
                    warn!("failed to release peer link: {:#}", err);
                }
                ctx.shared.publish(CallEvent::Failed(message));
            }
            break;
        }

        let next = match ctx
            .shared
            .store
            .pull(&ctx.shared.appointment_id, ctx.role)
            .await
        {
            Ok(pulled) => {
                let next = pulled
                    .retry_after
                    .map_or(ctx.poll_interval, |x| x.max(MIN_POLL_INTERVAL));
                apply(&ctx.link, ctx.role, pulled, &mut applied).await;
                next
            }
            Err(err) => {
                warn!("poll failed: {:#}", err);
                ctx.poll_interval
            }
        };

        let wake_at = (Instant::now() + next).min(deadline);
        tokio::select! {
            _ = sleep_until(wake_at) => {}
            connected = async {
                ctx.connection_state_rx
                    .wait_for(|x| *x == ConnectionState::Connected)
                    .await
                    .is_ok()
            } => {
                if connected {
                    break;
                }
                // The link is gone; only the deadline can end the loop now.
                sleep_until(wake_at).await;
            }
        }
    }
    debug!("polling stopped");
}
