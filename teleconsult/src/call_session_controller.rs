mod polling;

use std::{sync::Arc, time::Duration};

use anyhow::{bail, Result};
use teleconsult_lib::{
    connection::{
        signaling::{CompressedSdp, SessionDescription},
        ConnectionState, LocalMedia, PeerLink, PeerLinkEvents, PeerLinkFactory, RemoteStream,
    },
    signaling_server::call_session::Role,
};
use tokio::{
    runtime::Handle,
    sync::{mpsc, watch, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::{
    config::Settings,
    signaling_store::{CreateSessionError, SignalingStore},
};

use self::polling::{poll_loop, PollContext};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CallState {
    #[default]
    Idle,
    Joining,
    Starting,
    Negotiating,
    Connected,
    /// The handshake did not complete in time.
    Failed,
    Closed,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CallRole {
    #[default]
    Unknown,
    Offerer,
    Answerer,
}

impl CallRole {
    fn wire_role(self) -> Option<Role> {
        match self {
            Self::Unknown => None,
            Self::Offerer => Some(Role::Offering),
            Self::Answerer => Some(Role::Answering),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartOrJoin {
    Joined,
    Started,
    Idle,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CallSnapshot {
    pub state: CallState,
    pub role: CallRole,
    pub is_connected: bool,
    pub connection_state: ConnectionState,
    pub remote_stream: Option<RemoteStream>,
    pub last_error: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum CallEvent {
    RemoteStream(RemoteStream),
    ConnectionStateChanged(ConnectionState),
    Failed(String),
}

#[derive(Clone, Debug)]
pub struct ControllerOptions {
    pub poll_interval: Duration,
    pub negotiation_timeout: Duration,
    /// Join once more when the session shows up between our read and our
    /// create.
    pub retry_join_on_conflict: bool,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for ControllerOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            poll_interval: settings.poll_interval(),
            negotiation_timeout: settings.negotiation_timeout(),
            retry_join_on_conflict: settings.retry_join_on_conflict(),
        }
    }
}

/// What the controller and its background tasks share.
struct Shared<S> {
    appointment_id: String,
    store: Arc<S>,
    snapshot_tx: watch::Sender<CallSnapshot>,
    event_tx: mpsc::UnboundedSender<CallEvent>,
}

impl<S> Shared<S> {
    fn snapshot(&self) -> CallSnapshot {
        self.snapshot_tx.borrow().clone()
    }

    fn update(&self, modify: impl FnOnce(&mut CallSnapshot)) {
        self.snapshot_tx.send_modify(modify);
    }

    fn publish(&self, event: CallEvent) {
        let _ = self.event_tx.send(event);
    }
}

async fn abandon_quietly(link: &impl PeerLink) {
    if let Err(err) = link.abandon().await {
        warn!("failed to release peer link: {:#}", err);
    }
}

async fn answer_offer(link: &impl PeerLink, offer: CompressedSdp) -> Result<CompressedSdp> {
    link.set_remote_description(SessionDescription::offer(offer))
        .await?;
    link.create_answer_and_set_local().await
}

enum StartOutcome {
    Started,
    Conflict,
}

/// Decides who offers and who answers for one appointment, drives the
/// handshake through the signaling store and tears everything down on
/// hang-up.
pub struct CallSessionController<S: SignalingStore, F: PeerLinkFactory> {
    shared: Arc<Shared<S>>,
    party_id: String,
    factory: F,
    media: LocalMedia,
    options: ControllerOptions,
    link: Option<Arc<Mutex<F::Link>>>,
    tasks: Vec<JoinHandle<()>>,
    event_rx: Option<mpsc::UnboundedReceiver<CallEvent>>,
    hung_up: bool,
}

impl<S: SignalingStore, F: PeerLinkFactory> CallSessionController<S, F> {
    pub fn new(
        appointment_id: String,
        party_id: String,
        store: Arc<S>,
        factory: F,
        media: LocalMedia,
        options: ControllerOptions,
    ) -> Self {
        let (snapshot_tx, _) = watch::channel(CallSnapshot::default());
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared {
                appointment_id,
                store,
                snapshot_tx,
                event_tx,
            }),
            party_id,
            factory,
            media,
            options,
            link: None,
            tasks: vec![],
            event_rx: Some(event_rx),
            hung_up: false,
        }
    }

    pub fn appointment_id(&self) -> &str {
        &self.shared.appointment_id
    }

    pub fn state(&self) -> CallState {
        self.shared.snapshot_tx.borrow().state
    }

    pub fn role(&self) -> CallRole {
        self.shared.snapshot_tx.borrow().role
    }

    pub fn is_connected(&self) -> bool {
        self.shared.snapshot_tx.borrow().is_connected
    }

    pub fn remote_stream(&self) -> Option<RemoteStream> {
        self.shared.snapshot_tx.borrow().remote_stream.clone()
    }

    pub fn snapshot(&self) -> CallSnapshot {
        self.shared.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<CallSnapshot> {
        self.shared.snapshot_tx.subscribe()
    }

    /// Handed out once.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<CallEvent>> {
        self.event_rx.take()
    }

    pub fn set_audio_enabled(&self, enabled: bool) {
        self.media.set_audio_enabled(enabled);
    }

    pub fn set_video_enabled(&self, enabled: bool) {
        self.media.set_video_enabled(enabled);
    }

    /// Joins the waiting session of this appointment, or starts one when
    /// nobody is waiting. Only valid from `Idle`.
    pub async fn start_or_join(&mut self) -> StartOrJoin {
        let span = info_span!("call", appointment_id = %self.shared.appointment_id);
        self.start_or_join_inner().instrument(span).await
    }

    async fn start_or_join_inner(&mut self) -> StartOrJoin {
        let state = self.state();
        if state != CallState::Idle {
            warn!("start_or_join ignored in state {:?}", state);
            return StartOrJoin::Idle;
        }

        match self.join().await {
            Ok(true) => return StartOrJoin::Joined,
            Ok(false) => {}
            Err(err) => warn!("join failed: {:#}", err),
        }
        let mut result = self.start().await;
        if matches!(result, Ok(StartOutcome::Conflict)) && self.options.retry_join_on_conflict {
            info!("call session appeared while starting, joining instead");
            match self.join().await {
                Ok(true) => return StartOrJoin::Joined,
                Ok(false) => {}
                Err(err) => result = Err(err),
            }
        }
        let message = match result {
            Ok(StartOutcome::Started) => return StartOrJoin::Started,
            Ok(StartOutcome::Conflict) => "call session already exists".to_owned(),
            Err(err) => format!("{:#}", err),
        };
        warn!("could not start or join: {}", message);
        self.shared.update(|snapshot| {
            snapshot.state = CallState::Idle;
            snapshot.last_error = Some(message.clone());
        });
        self.shared.publish(CallEvent::Failed(message));
        StartOrJoin::Idle
    }

    async fn prepare_link(&self) -> Result<(F::Link, PeerLinkEvents)> {
        let mut link = self.factory.create().await?;
        if let Err(err) = link.attach_local_media(&self.media).await {
            abandon_quietly(&link).await;
            return Err(err);
        }
        let Some(events) = link.take_events() else {
            abandon_quietly(&link).await;
            bail!("peer link events are already taken");
        };
        Ok((link, events))
    }

    /// `Ok(false)` when there is nothing to join.
    async fn join(&mut self) -> Result<bool> {
        self.shared.update(|snapshot| snapshot.state = CallState::Joining);
        let store = self.shared.store.clone();
        let appointment_id = self.shared.appointment_id.clone();

        let Some(session) = store.read_session(&appointment_id).await? else {
            debug!("no call session to join");
            return Ok(false);
        };
        if session.offering_party_id() == &self.party_id {
            info!("removing our own stale call session");
            store.delete_session(&appointment_id).await?;
            return Ok(false);
        }
        if session.answer().is_some() {
            bail!("call session is already answered");
        }

        let (link, events) = self.prepare_link().await?;
        let answer = match answer_offer(&link, session.into_offer()).await {
            Ok(answer) => answer,
            Err(err) => {
                abandon_quietly(&link).await;
                return Err(err);
            }
        };
        if let Err(err) = store
            .record_answer(&appointment_id, answer, &self.party_id)
            .await
        {
            abandon_quietly(&link).await;
            return Err(err.into());
        }
        info!("joined as the answering party");
        self.begin_negotiation(link, events, CallRole::Answerer);
        Ok(true)
    }

    async fn start(&mut self) -> Result<StartOutcome> {
        self.shared.update(|snapshot| snapshot.state = CallState::Starting);
        let store = self.shared.store.clone();
        let appointment_id = self.shared.appointment_id.clone();

        let (link, events) = self.prepare_link().await?;
        let offer = match link.create_offer_and_set_local().await {
            Ok(offer) => offer,
            Err(err) => {
                abandon_quietly(&link).await;
                return Err(err);
            }
        };
        match store
            .create_session(&appointment_id, offer, &self.party_id)
            .await
        {
            Ok(()) => {
                info!("started as the offering party");
                self.begin_negotiation(link, events, CallRole::Offerer);
                Ok(StartOutcome::Started)
            }
            Err(err) => {
                abandon_quietly(&link).await;
                match err {
                    CreateSessionError::AlreadyExists => Ok(StartOutcome::Conflict),
                    CreateSessionError::Other(err) => Err(err),
                }
            }
        }
    }

    fn begin_negotiation(&mut self, link: F::Link, events: PeerLinkEvents, role: CallRole) {
        let Some(wire_role) = role.wire_role() else {
            return;
        };
        let link = Arc::new(Mutex::new(link));
        self.link = Some(link.clone());
        self.shared.update(|snapshot| {
            snapshot.state = CallState::Negotiating;
            snapshot.role = role;
            snapshot.last_error = None;
        });

        let PeerLinkEvents {
            mut remote_stream_rx,
            connection_state_rx,
            mut local_candidate_rx,
        } = events;
        let span = info_span!("call", appointment_id = %self.shared.appointment_id);

        let shared = self.shared.clone();
        self.tasks.push(tokio::spawn(
            async move {
                while let Some(candidate) = local_candidate_rx.recv().await {
                    if let Err(err) = shared
                        .store
                        .append_candidate(&shared.appointment_id, wire_role, candidate)
                        .await
                    {
                        warn!("failed to send local candidate: {:#}", err);
                    }
                }
            }
            .instrument(span.clone()),
        ));

        let shared = self.shared.clone();
        let mut state_rx = connection_state_rx.clone();
        self.tasks.push(tokio::spawn(
            async move {
                while state_rx.changed().await.is_ok() {
                    let connection_state = *state_rx.borrow_and_update();
                    info!("connection state: {}", connection_state);
                    let mut forwarded = false;
                    shared.update(|snapshot| {
                        // Failed and Closed are final.
                        if matches!(snapshot.state, CallState::Failed | CallState::Closed) {
                            return;
                        }
                        forwarded = true;
                        snapshot.connection_state = connection_state;
                        snapshot.is_connected = connection_state == ConnectionState::Connected;
                        if connection_state == ConnectionState::Connected
                            && snapshot.state == CallState::Negotiating
                        {
                            snapshot.state = CallState::Connected;
                        }
                    });
                    if !forwarded {
                        break;
                    }
                    shared.publish(CallEvent::ConnectionStateChanged(connection_state));
                }
            }
            .instrument(span.clone()),
        ));

        let shared = self.shared.clone();
        self.tasks.push(tokio::spawn(
            async move {
                // One stream per negotiation.
                let Some(stream) = remote_stream_rx.recv().await else {
                    return;
                };
                info!("remote stream arrived: {}", stream.id());
                shared.update(|snapshot| snapshot.remote_stream = Some(stream.clone()));
                shared.publish(CallEvent::RemoteStream(stream));
            }
            .instrument(span.clone()),
        ));

        let ctx = PollContext {
            shared: self.shared.clone(),
            link,
            role: wire_role,
            poll_interval: self.options.poll_interval,
            negotiation_timeout: self.options.negotiation_timeout,
            connection_state_rx,
        };
        self.tasks
            .push(tokio::spawn(poll_loop(ctx).instrument(span)));
    }

    /// Tears the call down. Safe to call any number of times; only the first
    /// call does anything.
    pub async fn hang_up(&mut self) {
        if self.hung_up {
            return;
        }
        self.hung_up = true;
        let span = info_span!("call", appointment_id = %self.shared.appointment_id);
        self.hang_up_inner().instrument(span).await
    }

    async fn hang_up_inner(&mut self) {
        info!("hang up");
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.media.stop();
        if let Some(link) = self.link.take() {
            if let Err(err) = link.lock().await.close().await {
                warn!("failed to close peer link: {:#}", err);
            }
        }
        if self.role() != CallRole::Unknown {
            if let Err(err) = self
                .shared
                .store
                .delete_session(&self.shared.appointment_id)
                .await
            {
                warn!("failed to delete call session: {:#}", err);
            }
        }
        self.shared.update(|snapshot| {
            snapshot.state = CallState::Closed;
            snapshot.role = CallRole::Unknown;
            snapshot.is_connected = false;
            snapshot.remote_stream = None;
        });
    }
}

impl<S: SignalingStore, F: PeerLinkFactory> Drop for CallSessionController<S, F> {
    fn drop(&mut self) {
        if self.hung_up {
            return;
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.media.stop();
        let Ok(rt) = Handle::try_current() else {
            return;
        };
        let link = self.link.take();
        let participated = self.role() != CallRole::Unknown;
        let shared = self.shared.clone();
        rt.spawn(async move {
            if let Some(link) = link {
                let _ = link.lock().await.close().await;
            }
            if participated {
                let _ = shared.store.delete_session(&shared.appointment_id).await;
            }
        });
    }
}
