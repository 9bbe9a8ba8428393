use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace, warn};
use uuid::Uuid;
use webrtc::{
    api::{
        interceptor_registry::register_default_interceptors, media_engine::MediaEngine,
        setting_engine::SettingEngine, APIBuilder,
    },
    ice_transport::{ice_candidate::RTCIceCandidate, ice_server::RTCIceServer},
    interceptor::registry::Registry,
    peer_connection::{
        configuration::RTCConfiguration, peer_connection_state::RTCPeerConnectionState,
        RTCPeerConnection,
    },
    track::track_local::TrackLocal,
};

use super::{
    media::{LocalMedia, RemoteStream},
    signaling::{
        decompress_session_description, CandidatePayload, CompressedSdp, SessionDescription,
    },
};

pub const DEFAULT_ICE_SERVER: &str = "stun:stun.l.google.com:19302";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed | Self::Closed)
    }
}

impl From<RTCPeerConnectionState> for ConnectionState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::Unspecified | RTCPeerConnectionState::New => Self::New,
            RTCPeerConnectionState::Connecting => Self::Connecting,
            RTCPeerConnectionState::Connected => Self::Connected,
            RTCPeerConnectionState::Disconnected => Self::Disconnected,
            RTCPeerConnectionState::Failed => Self::Failed,
            RTCPeerConnectionState::Closed => Self::Closed,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::New => "new",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum PeerLinkError {
    #[error("local media must be attached before negotiation starts")]
    NegotiationStarted,
    #[error("peer link is closed")]
    Closed,
}

/// Receivers for everything a peer link reports. Handed out once.
pub struct PeerLinkEvents {
    pub remote_stream_rx: mpsc::Receiver<RemoteStream>,
    pub connection_state_rx: watch::Receiver<ConnectionState>,
    pub local_candidate_rx: mpsc::UnboundedReceiver<CandidatePayload>,
}

#[async_trait]
pub trait PeerLink: Send + Sync + 'static {
    async fn attach_local_media(&self, media: &LocalMedia) -> Result<()>;
    fn take_events(&mut self) -> Option<PeerLinkEvents>;

    async fn create_offer_and_set_local(&self) -> Result<CompressedSdp>;
    async fn create_answer_and_set_local(&self) -> Result<CompressedSdp>;
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;
    async fn has_remote_description(&self) -> bool;
    /// Late or duplicate candidates are expected; callers log failures and
    /// carry on.
    async fn add_remote_candidate(&self, candidate: CandidatePayload) -> Result<()>;

    async fn close(&self) -> Result<()>;
    /// Like `close`, but leaves the attached local media running so that it
    /// can be attached to another link.
    async fn abandon(&self) -> Result<()>;
}

#[async_trait]
pub trait PeerLinkFactory: Send + Sync + 'static {
    type Link: PeerLink;

    async fn create(&self) -> Result<Self::Link>;
}

fn create_config(ice_servers: &[String]) -> RTCConfiguration {
    if ice_servers.is_empty() {
        return RTCConfiguration::default();
    }
    RTCConfiguration {
        ice_servers: vec![RTCIceServer {
            urls: ice_servers.to_vec(),
            ..Default::default()
        }],
        ..Default::default()
    }
}

async fn create_peer_connection(ice_servers: &[String]) -> Result<RTCPeerConnection> {
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs()?;
    let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;
    let mut setting_engine = SettingEngine::default();
    setting_engine.set_ice_timeouts(None, Some(Duration::from_secs(20 * 60)), None);
    Ok(APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .with_setting_engine(setting_engine)
        .build()
        .new_peer_connection(create_config(ice_servers))
        .await?)
}

pub struct RtcPeerLink {
    rtc: Arc<RTCPeerConnection>,
    events: Option<PeerLinkEvents>,
    media: Mutex<Option<LocalMedia>>,
    negotiation_started: AtomicBool,
    closed: AtomicBool,
}

impl Drop for RtcPeerLink {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        trace!("drop peer link");
        if let Some(media) = self.take_media() {
            media.stop();
        }
        let rtc = self.rtc.clone();
        // NOTE: An established RTCPeerConnection stays up after drop,
        //       so close it explicitly.
        let Ok(rt) = tokio::runtime::Handle::try_current() else {
            warn!("no runtime to close the peer connection on");
            return;
        };
        rt.spawn(async move {
            let _ = rtc.close().await;
            trace!("peer connection closed");
        });
    }
}

impl RtcPeerLink {
    pub async fn new(ice_servers: &[String]) -> Result<Self> {
        let rtc = Arc::new(create_peer_connection(ice_servers).await?);

        let (connection_state_tx, connection_state_rx) = watch::channel(ConnectionState::New);
        rtc.on_peer_connection_state_change(Box::new(move |state| {
            debug!("on_peer_connection_state_change {}", state);
            connection_state_tx.send_replace(state.into());
            Box::pin(async {})
        }));

        let (local_candidate_tx, local_candidate_rx) = mpsc::unbounded_channel();
        rtc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let local_candidate_tx = local_candidate_tx.clone();
            Box::pin(async move {
                // None marks the end of gathering
                let Some(candidate) = candidate else {
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => {
                        let _ = local_candidate_tx.send(init.into());
                    }
                    Err(err) => warn!("Failed to serialize local candidate: {}", err),
                }
            })
        }));

        let (remote_stream_tx, remote_stream_rx) = mpsc::channel(1);
        let mut remote_stream: Option<RemoteStream> = None;
        rtc.on_track(Box::new(move |track, _receiver, _transceiver| {
            debug!("on_track");
            match &remote_stream {
                Some(stream) => stream.push_track(track),
                None => {
                    let stream = RemoteStream::new(Uuid::new_v4().to_string());
                    stream.push_track(track);
                    remote_stream = Some(stream.clone());
                    let _ = remote_stream_tx.try_send(stream);
                }
            }
            Box::pin(async {})
        }));

        Ok(Self {
            rtc,
            events: Some(PeerLinkEvents {
                remote_stream_rx,
                connection_state_rx,
                local_candidate_rx,
            }),
            media: Mutex::new(None),
            negotiation_started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    fn take_media(&self) -> Option<LocalMedia> {
        self.media
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PeerLinkError::Closed.into());
        }
        Ok(())
    }

    async fn local_description(&self) -> Result<CompressedSdp> {
        let local_desc = self
            .rtc
            .local_description()
            .await
            .ok_or_else(|| anyhow!("Failed to get local description"))?;
        CompressedSdp::compress(&local_desc.sdp)
    }
}

#[async_trait]
impl PeerLink for RtcPeerLink {
    async fn attach_local_media(&self, media: &LocalMedia) -> Result<()> {
        self.ensure_open()?;
        if self.negotiation_started.load(Ordering::SeqCst) {
            return Err(PeerLinkError::NegotiationStarted.into());
        }
        for track in media.tracks() {
            self.rtc
                .add_track(Arc::clone(track.rtc()) as Arc<dyn TrackLocal + Send + Sync>)
                .await?;
        }
        *self.media.lock().unwrap_or_else(PoisonError::into_inner) = Some(media.clone());
        Ok(())
    }

    fn take_events(&mut self) -> Option<PeerLinkEvents> {
        self.events.take()
    }

    async fn create_offer_and_set_local(&self) -> Result<CompressedSdp> {
        self.ensure_open()?;
        self.negotiation_started.store(true, Ordering::SeqCst);
        let offer = self.rtc.create_offer(None).await?;
        self.rtc.set_local_description(offer).await?;
        self.local_description().await
    }

    async fn create_answer_and_set_local(&self) -> Result<CompressedSdp> {
        self.ensure_open()?;
        self.negotiation_started.store(true, Ordering::SeqCst);
        let answer = self.rtc.create_answer(None).await?;
        self.rtc.set_local_description(answer).await?;
        self.local_description().await
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        self.ensure_open()?;
        self.negotiation_started.store(true, Ordering::SeqCst);
        let desc = decompress_session_description(desc)?;
        self.rtc.set_remote_description(desc).await?;
        Ok(())
    }

    async fn has_remote_description(&self) -> bool {
        self.rtc.remote_description().await.is_some()
    }

    async fn add_remote_candidate(&self, candidate: CandidatePayload) -> Result<()> {
        self.ensure_open()?;
        self.rtc.add_ice_candidate(candidate.into()).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(media) = self.take_media() {
            media.stop();
        }
        self.rtc.close().await?;
        Ok(())
    }

    async fn abandon(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let _ = self.take_media();
        self.rtc.close().await?;
        Ok(())
    }
}

pub struct RtcPeerLinkFactory {
    ice_servers: Vec<String>,
}

impl RtcPeerLinkFactory {
    pub fn new(ice_servers: Vec<String>) -> Self {
        Self { ice_servers }
    }
}

impl Default for RtcPeerLinkFactory {
    fn default() -> Self {
        Self::new(vec![DEFAULT_ICE_SERVER.to_owned()])
    }
}

#[async_trait]
impl PeerLinkFactory for RtcPeerLinkFactory {
    type Link = RtcPeerLink;

    async fn create(&self) -> Result<RtcPeerLink> {
        RtcPeerLink::new(&self.ice_servers).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(!ConnectionState::New.is_terminal());
        assert!(!ConnectionState::Connected.is_terminal());
        assert!(ConnectionState::Disconnected.is_terminal());
        assert!(ConnectionState::Failed.is_terminal());
        assert!(ConnectionState::Closed.is_terminal());
        assert_eq!(
            ConnectionState::from(RTCPeerConnectionState::Unspecified),
            ConnectionState::New
        );
    }

    #[tokio::test]
    async fn media_cannot_be_attached_after_negotiation_started() {
        let link = RtcPeerLink::new(&[]).await.unwrap();
        let media = LocalMedia::synthetic("local");
        link.attach_local_media(&media).await.unwrap();
        link.create_offer_and_set_local().await.unwrap();

        let err = link
            .attach_local_media(&LocalMedia::synthetic("late"))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PeerLinkError>(),
            Some(PeerLinkError::NegotiationStarted)
        ));
        link.close().await.unwrap();
    }

    #[tokio::test]
    async fn offer_and_answer_between_two_links() {
        let offerer = RtcPeerLink::new(&[]).await.unwrap();
        let answerer = RtcPeerLink::new(&[]).await.unwrap();
        offerer
            .attach_local_media(&LocalMedia::synthetic("offerer"))
            .await
            .unwrap();
        answerer
            .attach_local_media(&LocalMedia::synthetic("answerer"))
            .await
            .unwrap();

        let offer = offerer.create_offer_and_set_local().await.unwrap();
        assert!(offer.decompress().unwrap().contains("m=audio"));
        answerer
            .set_remote_description(SessionDescription::offer(offer))
            .await
            .unwrap();
        assert!(answerer.has_remote_description().await);
        let answer = answerer.create_answer_and_set_local().await.unwrap();

        assert!(!offerer.has_remote_description().await);
        offerer
            .set_remote_description(SessionDescription::answer(answer))
            .await
            .unwrap();
        assert!(offerer.has_remote_description().await);

        offerer.close().await.unwrap();
        answerer.close().await.unwrap();
    }

    #[tokio::test]
    async fn close_is_idempotent_and_stops_media() {
        let link = RtcPeerLink::new(&[]).await.unwrap();
        let media = LocalMedia::synthetic("local");
        link.attach_local_media(&media).await.unwrap();
        link.close().await.unwrap();
        link.close().await.unwrap();
        assert!(media.is_stopped());
        assert!(link
            .add_remote_candidate(CandidatePayload::new("candidate:1"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn abandon_keeps_media_running() {
        let link = RtcPeerLink::new(&[]).await.unwrap();
        let media = LocalMedia::synthetic("local");
        link.attach_local_media(&media).await.unwrap();
        link.abandon().await.unwrap();
        assert!(!media.is_stopped());
        link.close().await.unwrap();
        assert!(!media.is_stopped());
    }
}
