use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
};

use anyhow::Result;
use webrtc::{
    api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8},
    media::Sample,
    rtp_transceiver::rtp_codec::RTCRtpCodecCapability,
    track::{
        track_local::track_local_static_sample::TrackLocalStaticSample, track_remote::TrackRemote,
    },
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
}

/// A local track that can be muted and stopped. Samples written while the
/// track is disabled or stopped are dropped.
pub struct LocalTrack {
    kind: MediaKind,
    rtc: Arc<TrackLocalStaticSample>,
    enabled: AtomicBool,
    stopped: AtomicBool,
}

impl LocalTrack {
    pub fn new(kind: MediaKind, rtc: Arc<TrackLocalStaticSample>) -> Self {
        Self {
            kind,
            rtc,
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn opus(stream_id: &str) -> Self {
        let capability = RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_owned(),
            clock_rate: 48000,
            channels: 2,
            ..Default::default()
        };
        let rtc = TrackLocalStaticSample::new(capability, "audio".to_owned(), stream_id.to_owned());
        Self::new(MediaKind::Audio, Arc::new(rtc))
    }

    pub fn vp8(stream_id: &str) -> Self {
        let capability = RTCRtpCodecCapability {
            mime_type: MIME_TYPE_VP8.to_owned(),
            clock_rate: 90000,
            ..Default::default()
        };
        let rtc = TrackLocalStaticSample::new(capability, "video".to_owned(), stream_id.to_owned());
        Self::new(MediaKind::Video, Arc::new(rtc))
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn rtc(&self) -> &Arc<TrackLocalStaticSample> {
        &self.rtc
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub async fn write_sample(&self, sample: &Sample) -> Result<()> {
        if !self.is_enabled() || self.is_stopped() {
            return Ok(());
        }
        Ok(self.rtc.write_sample(sample).await?)
    }
}

/// The local camera and microphone, shared between a controller and the
/// peer link it feeds.
#[derive(Clone)]
pub struct LocalMedia {
    tracks: Arc<Vec<LocalTrack>>,
}

impl LocalMedia {
    pub fn new(tracks: Vec<LocalTrack>) -> Self {
        Self {
            tracks: Arc::new(tracks),
        }
    }

    /// An opus + vp8 pair without a capture device behind it.
    pub fn synthetic(stream_id: &str) -> Self {
        Self::new(vec![LocalTrack::opus(stream_id), LocalTrack::vp8(stream_id)])
    }

    pub fn tracks(&self) -> &[LocalTrack] {
        &self.tracks
    }

    fn set_enabled(&self, kind: MediaKind, enabled: bool) {
        self.tracks
            .iter()
            .filter(|track| track.kind() == kind)
            .for_each(|track| track.set_enabled(enabled));
    }

    pub fn set_audio_enabled(&self, enabled: bool) {
        self.set_enabled(MediaKind::Audio, enabled);
    }

    pub fn set_video_enabled(&self, enabled: bool) {
        self.set_enabled(MediaKind::Video, enabled);
    }

    pub fn stop(&self) {
        self.tracks.iter().for_each(|track| track.stop());
    }

    pub fn is_stopped(&self) -> bool {
        self.tracks.iter().all(|track| track.is_stopped())
    }
}

/// The counterpart's media. Created on the first remote track; tracks that
/// arrive later for the same negotiation are appended to the same stream.
#[derive(Clone)]
pub struct RemoteStream {
    id: String,
    tracks: Arc<Mutex<Vec<Arc<TrackRemote>>>>,
}

impl RemoteStream {
    pub fn new(id: String) -> Self {
        Self {
            id,
            tracks: Default::default(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn push_track(&self, track: Arc<TrackRemote>) {
        self.tracks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(track);
    }

    pub fn tracks(&self) -> Vec<Arc<TrackRemote>> {
        self.tracks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl fmt::Debug for RemoteStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteStream")
            .field("id", &self.id)
            .field("tracks", &self.tracks().len())
            .finish()
    }
}

impl PartialEq for RemoteStream {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn muting_only_touches_the_requested_kind() {
        let media = LocalMedia::synthetic("local");
        media.set_audio_enabled(false);

        let audio = &media.tracks()[0];
        let video = &media.tracks()[1];
        assert_eq!(audio.kind(), MediaKind::Audio);
        assert!(!audio.is_enabled());
        assert!(video.is_enabled());

        media.set_audio_enabled(true);
        media.set_video_enabled(false);
        assert!(audio.is_enabled());
        assert!(!video.is_enabled());
    }

    #[test]
    fn stop_is_shared_between_clones() {
        let media = LocalMedia::synthetic("local");
        let clone = media.clone();
        assert!(!media.is_stopped());
        clone.stop();
        assert!(media.is_stopped());
    }

    #[tokio::test]
    async fn samples_are_dropped_while_muted() {
        let track = LocalTrack::opus("local");
        track.set_enabled(false);
        let sample = Sample {
            data: bytes::Bytes::from_static(&[0u8; 4]),
            ..Default::default()
        };
        track.write_sample(&sample).await.unwrap();
    }
}
