use std::io::Write;

use anyhow::Result;
use base64::{prelude::BASE64_STANDARD_NO_PAD, Engine};
use flate2::{
    write::{DeflateDecoder, DeflateEncoder},
    Compression,
};
use serde::{Deserialize, Serialize};
use webrtc::{
    ice_transport::ice_candidate::RTCIceCandidateInit,
    peer_connection::sdp::session_description::RTCSessionDescription,
};

/// An SDP body as it is stored in the signaling server.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct CompressedSdp(String);

impl CompressedSdp {
    pub fn into_inner(self) -> String {
        self.0
    }

    pub fn compress(sdp: &str) -> Result<Self> {
        let mut e = DeflateEncoder::new(Vec::new(), Compression::best());
        e.write_all(sdp.as_bytes())?;
        let compressed_bytes = e.finish()?;
        Ok(Self(BASE64_STANDARD_NO_PAD.encode(compressed_bytes)))
    }

    pub fn decompress(&self) -> Result<String> {
        let compressed_bytes = BASE64_STANDARD_NO_PAD.decode(&self.0)?;
        let mut d = DeflateDecoder::new(Vec::new());
        d.write_all(&compressed_bytes)?;
        Ok(String::from_utf8_lossy(&d.finish()?).to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SdpType {
    Offer,
    Answer,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionDescription {
    sdp_type: SdpType,
    sdp: CompressedSdp,
}

impl SessionDescription {
    pub fn offer(sdp: CompressedSdp) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp,
        }
    }

    pub fn answer(sdp: CompressedSdp) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp,
        }
    }

    pub fn sdp_type(&self) -> SdpType {
        self.sdp_type
    }

    pub fn sdp(&self) -> &CompressedSdp {
        &self.sdp
    }

    pub fn into_sdp(self) -> CompressedSdp {
        self.sdp
    }
}

pub fn decompress_session_description(desc: SessionDescription) -> Result<RTCSessionDescription> {
    let sdp = desc.sdp.decompress()?;
    Ok(match desc.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(sdp)?,
        SdpType::Answer => RTCSessionDescription::answer(sdp)?,
    })
}

/// A trickled ICE candidate. The signaling server never looks inside.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq, Hash, Serialize)]
pub struct CandidatePayload {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl CandidatePayload {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            ..Default::default()
        }
    }
}

impl From<RTCIceCandidateInit> for CandidatePayload {
    fn from(init: RTCIceCandidateInit) -> Self {
        Self {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_mline_index: init.sdp_mline_index,
            username_fragment: init.username_fragment,
        }
    }
}

impl From<CandidatePayload> for RTCIceCandidateInit {
    fn from(payload: CandidatePayload) -> Self {
        Self {
            candidate: payload.candidate,
            sdp_mid: payload.sdp_mid,
            sdp_mline_index: payload.sdp_mline_index,
            username_fragment: payload.username_fragment,
        }
    }
}
