pub mod media;
pub mod peer_link;
pub mod signaling;

pub use media::{LocalMedia, LocalTrack, MediaKind, RemoteStream};
pub use peer_link::{
    ConnectionState, PeerLink, PeerLinkError, PeerLinkEvents, PeerLinkFactory, RtcPeerLink,
    RtcPeerLinkFactory,
};
