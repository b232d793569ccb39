//! Engine-facing and application-facing event types
//!
//! Engine callbacks never mutate session state directly: each handler
//! enqueues an [`EngineEvent`] which the session's event pump processes
//! on the control task. Outcomes the embedding application cares about
//! are emitted as [`SessionEvent`]s.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;

/// Internal notification produced by an engine callback.
pub(crate) enum EngineEvent {
    /// A local ICE candidate was gathered (None marks end of gathering)
    IceCandidate(Option<RTCIceCandidate>),
    /// A remote media track started arriving
    RemoteTrackAdded { kind: String, track_id: String },
    /// A previously added remote track was removed
    RemoteTrackRemoved { track_id: String },
    /// The remote peer opened a data channel toward us
    DataChannelOpened(Arc<RTCDataChannel>),
    /// A message arrived on the bound data channel
    ChannelMessage(DataChannelMessage),
    /// Aggregate connection state changed
    ConnectionStateChanged(RTCPeerConnectionState),
}

pub(crate) type EngineEventSender = mpsc::UnboundedSender<EngineEvent>;
pub(crate) type EngineEventReceiver = mpsc::UnboundedReceiver<EngineEvent>;

/// Notification delivered to the embedding application.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A local session description is ready to forward to the peer
    SignalingSuccess {
        /// "offer", "answer", or "pranswer"
        sdp_type: String,
        /// The SDP text
        sdp: String,
    },
    /// Local description generation or application failed
    SignalingFailure { message: String },
    /// A local ICE candidate to forward to the peer
    IceCandidate {
        mid: String,
        mline_index: u16,
        sdp: String,
    },
    /// A converted frame from the local capture pipeline
    LocalFrame {
        pixels: Bytes,
        width: u32,
        height: u32,
    },
    /// A converted frame from a remote track
    RemoteFrame {
        pixels: Bytes,
        width: u32,
        height: u32,
    },
    /// Text received on the data channel
    TextMessage(String),
    /// Binary data received on the data channel
    BinaryMessage(Bytes),
    /// A non-fatal session error
    Error { message: String },
}

/// Sending half of the application event queue.
pub type SessionEventSender = mpsc::UnboundedSender<SessionEvent>;
