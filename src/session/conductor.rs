//! Session orchestrator
//!
//! The [`Conductor`] owns one peer connection end to end: engine
//! construction, offer/answer negotiation, ICE candidate exchange, the
//! capture and render pipelines, the control data channel, and optional
//! in-process STUN/TURN relays. Engine callbacks never touch session
//! state directly; they enqueue [`EngineEvent`]s which
//! [`Conductor::process_events`] dispatches on the control task.

use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice::network_type::NetworkType;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::offer_answer_options::RTCAnswerOptions;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use crate::channels::{unreliable_channel_init, ChannelMessage};
use crate::config::{ConductorConfig, IceServerConfig};
use crate::convert::PixelLayout;
use crate::media::{
    AudioSink, CaptureDriver, CaptureFormat, DeviceSource, PushSource, ScreenCapturer,
    ScreenSource, VideoFrame, VideoSink, VideoSource,
};
use crate::relay::{run_stun_server, run_turn_server, StunServer, TurnServer};
use crate::{Error, Result};

use super::events::{EngineEvent, EngineEventReceiver, EngineEventSender, SessionEvent};

/// Label of the local audio track
pub const AUDIO_LABEL: &str = "audio_label";
/// Label of the local video track
pub const VIDEO_LABEL: &str = "video_label";
/// Stream id both local tracks belong to
pub const STREAM_LABEL: &str = "stream_label";

/// Negotiation lifecycle of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No peer connection exists yet
    Uninitialized,
    /// Peer connection built, tracks added, no negotiation started
    Initialized,
    /// A local offer has been generated
    OfferCreated,
    /// A remote offer has been applied, answer pending or sent
    OfferReceived,
    /// Descriptions exchanged, ICE in progress
    Negotiating,
    /// The connection is established
    Connected,
    /// The connection was closed by either side
    Closed,
}

/// One WebRTC session and its media pipeline.
pub struct Conductor {
    config: ConductorConfig,
    state: SessionState,

    peer_connection: Option<Arc<RTCPeerConnection>>,
    senders: Vec<Arc<RTCRtpSender>>,
    data_channel: Option<Arc<RTCDataChannel>>,

    /// Descriptors staged before initialize; snapshotted exactly once.
    staged_servers: Vec<RTCIceServer>,
    committed_servers: Vec<RTCIceServer>,

    engine_tx: EngineEventSender,
    engine_rx: EngineEventReceiver,
    events: mpsc::UnboundedSender<SessionEvent>,

    capture_driver: Option<Arc<dyn CaptureDriver>>,
    screen_capturer: Option<Box<dyn ScreenCapturer>>,
    device_source: Option<DeviceSource>,
    screen_source: Option<ScreenSource>,
    push_source: Option<PushSource>,
    frame_rx: Option<mpsc::UnboundedReceiver<VideoFrame>>,

    local_sink: Option<VideoSink>,
    remote_video_sink: Option<VideoSink>,
    remote_audio_sink: Option<AudioSink>,

    stun_server: Option<StunServer>,
    turn_server: Option<TurnServer>,
}

impl Conductor {
    /// Create a session from a validated configuration. Returns the
    /// conductor and the receiving half of its application event queue.
    pub fn new(
        config: ConductorConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SessionEvent>)> {
        config.validate()?;
        let (events, events_rx) = mpsc::unbounded_channel();
        let (engine_tx, engine_rx) = mpsc::unbounded_channel();
        Ok((
            Self {
                config,
                state: SessionState::Uninitialized,
                peer_connection: None,
                senders: Vec::new(),
                data_channel: None,
                staged_servers: Vec::new(),
                committed_servers: Vec::new(),
                engine_tx,
                engine_rx,
                events,
                capture_driver: None,
                screen_capturer: None,
                device_source: None,
                screen_source: None,
                push_source: None,
                frame_rx: None,
                local_sink: None,
                remote_video_sink: None,
                remote_audio_sink: None,
                stun_server: None,
                turn_server: None,
            },
            events_rx,
        ))
    }

    /// Install the capture-device collaborator.
    pub fn with_capture_driver(mut self, driver: Arc<dyn CaptureDriver>) -> Self {
        self.capture_driver = Some(driver);
        self
    }

    /// Install the screen-capture collaborator.
    pub fn with_screen_capturer(mut self, capturer: Box<dyn ScreenCapturer>) -> Self {
        self.screen_capturer = Some(capturer);
        self
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The server set committed at initialize time.
    pub fn configured_servers(&self) -> &[RTCIceServer] {
        &self.committed_servers
    }

    fn capture_format(&self) -> CaptureFormat {
        CaptureFormat {
            width: self.config.width,
            height: self.config.height,
            fps: self.config.fps,
        }
    }

    /// Stage one server descriptor. The set is immutable once the
    /// session has been initialized.
    pub fn add_server_descriptor(&mut self, server: &IceServerConfig) -> Result<()> {
        if self.state != SessionState::Uninitialized {
            return Err(Error::SessionError(
                "server descriptors are committed at initialize and cannot change".to_string(),
            ));
        }
        let scheme_ok = ["stun:", "turn:", "turns:"]
            .iter()
            .any(|s| server.uri.starts_with(s));
        if !scheme_ok {
            return Err(Error::InvalidConfig(format!(
                "unsupported server uri: {}",
                server.uri
            )));
        }
        self.staged_servers.push(RTCIceServer {
            urls: vec![server.uri.clone()],
            username: server.username.clone(),
            credential: server.password.clone(),
        });
        Ok(())
    }

    /// Adjust the capture geometry. Only allowed before initialize.
    pub fn set_capture_geometry(&mut self, width: u32, height: u32, fps: u32) -> Result<()> {
        if self.state != SessionState::Uninitialized {
            return Err(Error::SessionError(
                "capture geometry is fixed after initialize".to_string(),
            ));
        }
        let updated = self.config.clone().with_geometry(width, height, fps);
        updated.validate()?;
        self.config = updated;
        Ok(())
    }

    /// Toggle the audio track. Only allowed before initialize.
    pub fn set_audio(&mut self, enabled: bool) -> Result<()> {
        if self.state != SessionState::Uninitialized {
            return Err(Error::SessionError(
                "audio flag is fixed after initialize".to_string(),
            ));
        }
        self.config.audio_enabled = enabled;
        Ok(())
    }

    /// Build the peer connection, register engine callbacks, and add the
    /// local tracks. Fails if the session is already initialized.
    pub async fn initialize(&mut self) -> Result<()> {
        if self.state != SessionState::Uninitialized {
            return Err(Error::SessionError(format!(
                "initialize called in state {:?}",
                self.state
            )));
        }

        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;

        let mut setting_engine = SettingEngine::default();
        // UDP/IPv4 host candidates only.
        setting_engine.set_network_types(vec![NetworkType::Udp4]);
        if self.config.include_loopback_candidates {
            setting_engine.set_include_loopback_candidate(true);
        }

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .with_setting_engine(setting_engine)
            .build();

        let committed = self.staged_servers.clone();
        let pc = Arc::new(
            api.new_peer_connection(RTCConfiguration {
                ice_servers: committed.clone(),
                ..Default::default()
            })
            .await?,
        );

        self.register_engine_callbacks(&pc);

        match self.add_local_tracks(&pc).await {
            Ok(senders) => {
                self.senders = senders;
            }
            Err(err) => {
                // Drop the half-built connection before reporting.
                let _ = pc.close().await;
                return Err(err);
            }
        }

        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let format = self.capture_format();
        self.push_source = Some(PushSource::new(
            format,
            self.config.quality_scaling_enabled,
            frame_tx,
        ));
        self.frame_rx = Some(frame_rx);
        if let Some(capturer) = self.screen_capturer.take() {
            self.screen_source = Some(ScreenSource::new(capturer, format));
        }
        self.local_sink = Some(VideoSink::local(self.events.clone()));

        self.committed_servers = committed;
        self.peer_connection = Some(pc);
        self.state = SessionState::Initialized;
        info!(
            width = self.config.width,
            height = self.config.height,
            fps = self.config.fps,
            audio = self.config.audio_enabled,
            "session initialized"
        );
        Ok(())
    }

    fn register_engine_callbacks(&self, pc: &Arc<RTCPeerConnection>) {
        let tx = self.engine_tx.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(EngineEvent::IceCandidate(candidate));
            })
        }));

        let tx = self.engine_tx.clone();
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let tx = tx.clone();
            Box::pin(async move {
                let kind = track.kind().to_string();
                let track_id = track.id();
                let _ = tx.send(EngineEvent::RemoteTrackAdded {
                    kind,
                    track_id: track_id.clone(),
                });
                // Drain the track so removal is observable: the read
                // loop ends when the sender stops or the session closes.
                let tx = tx.clone();
                tokio::spawn(async move {
                    while track.read_rtp().await.is_ok() {}
                    let _ = tx.send(EngineEvent::RemoteTrackRemoved { track_id });
                });
            })
        }));

        let tx = self.engine_tx.clone();
        pc.on_data_channel(Box::new(move |channel: Arc<RTCDataChannel>| {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(EngineEvent::DataChannelOpened(channel));
            })
        }));

        let tx = self.engine_tx.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(EngineEvent::ConnectionStateChanged(state));
            })
        }));
    }

    async fn add_local_tracks(
        &self,
        pc: &Arc<RTCPeerConnection>,
    ) -> Result<Vec<Arc<RTCRtpSender>>> {
        let mut senders = Vec::new();

        let video_track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                clock_rate: 90_000,
                ..Default::default()
            },
            VIDEO_LABEL.to_owned(),
            STREAM_LABEL.to_owned(),
        ));
        let sender = pc
            .add_track(Arc::clone(&video_track) as Arc<dyn TrackLocal + Send + Sync>)
            .await?;
        senders.push(sender);

        if self.config.audio_enabled {
            let audio_track = Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_OPUS.to_owned(),
                    clock_rate: 48_000,
                    channels: 2,
                    ..Default::default()
                },
                AUDIO_LABEL.to_owned(),
                STREAM_LABEL.to_owned(),
            ));
            let sender = pc
                .add_track(Arc::clone(&audio_track) as Arc<dyn TrackLocal + Send + Sync>)
                .await?;
            senders.push(sender);
        }

        Ok(senders)
    }

    fn require_peer_connection(&self) -> Result<Arc<RTCPeerConnection>> {
        self.peer_connection
            .clone()
            .ok_or_else(|| Error::SessionError("session not initialized".to_string()))
    }

    /// Generate a local offer, apply it, and emit it for signaling.
    /// Creates the control channel first if none exists yet. Ignored
    /// without a connection.
    pub async fn create_offer(&mut self) -> Result<()> {
        let Some(pc) = self.peer_connection.clone() else {
            warn!("create_offer without a connection ignored");
            return Ok(());
        };
        if self.data_channel.is_none() {
            self.create_data_channel("data").await?;
        }

        match self.negotiate_offer(&pc).await {
            Ok((sdp_type, sdp)) => {
                self.state = SessionState::OfferCreated;
                let _ = self
                    .events
                    .send(SessionEvent::SignalingSuccess { sdp_type, sdp });
                Ok(())
            }
            Err(err) => {
                let _ = self.events.send(SessionEvent::SignalingFailure {
                    message: err.to_string(),
                });
                Err(err)
            }
        }
    }

    async fn negotiate_offer(&self, pc: &Arc<RTCPeerConnection>) -> Result<(String, String)> {
        let offer = pc.create_offer(None).await?;
        pc.set_local_description(offer).await?;
        let local = pc
            .local_description()
            .await
            .ok_or_else(|| Error::SdpError("local description not set".to_string()))?;
        Ok((local.sdp_type.to_string(), local.sdp))
    }

    /// Apply the peer's reply to our offer. A malformed reply leaves the
    /// session state untouched.
    pub async fn on_offer_reply(&mut self, sdp_type: &str, sdp: &str) -> Result<()> {
        let pc = self.require_peer_connection()?;
        let description = parse_session_description(sdp_type, sdp)?;
        pc.set_remote_description(description).await?;
        self.state = SessionState::Negotiating;
        debug!(sdp_type, "remote reply applied");
        Ok(())
    }

    /// Apply a remote offer and answer it. Voice activity detection is
    /// disabled in the generated answer.
    pub async fn on_offer_request(&mut self, sdp: &str) -> Result<()> {
        let pc = self.require_peer_connection()?;
        let offer = parse_session_description("offer", sdp)?;
        pc.set_remote_description(offer).await?;
        self.state = SessionState::OfferReceived;

        let result: Result<(String, String)> = async {
            let answer = pc
                .create_answer(Some(RTCAnswerOptions {
                    voice_activity_detection: false,
                }))
                .await?;
            pc.set_local_description(answer).await?;
            let local = pc
                .local_description()
                .await
                .ok_or_else(|| Error::SdpError("local description not set".to_string()))?;
            Ok((local.sdp_type.to_string(), local.sdp))
        }
        .await;

        match result {
            Ok((sdp_type, sdp)) => {
                self.state = SessionState::Negotiating;
                let _ = self
                    .events
                    .send(SessionEvent::SignalingSuccess { sdp_type, sdp });
                Ok(())
            }
            Err(err) => {
                let _ = self.events.send(SessionEvent::SignalingFailure {
                    message: err.to_string(),
                });
                Err(err)
            }
        }
    }

    /// Apply one remote ICE candidate. Returns whether the candidate
    /// was accepted; a malformed candidate is rejected without touching
    /// session state.
    pub async fn add_ice_candidate(
        &mut self,
        mid: &str,
        mline_index: u16,
        sdp: &str,
    ) -> Result<bool> {
        let pc = self.require_peer_connection()?;
        let init = RTCIceCandidateInit {
            candidate: sdp.to_string(),
            sdp_mid: Some(mid.to_string()),
            sdp_mline_index: Some(mline_index),
            username_fragment: None,
        };
        match pc.add_ice_candidate(init).await {
            Ok(()) => Ok(true),
            Err(err) => {
                warn!(%err, "rejected remote candidate");
                Ok(false)
            }
        }
    }

    /// Create the locally-initiated control channel and bind it.
    /// Ignored without a connection.
    pub async fn create_data_channel(&mut self, label: &str) -> Result<()> {
        let Some(pc) = self.peer_connection.clone() else {
            warn!(label, "create_data_channel without a connection ignored");
            return Ok(());
        };
        let channel = pc
            .create_data_channel(label, Some(unreliable_channel_init()))
            .await?;
        self.bind_data_channel(channel).await;
        Ok(())
    }

    /// Bind a channel as the session's single control channel, closing
    /// any superseded one first.
    async fn bind_data_channel(&mut self, channel: Arc<RTCDataChannel>) {
        if let Some(previous) = self.data_channel.take() {
            debug!(label = previous.label(), "closing superseded channel");
            let _ = previous.close().await;
        }

        let tx = self.engine_tx.clone();
        channel.on_message(Box::new(move |msg| {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(EngineEvent::ChannelMessage(msg));
            })
        }));
        info!(label = channel.label(), "control channel bound");
        self.data_channel = Some(channel);
    }

    /// Send text on the control channel. A missing channel, an
    /// over-cap payload, or a failed send drops the message silently.
    pub async fn send_text(&self, text: &str) {
        let message = ChannelMessage::text(text);
        if message.exceeds_max_size() {
            warn!(size = message.size(), "outgoing text exceeds message cap, dropped");
            return;
        }
        match &self.data_channel {
            Some(channel) => {
                if let Err(err) = channel.send_text(text.to_string()).await {
                    debug!(%err, "dropped outgoing text message");
                }
            }
            None => debug!("no control channel, text message dropped"),
        }
    }

    /// Send binary data on the control channel. A missing channel, an
    /// over-cap payload, or a failed send drops the message silently.
    pub async fn send_binary(&self, data: &[u8]) {
        if data.len() > crate::channels::MAX_MESSAGE_SIZE {
            warn!(size = data.len(), "outgoing payload exceeds message cap, dropped");
            return;
        }
        match &self.data_channel {
            Some(channel) => {
                if let Err(err) = channel.send(&Bytes::copy_from_slice(data)).await {
                    debug!(%err, "dropped outgoing binary message");
                }
            }
            None => debug!("no control channel, binary message dropped"),
        }
    }

    /// Drain and dispatch all queued engine notifications. Call from
    /// the control task whenever the queue may have grown.
    pub async fn process_events(&mut self) {
        while let Ok(event) = self.engine_rx.try_recv() {
            self.handle_engine_event(event).await;
        }
    }

    async fn handle_engine_event(&mut self, event: EngineEvent) {
        // Completions raced with teardown observe the cleared handle
        // and no-op.
        if self.peer_connection.is_none() {
            debug!("engine event after teardown ignored");
            return;
        }
        match event {
            EngineEvent::IceCandidate(candidate) => self.handle_ice_candidate(candidate),
            EngineEvent::RemoteTrackAdded { kind, track_id } => {
                self.handle_remote_track_added(&kind, track_id)
            }
            EngineEvent::RemoteTrackRemoved { track_id } => {
                self.handle_remote_track_removed(&track_id)
            }
            EngineEvent::DataChannelOpened(channel) => {
                self.bind_data_channel(channel).await;
            }
            EngineEvent::ChannelMessage(msg) => self.handle_channel_message(msg),
            EngineEvent::ConnectionStateChanged(state) => self.handle_connection_state(state),
        }
    }

    fn handle_ice_candidate(&mut self, candidate: Option<RTCIceCandidate>) {
        let Some(candidate) = candidate else {
            debug!("candidate gathering complete");
            return;
        };
        match candidate.to_json() {
            Ok(init) => {
                let _ = self.events.send(SessionEvent::IceCandidate {
                    mid: init.sdp_mid.unwrap_or_default(),
                    mline_index: init.sdp_mline_index.unwrap_or_default(),
                    sdp: init.candidate,
                });
            }
            Err(err) => {
                warn!(%err, "failed to serialize local candidate");
            }
        }
    }

    fn handle_remote_track_added(&mut self, kind: &str, track_id: String) {
        match kind {
            "video" => {
                if self.remote_video_sink.is_some() {
                    debug!(track_id, "additional remote video track ignored");
                    return;
                }
                info!(track_id, "remote video track bound");
                self.remote_video_sink = Some(VideoSink::remote(self.events.clone(), track_id));
            }
            "audio" => {
                if self.remote_audio_sink.is_some() {
                    debug!(track_id, "additional remote audio track ignored");
                    return;
                }
                info!(track_id, "remote audio track bound");
                self.remote_audio_sink = Some(AudioSink::new());
            }
            other => debug!(kind = other, "unknown remote track kind ignored"),
        }
    }

    fn handle_remote_track_removed(&mut self, track_id: &str) {
        if self
            .remote_video_sink
            .as_ref()
            .is_some_and(|sink| sink.track_id() == Some(track_id))
        {
            info!(track_id, "remote video track removed");
            self.remote_video_sink = None;
            // The capture source exists for this session only; release
            // it when the remote side goes away.
            if let Some(source) = &mut self.device_source {
                source.stop();
            }
            self.device_source = None;
            if let Some(source) = &mut self.screen_source {
                source.stop();
            }
            self.screen_source = None;
        } else {
            self.remote_audio_sink = None;
        }
    }

    fn handle_channel_message(&mut self, msg: DataChannelMessage) {
        match ChannelMessage::from_engine(&msg) {
            ChannelMessage::Text(text) => {
                let _ = self.events.send(SessionEvent::TextMessage(text));
            }
            ChannelMessage::Binary(data) => {
                let _ = self.events.send(SessionEvent::BinaryMessage(Bytes::from(data)));
            }
        }
    }

    fn handle_connection_state(&mut self, state: RTCPeerConnectionState) {
        debug!(?state, "connection state changed");
        match state {
            RTCPeerConnectionState::Connected => self.state = SessionState::Connected,
            RTCPeerConnectionState::Failed | RTCPeerConnectionState::Disconnected => {
                let _ = self.events.send(SessionEvent::Error {
                    message: format!("connection {state}"),
                });
            }
            RTCPeerConnectionState::Closed => self.state = SessionState::Closed,
            _ => {}
        }
    }

    /// Names of the available capture devices, empty without a driver.
    pub fn enumerate_video_devices(&self) -> Vec<String> {
        self.capture_driver
            .as_ref()
            .map(|driver| driver.enumerate())
            .unwrap_or_default()
    }

    /// Open a named capture device through the installed driver.
    pub async fn open_video_capture_device(&mut self, name: &str) -> Result<()> {
        let driver = self
            .capture_driver
            .clone()
            .ok_or_else(|| Error::CaptureError("no capture driver installed".to_string()))?;
        let format = self.capture_format();
        let source = self
            .device_source
            .get_or_insert_with(|| DeviceSource::new(driver, format));
        source.open(name).await
    }

    /// Feed one packed frame into the transmit pipeline. Returns whether
    /// the frame was admitted. Admitted frames are also rendered to the
    /// local preview sink.
    pub fn push_frame(&mut self, packed: &[u8], layout: PixelLayout) -> Result<bool> {
        let source = self
            .push_source
            .as_mut()
            .ok_or_else(|| Error::CaptureError("session not initialized".to_string()))?;
        if !source.is_running() {
            let format = source.preferred_format();
            source.start(format)?;
        }
        let accepted = source.push_packed(packed, layout)?;
        if accepted {
            if let Some(sink) = &mut self.local_sink {
                sink.on_frame(source.frame());
            }
        }
        Ok(accepted)
    }

    /// Pump the screen source: take its latest buffered raw frame, if
    /// any, and push it. Returns whether a frame was admitted.
    pub fn capture_frame_and_push(&mut self) -> Result<bool> {
        let Some(raw) = self
            .screen_source
            .as_mut()
            .and_then(|source| source.capture_frame())
        else {
            return Ok(false);
        };
        if (raw.width, raw.height) != (self.config.width, self.config.height) {
            debug!(
                width = raw.width,
                height = raw.height,
                "captured frame geometry mismatch, skipped"
            );
            return Ok(false);
        }
        self.push_frame(&raw.data, PixelLayout::Bgra32)
    }

    /// Begin screen capture with the installed capturer.
    pub fn start_screen_capture(&mut self) -> Result<()> {
        let format = self.capture_format();
        let source = self
            .screen_source
            .as_mut()
            .ok_or_else(|| Error::CaptureError("no screen capturer installed".to_string()))?;
        source.start(format)
    }

    /// Entry point for externally-decoded remote frames.
    pub fn deliver_remote_frame(&mut self, frame: &VideoFrame) {
        match &mut self.remote_video_sink {
            Some(sink) => sink.on_frame(frame),
            None => debug!("no remote sink bound, frame dropped"),
        }
    }

    /// Take the receiving half of the transmit path. Admitted frames
    /// arrive here for the embedding encoder.
    pub fn take_frame_receiver(&mut self) -> Option<mpsc::UnboundedReceiver<VideoFrame>> {
        self.frame_rx.take()
    }

    /// Start an in-process STUN responder. Returns whether it came up.
    pub async fn start_stun_server(&mut self, bind_addr: &str) -> bool {
        match run_stun_server(bind_addr).await {
            Ok(server) => {
                self.stun_server = Some(server);
                true
            }
            Err(err) => {
                warn!(%err, bind_addr, "STUN server failed to start");
                false
            }
        }
    }

    /// Start an in-process TURN relay. Returns whether it came up.
    pub async fn start_turn_server(
        &mut self,
        bind_addr: &str,
        external_ip: &str,
        realm: &str,
        credential_file: &Path,
    ) -> bool {
        match run_turn_server(bind_addr, external_ip, realm, credential_file).await {
            Ok(server) => {
                self.turn_server = Some(server);
                true
            }
            Err(err) => {
                warn!(%err, bind_addr, "TURN server failed to start");
                false
            }
        }
    }

    /// Bound address of the running STUN responder, if any.
    pub fn stun_server_addr(&self) -> Option<SocketAddr> {
        self.stun_server.as_ref().map(|s| s.local_addr())
    }

    /// Relay address of the running TURN server, if any.
    pub fn turn_server_relay_ip(&self) -> Option<IpAddr> {
        self.turn_server.as_ref().map(|s| s.relay_ip())
    }

    /// Tear the session down. Safe to call repeatedly; the session
    /// returns to its pre-initialize state and may be initialized again.
    pub async fn teardown(&mut self) {
        self.local_sink = None;
        self.remote_video_sink = None;
        self.remote_audio_sink = None;

        if let Some(source) = &mut self.device_source {
            source.stop();
        }
        self.device_source = None;
        if let Some(source) = &mut self.screen_source {
            source.stop();
        }
        self.screen_source = None;
        self.push_source = None;
        self.frame_rx = None;

        if let Some(pc) = &self.peer_connection {
            for sender in self.senders.drain(..) {
                let _ = pc.remove_track(&sender).await;
            }
            let _ = pc.close().await;
        }
        self.peer_connection = None;

        if let Some(channel) = self.data_channel.take() {
            let _ = channel.close().await;
        }

        if let Some(server) = self.turn_server.take() {
            server.close().await;
        }
        self.stun_server = None;

        self.staged_servers.clear();
        self.committed_servers.clear();

        // Replace the engine queue wholesale: events queued before the
        // teardown, and ones the closing connection still emits through
        // its old sender clones, are orphaned instead of dispatched.
        let (engine_tx, engine_rx) = mpsc::unbounded_channel();
        self.engine_tx = engine_tx;
        self.engine_rx = engine_rx;

        self.state = SessionState::Uninitialized;
        info!("session torn down");
    }
}

/// Parse a session description by type string. Accepts "offer",
/// "answer", and "pranswer"; parsing validates the SDP body itself.
fn parse_session_description(sdp_type: &str, sdp: &str) -> Result<RTCSessionDescription> {
    let parsed = match sdp_type {
        "offer" => RTCSessionDescription::offer(sdp.to_string()),
        "answer" => RTCSessionDescription::answer(sdp.to_string()),
        "pranswer" => RTCSessionDescription::pranswer(sdp.to_string()),
        other => {
            return Err(Error::SdpError(format!(
                "unknown session description type: {other}"
            )))
        }
    };
    parsed.map_err(|err| Error::SdpError(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{FrameStore, ScreenInfo};

    struct FakeScreen;

    impl ScreenCapturer for FakeScreen {
        fn sources(&mut self) -> Vec<ScreenInfo> {
            vec![ScreenInfo {
                id: 1,
                title: "primary".to_string(),
            }]
        }

        fn select(&mut self, _id: u64) -> Result<()> {
            Ok(())
        }

        fn start(&mut self, _store: FrameStore) -> Result<()> {
            Ok(())
        }

        fn stop(&mut self) {}
    }

    fn loopback_config() -> ConductorConfig {
        ConductorConfig {
            include_loopback_candidates: true,
            ..Default::default()
        }
    }

    async fn initialized_conductor() -> (Conductor, mpsc::UnboundedReceiver<SessionEvent>) {
        let (mut conductor, events) = Conductor::new(loopback_config()).unwrap();
        conductor.initialize().await.unwrap();
        (conductor, events)
    }

    #[tokio::test]
    async fn test_initialize_transitions_state() {
        let (conductor, _events) = initialized_conductor().await;
        assert_eq!(conductor.state(), SessionState::Initialized);
    }

    #[tokio::test]
    async fn test_double_initialize_fails() {
        let (mut conductor, _events) = initialized_conductor().await;
        let err = conductor.initialize().await.unwrap_err();
        assert!(matches!(err, Error::SessionError(_)));
    }

    #[tokio::test]
    async fn test_server_descriptors_committed_once() {
        let (mut conductor, _events) = Conductor::new(loopback_config()).unwrap();
        conductor
            .add_server_descriptor(&IceServerConfig {
                uri: "stun:stun.example.org:3478".to_string(),
                username: String::new(),
                password: String::new(),
            })
            .unwrap();

        conductor.initialize().await.unwrap();
        assert_eq!(conductor.configured_servers().len(), 1);

        // The set is frozen now.
        let err = conductor
            .add_server_descriptor(&IceServerConfig {
                uri: "turn:turn.example.org:3478".to_string(),
                username: "u".to_string(),
                password: "p".to_string(),
            })
            .unwrap_err();
        assert!(matches!(err, Error::SessionError(_)));
        assert_eq!(conductor.configured_servers().len(), 1);
    }

    #[tokio::test]
    async fn test_bad_scheme_rejected() {
        let (mut conductor, _events) = Conductor::new(loopback_config()).unwrap();
        let err = conductor
            .add_server_descriptor(&IceServerConfig {
                uri: "http://example.org".to_string(),
                username: String::new(),
                password: String::new(),
            })
            .unwrap_err();
        assert!(err.is_config_error());
    }

    #[tokio::test]
    async fn test_create_offer_emits_signaling_event() {
        let (mut conductor, mut events) = initialized_conductor().await;
        conductor.create_offer().await.unwrap();
        assert_eq!(conductor.state(), SessionState::OfferCreated);

        let event = events.recv().await.unwrap();
        match event {
            SessionEvent::SignalingSuccess { sdp_type, sdp } => {
                assert_eq!(sdp_type, "offer");
                assert!(sdp.contains("m="));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_offer_reply_leaves_state() {
        let (mut conductor, _events) = initialized_conductor().await;
        conductor.create_offer().await.unwrap();

        let err = conductor
            .on_offer_reply("answer", "not an sdp body")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SdpError(_)));
        assert_eq!(conductor.state(), SessionState::OfferCreated);

        let err = conductor
            .on_offer_reply("bogus-type", "v=0")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SdpError(_)));
    }

    #[tokio::test]
    async fn test_malformed_candidate_rejected() {
        let (mut conductor, _events) = initialized_conductor().await;
        conductor.create_offer().await.unwrap();
        let accepted = conductor
            .add_ice_candidate("0", 0, "not a candidate line")
            .await
            .unwrap();
        assert!(!accepted);
        assert_eq!(conductor.state(), SessionState::OfferCreated);
    }

    #[tokio::test]
    async fn test_send_text_without_channel_is_noop() {
        let (conductor, _events) = initialized_conductor().await;
        conductor.send_text("hello").await;
        conductor.send_binary(&[1, 2, 3]).await;
    }

    #[tokio::test]
    async fn test_teardown_is_idempotent() {
        let (mut conductor, _events) = initialized_conductor().await;
        conductor.teardown().await;
        assert_eq!(conductor.state(), SessionState::Uninitialized);
        conductor.teardown().await;
        assert_eq!(conductor.state(), SessionState::Uninitialized);

        // Reusable after teardown.
        conductor.initialize().await.unwrap();
        assert_eq!(conductor.state(), SessionState::Initialized);
        conductor.teardown().await;
    }

    #[tokio::test]
    async fn test_events_queued_before_teardown_are_orphaned() {
        let (mut conductor, _events) = initialized_conductor().await;

        // Completions that raced the teardown sit in the queue.
        conductor
            .engine_tx
            .send(EngineEvent::ConnectionStateChanged(
                RTCPeerConnectionState::Connected,
            ))
            .unwrap();
        conductor
            .engine_tx
            .send(EngineEvent::RemoteTrackAdded {
                kind: "video".to_string(),
                track_id: "v0".to_string(),
            })
            .unwrap();

        conductor.teardown().await;
        conductor.process_events().await;

        assert_eq!(conductor.state(), SessionState::Uninitialized);
        assert!(conductor.remote_video_sink.is_none());

        // Still initializable after the late completions.
        conductor.initialize().await.unwrap();
        assert_eq!(conductor.state(), SessionState::Initialized);
        conductor.teardown().await;
    }

    #[tokio::test]
    async fn test_events_after_teardown_are_ignored() {
        let (mut conductor, _events) = initialized_conductor().await;
        conductor.teardown().await;

        conductor
            .engine_tx
            .send(EngineEvent::ConnectionStateChanged(
                RTCPeerConnectionState::Closed,
            ))
            .unwrap();
        conductor.process_events().await;
        assert_eq!(conductor.state(), SessionState::Uninitialized);
    }

    #[tokio::test]
    async fn test_geometry_fixed_after_initialize() {
        let (mut conductor, _events) = Conductor::new(loopback_config()).unwrap();
        conductor.set_capture_geometry(1280, 720, 30).unwrap();
        conductor.set_audio(true).unwrap();
        conductor.initialize().await.unwrap();

        assert!(conductor.set_capture_geometry(320, 240, 15).is_err());
        assert!(conductor.set_audio(false).is_err());
        conductor.teardown().await;
    }

    #[tokio::test]
    async fn test_push_frame_before_initialize_fails() {
        let (mut conductor, _events) = Conductor::new(loopback_config()).unwrap();
        let packed = vec![0u8; 640 * 360 * 4];
        assert!(conductor.push_frame(&packed, PixelLayout::Bgra32).is_err());
    }

    #[tokio::test]
    async fn test_push_frame_renders_local_preview() {
        let (mut conductor, mut events) = initialized_conductor().await;
        let packed = vec![128u8; 640 * 360 * 4];
        let accepted = conductor.push_frame(&packed, PixelLayout::Bgra32).unwrap();
        assert!(accepted);

        match events.recv().await.unwrap() {
            SessionEvent::LocalFrame { width, height, .. } => {
                assert_eq!((width, height), (640, 360));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        conductor.teardown().await;
    }

    #[tokio::test]
    async fn test_remote_track_bookkeeping() {
        let (mut conductor, _events) = initialized_conductor().await;

        conductor
            .handle_engine_event(EngineEvent::RemoteTrackAdded {
                kind: "video".to_string(),
                track_id: "v0".to_string(),
            })
            .await;
        assert!(conductor.remote_video_sink.is_some());

        // A second video track does not displace the first binding.
        conductor
            .handle_engine_event(EngineEvent::RemoteTrackAdded {
                kind: "video".to_string(),
                track_id: "v1".to_string(),
            })
            .await;
        assert_eq!(
            conductor.remote_video_sink.as_ref().unwrap().track_id(),
            Some("v0")
        );

        conductor
            .handle_engine_event(EngineEvent::RemoteTrackRemoved {
                track_id: "v0".to_string(),
            })
            .await;
        assert!(conductor.remote_video_sink.is_none());
        conductor.teardown().await;
    }

    #[tokio::test]
    async fn test_track_removal_releases_capture_sources() {
        let (conductor, _events) = Conductor::new(loopback_config()).unwrap();
        let mut conductor = conductor.with_screen_capturer(Box::new(FakeScreen));
        conductor.initialize().await.unwrap();
        assert!(conductor.screen_source.is_some());

        conductor
            .handle_engine_event(EngineEvent::RemoteTrackAdded {
                kind: "video".to_string(),
                track_id: "v0".to_string(),
            })
            .await;
        conductor
            .handle_engine_event(EngineEvent::RemoteTrackRemoved {
                track_id: "v0".to_string(),
            })
            .await;

        // No capture source survives the removal.
        assert!(conductor.screen_source.is_none());
        assert!(conductor.device_source.is_none());
        conductor.teardown().await;
    }

    #[tokio::test]
    async fn test_incoming_channel_supersedes_bound_one() {
        let (mut conductor, _events) = initialized_conductor().await;
        conductor.create_data_channel("data").await.unwrap();
        let first = conductor.data_channel.clone().unwrap();

        // A channel announced by the engine replaces the bound one.
        let (mut other, _other_events) = initialized_conductor().await;
        other.create_data_channel("replacement").await.unwrap();
        let incoming = other.data_channel.clone().unwrap();

        conductor
            .handle_engine_event(EngineEvent::DataChannelOpened(Arc::clone(&incoming)))
            .await;
        let bound = conductor.data_channel.clone().unwrap();
        assert_eq!(bound.label(), "replacement");
        assert_ne!(first.label(), bound.label());

        other.teardown().await;
        conductor.teardown().await;
    }

    #[tokio::test]
    async fn test_inbound_messages_classified_by_string_flag() {
        let (mut conductor, mut events) = initialized_conductor().await;

        conductor
            .handle_engine_event(EngineEvent::ChannelMessage(DataChannelMessage {
                is_string: true,
                data: Bytes::from_static(b"hello"),
            }))
            .await;
        assert!(matches!(
            events.recv().await.unwrap(),
            SessionEvent::TextMessage(text) if text == "hello"
        ));

        conductor
            .handle_engine_event(EngineEvent::ChannelMessage(DataChannelMessage {
                is_string: false,
                data: Bytes::from_static(&[9, 8, 7]),
            }))
            .await;
        assert!(matches!(
            events.recv().await.unwrap(),
            SessionEvent::BinaryMessage(data) if data.as_ref() == [9, 8, 7]
        ));
        conductor.teardown().await;
    }

    #[tokio::test]
    async fn test_deliver_remote_frame_reaches_sink() {
        let (mut conductor, mut events) = initialized_conductor().await;
        conductor
            .handle_engine_event(EngineEvent::RemoteTrackAdded {
                kind: "video".to_string(),
                track_id: "v0".to_string(),
            })
            .await;

        conductor.deliver_remote_frame(&VideoFrame::new(32, 32));
        match events.recv().await.unwrap() {
            SessionEvent::RemoteFrame { width, height, .. } => {
                assert_eq!((width, height), (32, 32));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        conductor.teardown().await;
    }
}
