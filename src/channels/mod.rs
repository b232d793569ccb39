//! Data channel helpers

pub mod messages;

pub use messages::{ChannelMessage, MAX_MESSAGE_SIZE};

use webrtc::data_channel::data_channel_init::RTCDataChannelInit;

/// Init dict for the session's control channel: unordered delivery with
/// at most one retransmission, so stale control traffic is dropped
/// instead of head-of-line blocking fresh traffic.
pub fn unreliable_channel_init() -> RTCDataChannelInit {
    RTCDataChannelInit {
        ordered: Some(false),
        max_retransmits: Some(1),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unreliable_channel_init() {
        let init = unreliable_channel_init();
        assert_eq!(init.ordered, Some(false));
        assert_eq!(init.max_retransmits, Some(1));
        assert!(init.negotiated.is_none());
    }
}
