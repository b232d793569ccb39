//! Minimal STUN binding responder
//!
//! Answers BINDING requests with the sender's reflexive address and
//! ignores everything else. Runs on a single UDP socket until dropped.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use webrtc::stun::attributes::ATTR_SOFTWARE;
use webrtc::stun::message::{Message, BINDING_REQUEST, BINDING_SUCCESS};
use webrtc::stun::textattrs::TextAttribute;
use webrtc::stun::xoraddr::XorMappedAddress;

use crate::{Error, Result};

use super::SOFTWARE;

/// A running STUN binding responder.
pub struct StunServer {
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

/// Bind a UDP socket and start answering binding requests on it.
pub async fn run_stun_server(bind_addr: &str) -> Result<StunServer> {
    let addr: SocketAddr = bind_addr
        .parse()
        .map_err(|_| Error::RelayError(format!("invalid STUN bind address: {bind_addr}")))?;
    let socket = UdpSocket::bind(addr).await?;
    let local_addr = socket.local_addr()?;

    let task = tokio::spawn(serve(Arc::new(socket)));
    info!(%local_addr, "STUN server listening");
    Ok(StunServer { local_addr, task })
}

async fn serve(socket: Arc<UdpSocket>) {
    let software = TextAttribute {
        attr: ATTR_SOFTWARE,
        text: SOFTWARE.to_owned(),
    };
    let mut buf = vec![0u8; 1500];

    loop {
        let (n, src) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(_) => return,
        };

        let mut request = Message::new();
        request.raw = buf[..n].to_vec();
        if request.decode().is_err() {
            debug!(%src, "dropping undecodable packet");
            continue;
        }
        if request.typ != BINDING_REQUEST {
            debug!(%src, typ = %request.typ, "ignoring non-binding message");
            continue;
        }

        let mut reply = Message::new();
        let built = reply.build(&[
            Box::new(request.transaction_id),
            Box::new(BINDING_SUCCESS),
            Box::new(XorMappedAddress {
                ip: src.ip(),
                port: src.port(),
            }),
            Box::new(software.clone()),
        ]);
        if built.is_err() {
            continue;
        }
        let _ = socket.send_to(&reply.raw, src).await;
    }
}

impl StunServer {
    /// Address the responder is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Drop for StunServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}
