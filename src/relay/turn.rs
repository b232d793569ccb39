//! TURN relay bootstrap

use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tracing::info;

use webrtc::turn::relay::relay_static::RelayAddressGeneratorStatic;
use webrtc::turn::server::config::{ConnConfig, ServerConfig};
use webrtc::turn::server::Server;
use webrtc::util::vnet::net::Net;

use crate::{Error, Result};

use super::auth::CredentialStore;

/// A running TURN relay.
pub struct TurnServer {
    server: Server,
    local_addr: SocketAddr,
    relay_ip: IpAddr,
    realm: String,
}

impl std::fmt::Debug for TurnServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnServer")
            .field("local_addr", &self.local_addr)
            .field("relay_ip", &self.relay_ip)
            .field("realm", &self.realm)
            .finish_non_exhaustive()
    }
}

/// Start a TURN relay on `bind_addr`, advertising `external_ip` as the
/// relay address and authenticating users from `credential_file`.
///
/// Credentials are loaded before the socket binds, so a bad file leaves
/// the port free for a retry.
pub async fn run_turn_server(
    bind_addr: &str,
    external_ip: &str,
    realm: &str,
    credential_file: &Path,
) -> Result<TurnServer> {
    let bind: SocketAddr = bind_addr
        .parse()
        .map_err(|_| Error::RelayError(format!("invalid TURN bind address: {bind_addr}")))?;
    let relay_ip: IpAddr = external_ip
        .parse()
        .map_err(|_| Error::RelayError(format!("invalid external IP: {external_ip}")))?;
    let store = CredentialStore::load(credential_file)?;

    let socket = UdpSocket::bind(bind).await?;
    let local_addr = socket.local_addr()?;

    let server = Server::new(ServerConfig {
        conn_configs: vec![ConnConfig {
            conn: Arc::new(socket),
            relay_addr_generator: Box::new(RelayAddressGeneratorStatic {
                relay_address: relay_ip,
                address: "0.0.0.0".to_owned(),
                net: Arc::new(Net::new(None)),
            }),
        }],
        realm: realm.to_owned(),
        auth_handler: Arc::new(store),
        channel_bind_timeout: Duration::from_secs(0),
        alloc_close_notify: None,
    })
    .await
    .map_err(|err| Error::RelayError(err.to_string()))?;

    info!(%local_addr, %relay_ip, realm, "TURN server listening");
    Ok(TurnServer {
        server,
        local_addr,
        relay_ip,
        realm: realm.to_owned(),
    })
}

impl TurnServer {
    /// Address the relay is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Advertised relay address.
    pub fn relay_ip(&self) -> IpAddr {
        self.relay_ip
    }

    /// Authentication realm.
    pub fn realm(&self) -> &str {
        &self.realm
    }

    /// Shut the relay down, releasing its socket.
    pub async fn close(self) {
        let _ = self.server.close().await;
    }
}
