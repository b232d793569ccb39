//! TURN credential store
//!
//! Long-term credentials are loaded from a flat file of
//! `username=hexkey` lines, where the key is the 16-byte MD5 HA1 of
//! `username:realm:password`, hex encoded. The first `=` delimits; no
//! escaping, no comment syntax. Lines without a separator are skipped
//! with a warning; a malformed key aborts the load.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;

use tracing::{debug, warn};
use webrtc::turn::auth::AuthHandler;

use crate::{Error, Result};

/// Length of one stored authentication key (MD5 HA1)
pub const SECRET_LEN: usize = 16;

/// In-memory map of TURN usernames to their authentication keys.
#[derive(Debug, Default)]
pub struct CredentialStore {
    keys: HashMap<String, Vec<u8>>,
}

impl CredentialStore {
    /// Load credentials from a file. Fails on I/O errors and on keys
    /// that are not exactly 16 hex-encoded bytes.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let mut keys = HashMap::new();

        for (lineno, line) in text.lines().enumerate() {
            if line.is_empty() {
                continue;
            }
            let Some((username, hex_key)) = line.split_once('=') else {
                warn!(lineno = lineno + 1, "credential line without separator skipped");
                continue;
            };
            let key = hex::decode(hex_key).map_err(|err| {
                Error::RelayError(format!("bad credential key on line {}: {err}", lineno + 1))
            })?;
            if key.len() != SECRET_LEN {
                return Err(Error::RelayError(format!(
                    "credential key on line {} is {} bytes, expected {SECRET_LEN}",
                    lineno + 1,
                    key.len()
                )));
            }
            keys.insert(username.to_string(), key);
        }

        debug!(users = keys.len(), "credential store loaded");
        Ok(Self { keys })
    }

    /// Look up the stored key for a username.
    pub fn key_for(&self, username: &str) -> Option<&[u8]> {
        self.keys.get(username).map(Vec::as_slice)
    }

    /// Number of loaded users.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the store holds no users.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl AuthHandler for CredentialStore {
    fn auth_handle(
        &self,
        username: &str,
        _realm: &str,
        src_addr: SocketAddr,
    ) -> std::result::Result<Vec<u8>, webrtc::turn::Error> {
        match self.keys.get(username) {
            Some(key) => Ok(key.clone()),
            None => {
                warn!(username, %src_addr, "auth rejected for unknown user");
                Err(webrtc::turn::Error::Other(format!(
                    "no credentials for user {username}"
                )))
            }
        }
    }
}
