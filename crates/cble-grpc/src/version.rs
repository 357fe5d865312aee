// ABOUTME: Protocol version negotiation performed on every handshake call.
// ABOUTME: Only the major component of a version string decides compatibility.

use thiserror::Error;

/// Protocol version spoken by this build of the broker and provider SDK.
pub const PROTOCOL_VERSION: &str = concat!("v", env!("CARGO_PKG_VERSION"));

/// Handshake rejected because the major versions differ.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("major version mismatch: server version is {server} and client version is {client}")]
pub struct VersionMismatch {
    pub server: String,
    pub client: String,
}

impl From<VersionMismatch> for tonic::Status {
    fn from(err: VersionMismatch) -> Self {
        tonic::Status::failed_precondition(err.to_string())
    }
}

/// Extract the major component of a version string.
///
/// Leading non-numeric characters (such as a `v` prefix) are skipped; the
/// major is the run of digits that follows. Returns `None` when there is no
/// such run or it does not fit in a `u64`.
pub fn major_version(version: &str) -> Option<u64> {
    let rest = version
        .trim()
        .trim_start_matches(|c: char| !c.is_ascii_digit());
    let end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    rest[..end].parse().ok()
}

/// Stateless comparison of a client's protocol version against our own.
#[derive(Debug, Clone)]
pub struct VersionNegotiator {
    server_version: String,
    server_major: Option<u64>,
}

impl VersionNegotiator {
    /// Create a negotiator for the given server version.
    pub fn new(server_version: impl Into<String>) -> Self {
        let server_version = server_version.into();
        let server_major = major_version(&server_version);
        Self {
            server_version,
            server_major,
        }
    }

    /// The full server version string returned on success.
    pub fn server_version(&self) -> &str {
        &self.server_version
    }

    /// Accept the client if its major version matches ours.
    ///
    /// A version with no numeric major never matches, even against another
    /// unparseable version.
    pub fn negotiate(&self, client_version: &str) -> Result<&str, VersionMismatch> {
        match (self.server_major, major_version(client_version)) {
            (Some(server), Some(client)) if server == client => {
                tracing::debug!(client_version = %client_version, "Client connected");
                Ok(&self.server_version)
            }
            _ => {
                tracing::warn!(
                    server_version = %self.server_version,
                    client_version = %client_version,
                    "Rejected handshake"
                );
                Err(VersionMismatch {
                    server: self.server_version.clone(),
                    client: client_version.to_string(),
                })
            }
        }
    }
}

impl Default for VersionNegotiator {
    fn default() -> Self {
        Self::new(PROTOCOL_VERSION)
    }
}
