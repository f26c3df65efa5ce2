//! Transport framing and protocol encoding kinds.

use serde::{Deserialize, Serialize};

/// Transport framing used on a connection leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportType {
    Framed,
    Unframed,
    Header,
    /// Detected from the first bytes on the downstream leg. Never valid for
    /// an upstream leg.
    Auto,
}

/// Message encoding used on a connection leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolType {
    Binary,
    LaxBinary,
    Compact,
    /// Legacy protocol that negotiates a connection-level upgrade before the
    /// first call. Never eligible for passthrough.
    Twitter,
    Auto,
}

impl TransportType {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Framed => "framed",
            Self::Unframed => "unframed",
            Self::Header => "header",
            Self::Auto => "auto",
        }
    }
}

impl ProtocolType {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Binary => "binary",
            Self::LaxBinary => "binary/non-strict",
            Self::Compact => "compact",
            Self::Twitter => "twitter",
            Self::Auto => "auto",
        }
    }

    /// Whether calls on this protocol require a connection upgrade handshake.
    #[must_use]
    pub fn supports_upgrade(self) -> bool {
        matches!(self, Self::Twitter)
    }
}

/// Returns `true` when the message body can be copied verbatim from the
/// downstream leg to the upstream leg.
///
/// Both legs must be framed and speak the same protocol, and the protocol
/// must not be `Twitter`.
#[must_use]
pub fn passthrough_supported(
    downstream_transport: TransportType,
    downstream_protocol: ProtocolType,
    upstream_transport: TransportType,
    upstream_protocol: ProtocolType,
) -> bool {
    downstream_transport == TransportType::Framed
        && upstream_transport == TransportType::Framed
        && downstream_protocol == upstream_protocol
        && upstream_protocol != ProtocolType::Twitter
}
