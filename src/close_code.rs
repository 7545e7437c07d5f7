//! WebSocket close status codes (RFC 6455 §7.4) as surfaced in
//! [`ConnectionEvent::Closed`](crate::event::ConnectionEvent::Closed).
//!
//! Both transports report closure with one of these codes, so observers can
//! tell a clean shutdown from a dropped link without knowing which wire
//! protocol was active. Codes serialize as their plain numeric value.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Close status code attached to every closed notification.
///
/// Unknown or application-defined codes are preserved in
/// [`Other`](CloseCode::Other) so the numeric value always round-trips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u16", into = "u16")]
pub enum CloseCode {
    // Orderly shutdown
    Normal,
    GoingAway,

    // Peer misbehaviour
    ProtocolError,
    UnsupportedData,
    InvalidPayload,
    PolicyViolation,
    MessageTooBig,
    MandatoryExtension,

    // Reserved, never sent on the wire
    NoStatus,
    Abnormal,
    TlsHandshake,

    // Server conditions
    InternalError,
    ServiceRestart,
    TryAgainLater,
    BadGateway,

    /// Any code not listed above (including the 3000–4999 application range).
    Other(u16),
}

impl CloseCode {
    /// Returns the numeric status code.
    pub fn as_u16(self) -> u16 {
        u16::from(self)
    }

    /// Returns `true` when the code signals an orderly, intended shutdown.
    pub fn is_clean(self) -> bool {
        matches!(self, Self::Normal | Self::GoingAway)
    }

    /// Returns a human-readable description of this close code.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Normal => "The connection was closed normally.",
            Self::GoingAway => "The endpoint is going away (server shutdown or page navigation).",

            Self::ProtocolError => "The connection was closed because of a protocol error.",
            Self::UnsupportedData => "The endpoint received a data type it cannot accept.",
            Self::InvalidPayload => "A message contained data inconsistent with its type.",
            Self::PolicyViolation => "A message violated the endpoint's policy.",
            Self::MessageTooBig => "A message was too large for the endpoint to process.",
            Self::MandatoryExtension => "The server did not negotiate a required extension.",

            Self::NoStatus => "The connection closed without a status code.",
            Self::Abnormal => "The connection was lost without a close handshake.",
            Self::TlsHandshake => "The TLS handshake failed.",

            Self::InternalError => "The server hit an unexpected condition.",
            Self::ServiceRestart => "The server is restarting.",
            Self::TryAgainLater => "The server is overloaded. Try again later.",
            Self::BadGateway => "A gateway received an invalid response from upstream.",

            Self::Other(_) => "The connection was closed with an application-defined code.",
        }
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        match code {
            1000 => Self::Normal,
            1001 => Self::GoingAway,
            1002 => Self::ProtocolError,
            1003 => Self::UnsupportedData,
            1005 => Self::NoStatus,
            1006 => Self::Abnormal,
            1007 => Self::InvalidPayload,
            1008 => Self::PolicyViolation,
            1009 => Self::MessageTooBig,
            1010 => Self::MandatoryExtension,
            1011 => Self::InternalError,
            1012 => Self::ServiceRestart,
            1013 => Self::TryAgainLater,
            1014 => Self::BadGateway,
            1015 => Self::TlsHandshake,
            other => Self::Other(other),
        }
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        match code {
            CloseCode::Normal => 1000,
            CloseCode::GoingAway => 1001,
            CloseCode::ProtocolError => 1002,
            CloseCode::UnsupportedData => 1003,
            CloseCode::NoStatus => 1005,
            CloseCode::Abnormal => 1006,
            CloseCode::InvalidPayload => 1007,
            CloseCode::PolicyViolation => 1008,
            CloseCode::MessageTooBig => 1009,
            CloseCode::MandatoryExtension => 1010,
            CloseCode::InternalError => 1011,
            CloseCode::ServiceRestart => 1012,
            CloseCode::TryAgainLater => 1013,
            CloseCode::BadGateway => 1014,
            CloseCode::TlsHandshake => 1015,
            CloseCode::Other(other) => other,
        }
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.as_u16(), self.description())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_map_both_ways() {
        let named = [
            1000u16, 1001, 1002, 1003, 1005, 1006, 1007, 1008, 1009, 1010, 1011, 1012, 1013, 1014,
            1015,
        ];
        for code in named {
            let parsed = CloseCode::from(code);
            assert!(
                !matches!(parsed, CloseCode::Other(_)),
                "{code} should be a named code"
            );
            assert_eq!(parsed.as_u16(), code);
        }
    }

    #[test]
    fn application_codes_are_preserved() {
        let code = CloseCode::from(4001);
        assert_eq!(code, CloseCode::Other(4001));
        assert_eq!(code.as_u16(), 4001);
    }

    #[test]
    fn serializes_as_number() {
        assert_eq!(serde_json::to_string(&CloseCode::Abnormal).unwrap(), "1006");
        let parsed: CloseCode = serde_json::from_str("1000").unwrap();
        assert_eq!(parsed, CloseCode::Normal);
    }

    #[test]
    fn clean_codes() {
        assert!(CloseCode::Normal.is_clean());
        assert!(CloseCode::GoingAway.is_clean());
        assert!(!CloseCode::Abnormal.is_clean());
        assert!(!CloseCode::Other(4000).is_clean());
    }

    #[test]
    fn display_includes_number() {
        assert!(CloseCode::Abnormal.to_string().starts_with("1006 ("));
    }
}
