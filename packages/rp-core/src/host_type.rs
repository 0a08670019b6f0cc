//! The PS4/PS5 console-generation split referenced throughout discovery,
//! registration, and session establishment (spec.md §9 open question: "the
//! TCP-vs-UDP split of the control channel differs between PS4 and PS5...
//! preserve per-host-type branches").

use serde::{Deserialize, Serialize};

/// Which console generation a peer is. Every per-host-type constant
/// (vendor key tables, RP-Version header, key1 offset) branches on this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HostType {
    Ps4,
    Ps5,
}

impl HostType {
    /// Parses the `host-type` token from a DDP reply or a persisted
    /// credential record.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "PS4" => Some(Self::Ps4),
            "PS5" => Some(Self::Ps5),
            _ => None,
        }
    }

    /// `host-type` wire token.
    #[must_use]
    pub fn as_wire_str(self) -> &'static str {
        match self {
            Self::Ps4 => "PS4",
            Self::Ps5 => "PS5",
        }
    }

    /// Registration/session HTTP path prefix (`/sie/ps4/...` vs `/sie/ps5/...`).
    #[must_use]
    pub fn path_segment(self) -> &'static str {
        match self {
            Self::Ps4 => "ps4",
            Self::Ps5 => "ps5",
        }
    }

    /// `RP-Version` header value sent with the registration request (§4.2 step 6).
    #[must_use]
    pub fn rp_version(self) -> &'static str {
        match self {
            Self::Ps4 => "10.0",
            Self::Ps5 => "1.0",
        }
    }
}

impl std::fmt::Display for HostType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_wire_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trips() {
        assert_eq!(HostType::parse("PS4"), Some(HostType::Ps4));
        assert_eq!(HostType::parse("PS5"), Some(HostType::Ps5));
        assert_eq!(HostType::parse("PS3"), None);
    }

    #[test]
    fn per_host_constants_differ() {
        assert_ne!(HostType::Ps4.rp_version(), HostType::Ps5.rp_version());
        assert_ne!(HostType::Ps4.path_segment(), HostType::Ps5.path_segment());
    }
}
