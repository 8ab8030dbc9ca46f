use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// The identity of a peer (a 'connection') on a signaling channel. It is assigned by the
///  transport when the peer joins, and it is stable for the peer's lifetime on the channel.
///
/// NB: Identities are compared for equality only. They are not a security feature, and nothing
///       in this crate relies on them being unguessable.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PeerId(Arc<str>);

impl PeerId {
    pub fn new(id: impl AsRef<str>) -> PeerId {
        PeerId(Arc::from(id.as_ref()))
    }

    const RANDOM_ID_LEN: usize = 16;

    /// a fresh random alphanumeric identity, for transports that assign ids themselves
    pub fn random() -> PeerId {
        let id = thread_rng()
            .sample_iter(&Alphanumeric)
            .take(Self::RANDOM_ID_LEN)
            .map(char::from)
            .collect::<String>();
        PeerId::new(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Debug for PeerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.0)
    }
}

impl Display for PeerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(value: &str) -> Self {
        PeerId::new(value)
    }
}

impl From<String> for PeerId {
    fn from(value: String) -> Self {
        PeerId(Arc::from(value))
    }
}

/// The addressee of a signal: either every peer on the channel, or a single peer.
///
/// On the wire and in configuration objects, broadcast is represented by the literal string
///  `"all"`, and a single peer by its id.
#[derive(Clone, Eq, PartialEq, Hash, Default)]
pub enum Recipient {
    #[default]
    All,
    Peer(PeerId),
}

impl Recipient {
    pub const ALL: &'static str = "all";

    pub fn peer(&self) -> Option<&PeerId> {
        match self {
            Recipient::All => None,
            Recipient::Peer(p) => Some(p),
        }
    }
}

impl Debug for Recipient {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Recipient::All => f.write_str(Self::ALL),
            Recipient::Peer(p) => write!(f, "{:?}", p),
        }
    }
}

impl From<PeerId> for Recipient {
    fn from(value: PeerId) -> Self {
        Recipient::Peer(value)
    }
}

impl From<&str> for Recipient {
    fn from(value: &str) -> Self {
        if value == Self::ALL {
            Recipient::All
        }
        else {
            Recipient::Peer(value.into())
        }
    }
}

impl Serialize for Recipient {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Recipient::All => serializer.serialize_str(Self::ALL),
            Recipient::Peer(p) => serializer.serialize_str(p.as_str()),
        }
    }
}

impl<'de> Deserialize<'de> for Recipient {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Recipient::from(s.as_str()))
    }
}

#[cfg(test)]
mod test {
    use rstest::rstest;
    use super::*;

    #[rstest]
    #[case::all("all", Recipient::All)]
    #[case::peer("abc", Recipient::Peer(PeerId::new("abc")))]
    #[case::all_is_case_sensitive("ALL", Recipient::Peer(PeerId::new("ALL")))]
    fn test_recipient_from_str(#[case] s: &str, #[case] expected: Recipient) {
        assert_eq!(Recipient::from(s), expected);
        let json = serde_json::to_string(&expected).unwrap();
        assert_eq!(json, format!("\"{}\"", s));
    }

    #[test]
    fn test_random_peer_ids_differ() {
        let a = PeerId::random();
        let b = PeerId::random();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 16);
        assert!(a.as_str().chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_debug() {
        assert_eq!(format!("{:?}", PeerId::new("x1")), "[x1]");
        assert_eq!(format!("{:?}", Recipient::All), "all");
        assert_eq!(format!("{:?}", Recipient::from("x1")), "[x1]");
    }
}
