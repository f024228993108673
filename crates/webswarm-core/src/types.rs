use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Length in bytes of every key type in the swarm.
pub const KEY_LEN: usize = 32;

macro_rules! key32 {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name([u8; KEY_LEN]);

        impl $name {
            pub const fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
                Self(bytes)
            }

            /// A fresh random value.
            pub fn random() -> Self {
                Self(rand::random::<[u8; KEY_LEN]>())
            }

            pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
                &self.0
            }

            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            /// Short hex prefix for log lines.
            pub fn short(&self) -> String {
                hex::encode(&self.0[..4])
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_hex())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.short())
            }
        }

        impl FromStr for $name {
            type Err = crate::WebswarmError;

            fn from_str(s: &str) -> crate::Result<Self> {
                let bytes = hex::decode(s).map_err(|e| {
                    crate::WebswarmError::InvalidKey(format!("{}: {e}", stringify!($name)))
                })?;
                Self::try_from(bytes.as_slice())
            }
        }

        impl TryFrom<&[u8]> for $name {
            type Error = crate::WebswarmError;

            fn try_from(bytes: &[u8]) -> crate::Result<Self> {
                let arr: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
                    crate::WebswarmError::InvalidKey(format!(
                        "{} must be {KEY_LEN} bytes, got {}",
                        stringify!($name),
                        bytes.len()
                    ))
                })?;
                Ok(Self(arr))
            }
        }

        impl From<[u8; KEY_LEN]> for $name {
            fn from(bytes: [u8; KEY_LEN]) -> Self {
                Self(bytes)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

key32! {
    /// Identity of a participant process. One per swarm, stable for its lifetime.
    Identity
}

key32! {
    /// Topic under which peers discover each other and connect.
    ChannelId
}

key32! {
    /// Minted by the initiator of a connection attempt. Used to correlate the
    /// offer/answer exchange and as a tie-breaker between racing attempts.
    ConnectionId
}

impl ChannelId {
    /// Derive a channel from a human-readable topic name.
    ///
    /// The name is zero-padded (or truncated) to 32 bytes so the same name
    /// always maps to the same channel on every process.
    pub fn from_name(name: &str) -> Self {
        let mut bytes = [0u8; KEY_LEN];
        let src = name.as_bytes();
        let n = src.len().min(KEY_LEN);
        bytes[..n].copy_from_slice(&src[..n]);
        Self(bytes)
    }
}

/// Identifier for one in-flight signaling transaction.
pub type TransactionId = String;

/// Mint a random transaction id (12 random bytes, hex encoded).
pub fn new_transaction_id() -> TransactionId {
    hex::encode(rand::random::<[u8; 12]>())
}
