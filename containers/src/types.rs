use hex::FromHex;
use serde::{de::Error as SerdeError, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Block height. Bitcoin heights comfortably fit in 32 bits.
pub type Height = u32;

macro_rules! hash32 {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name(pub [u8; 32]);

        impl $name {
            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            /// Last four bytes of the value.
            pub fn truncated(&self) -> TruncatedHash {
                let mut bytes = [0u8; 4];
                bytes.copy_from_slice(&self.0[28..]);
                TruncatedHash(bytes)
            }
        }

        impl FromStr for $name {
            type Err = hex::FromHexError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let bytes = <[u8; 32]>::from_hex(s.trim_start_matches("0x"))?;
                Ok($name(bytes))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", hex::encode(self.0))
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let value = String::deserialize(deserializer)?;
                value
                    .parse()
                    .map_err(|err| SerdeError::custom(format!("invalid hash {value:?}: {err}")))
            }
        }
    };
}

hash32!(
    /// Block hash in the byte order used by the node RPC (display order).
    BlockHash
);

hash32!(
    /// Transaction id in display order.
    TxId
);

/// Last 4 bytes of a block hash. Enough to check that two ledger entries
/// connect without storing full hashes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TruncatedHash(pub [u8; 4]);

impl fmt::Display for TruncatedHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}
