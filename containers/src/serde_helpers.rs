// Serde helpers for hex-encoded byte fields, matching how the node RPC
// reports witness items and OP_RETURN payloads.

use serde::{de::Error as SerdeError, Deserialize, Deserializer, Serializer};

/// `Vec<Vec<u8>>` as a list of hex strings (witness stacks).
pub mod hex_bytes_list {
    use super::*;
    use serde::ser::SerializeSeq;

    pub fn serialize<S>(value: &[Vec<u8>], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut seq = serializer.serialize_seq(Some(value.len()))?;
        for item in value {
            seq.serialize_element(&hex::encode(item))?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let values = Vec::<String>::deserialize(deserializer)?;
        values
            .iter()
            .map(|value| {
                hex::decode(value).map_err(|err| SerdeError::custom(format!("invalid hex: {err}")))
            })
            .collect()
    }
}

/// `Option<Vec<u8>>` as an optional hex string.
pub mod hex_bytes_opt {
    use super::*;

    pub fn serialize<S>(value: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(bytes) => serializer.serialize_some(&hex::encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<String>::deserialize(deserializer)?
            .map(|value| {
                hex::decode(value).map_err(|err| SerdeError::custom(format!("invalid hex: {err}")))
            })
            .transpose()
    }
}
