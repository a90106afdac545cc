//! Hex (de)serialization for byte fields in persisted records.

use serde::{Deserialize, Deserializer, Serializer, de::Error};

/// Serialize bytes as a lowercase hex string.
pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
where
    T: AsRef<[u8]>,
    S: Serializer,
{
    serializer.serialize_str(&hex::encode(value.as_ref()))
}

/// Deserialize a hex string into a byte container of the right length.
pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
where
    T: TryFrom<Vec<u8>>,
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    let bytes = hex::decode(&text).map_err(D::Error::custom)?;
    let len = bytes.len();
    T::try_from(bytes).map_err(|_| D::Error::custom(format!("unexpected byte length {len}")))
}

/// Same as the parent module for `Option` fields.
pub mod option {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    /// Serialize `Some(bytes)` as hex, `None` as null.
    pub fn serialize<T, S>(value: &Option<T>, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: AsRef<[u8]>,
        S: Serializer,
    {
        match value {
            Some(bytes) => serializer.serialize_some(&hex::encode(bytes.as_ref())),
            None => serializer.serialize_none(),
        }
    }

    /// Deserialize an optional hex string.
    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
    where
        T: TryFrom<Vec<u8>>,
        D: Deserializer<'de>,
    {
        let Some(text) = Option::<String>::deserialize(deserializer)? else {
            return Ok(None);
        };
        let bytes = hex::decode(&text).map_err(D::Error::custom)?;
        let len = bytes.len();
        T::try_from(bytes)
            .map(Some)
            .map_err(|_| D::Error::custom(format!("unexpected byte length {len}")))
    }
}
