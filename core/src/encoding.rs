use serde::{Serialize, de::DeserializeOwned};

pub fn serialize<T: Serialize>(value: &T) -> Result<Vec<u8>, bincode::error::EncodeError> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
}

pub fn deserialize<T: DeserializeOwned>(data: &[u8]) -> Result<T, bincode::error::DecodeError> {
    bincode::serde::decode_from_slice(data, bincode::config::standard()).map(|(value, _len)| value)
}
