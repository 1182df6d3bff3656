//! Pluggable payload codec
//!
//! The engine stores payloads as opaque blobs; serialization happens at the
//! publish edge and deserialization at the consume edge, through a
//! caller-supplied codec.

use crate::error::{EventingError, Result};
use serde::{de::DeserializeOwned, Serialize};

/// Payload codec contract
pub trait PayloadCodec: Send + Sync {
    /// Serialize a payload into an opaque blob
    fn serialize<T: Serialize>(&self, payload: &T) -> Result<Vec<u8>>;

    /// Deserialize a blob into the requested shape
    fn deserialize<T: DeserializeOwned>(&self, blob: &[u8]) -> Result<T>;
}

/// Default JSON codec
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl PayloadCodec for JsonCodec {
    fn serialize<T: Serialize>(&self, payload: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(payload).map_err(|e| EventingError::Serialization(e.to_string()))
    }

    fn deserialize<T: DeserializeOwned>(&self, blob: &[u8]) -> Result<T> {
        serde_json::from_slice(blob).map_err(|e| EventingError::Deserialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Payment {
        customer: String,
        amount: u32,
    }

    #[test]
    fn test_json_round_trip() {
        let codec = JsonCodec;
        let payment = Payment {
            customer: "Robert".to_string(),
            amount: 40,
        };

        let blob = codec.serialize(&payment).unwrap();
        let decoded: Payment = codec.deserialize(&blob).unwrap();
        assert_eq!(decoded, payment);
    }

    #[test]
    fn test_incompatible_shape_is_deserialization_error() {
        let codec = JsonCodec;
        let blob = codec.serialize(&"just a string").unwrap();

        let err = codec.deserialize::<Payment>(&blob).unwrap_err();
        assert_eq!(err.error_code(), "DESERIALIZATION_ERROR");
    }
}
