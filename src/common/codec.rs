//! # Value Codecs
//!
//! A connection moves application values, not bytes. The [`Codec`] supplied at
//! construction turns a value into the payload of one frame and back. Both peers must use
//! compatible codecs; nothing on the wire identifies the encoding.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::marker::PhantomData;

use super::error::CodecError;

/// Strategy that converts application values to frame payloads and back.
///
/// `decode(encode(v))` must reconstruct a value equal to `v` for every value the
/// application sends.
pub trait Codec: Send + Sync + 'static {
    /// Application value carried by one frame
    type Item: Send + Sync + 'static;

    fn encode(&self, item: &Self::Item) -> Result<Vec<u8>, CodecError>;

    fn decode(&self, bytes: &[u8]) -> Result<Self::Item, CodecError>;
}

/// JSON encoding via serde, the same encoding CloudP2P-style message enums use on the wire.
pub struct JsonCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonCodec<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for JsonCodec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("JsonCodec")
    }
}

impl<T> Codec for JsonCodec<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    type Item = T;

    fn encode(&self, item: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(item).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }
}

/// Identity codec: the payload is the value.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesCodec;

impl Codec for BytesCodec {
    type Item = Vec<u8>;

    fn encode(&self, item: &Vec<u8>) -> Result<Vec<u8>, CodecError> {
        Ok(item.clone())
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(bytes.to_vec())
    }
}
