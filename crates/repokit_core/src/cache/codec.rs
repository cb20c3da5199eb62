//! Payload encoding for cached result sets.

use crate::error::RepoResult;
use serde::de::DeserializeOwned;
use serde::Serialize;

pub trait PayloadCodec: Send + Sync + 'static {
    fn encode<V: Serialize>(&self, value: &V) -> RepoResult<Vec<u8>>;

    fn decode<V: DeserializeOwned>(&self, payload: &[u8]) -> RepoResult<V>;
}

/// `serde_json` encoding; keeps nulls and nested included entities.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl PayloadCodec for JsonCodec {
    fn encode<V: Serialize>(&self, value: &V) -> RepoResult<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode<V: DeserializeOwned>(&self, payload: &[u8]) -> RepoResult<V> {
        Ok(serde_json::from_slice(payload)?)
    }
}
