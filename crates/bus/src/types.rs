use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One delivered bus record, with the metadata a consumer needs to ack it.
///
/// `offset` plays the role of a receipt handle, scoped to (topic, partition)
/// instead of a single queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusRecord {
    pub topic: String,
    pub partition: usize,
    pub offset: u64,
    pub key: String,
    pub payload: Vec<u8>,
    pub published_at: DateTime<Utc>,
    pub attempt_count: u32,
}

impl BusRecord {
    pub fn decode_json<T: for<'de> Deserialize<'de>>(&self) -> Result<T, crate::error::BusError> {
        serde_json::from_slice(&self.payload)
            .map_err(|e| crate::error::BusError::Decode(e.to_string()))
    }
}
