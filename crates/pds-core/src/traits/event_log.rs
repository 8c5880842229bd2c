use async_trait::async_trait;

use crate::error::PdsResult;

/// A persisted firehose event row, as written by the Sequencer (§4.G).
#[derive(Debug, Clone)]
pub struct PersistedEvent {
    pub seq: i64,
    pub event_type: String,
    pub did: String,
    pub payload: Vec<u8>,
}

/// Durable storage backing the single-writer Sequencer. `append_event` is
/// the only mutation path and must assign `seq` and persist `payload`
/// atomically — a partial write here would violate the sequencer's
/// gap-free ordering guarantee (§5).
#[async_trait]
pub trait EventLogStore: Send + Sync + 'static {
    async fn append_event(&self, event_type: &str, did: &str, payload: &[u8]) -> PdsResult<i64>;

    /// Events with seq > after_seq, up to `limit`, in ascending order.
    async fn get_events_after(
        &self,
        after_seq: i64,
        limit: usize,
    ) -> PdsResult<Vec<PersistedEvent>>;

    /// The oldest seq still retained, for `OutdatedCursor` detection.
    async fn get_min_seq(&self) -> PdsResult<i64>;

    /// The maximum sequence number in the store (0 if empty).
    async fn get_max_seq(&self) -> PdsResult<i64>;

    /// Drop events older than the retention window, keeping the most
    /// recent `keep` rows.
    async fn trim(&self, keep: i64) -> PdsResult<()>;
}
