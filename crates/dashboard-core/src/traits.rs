use async_trait::async_trait;
use crate::{RowQuery, StoreError};

/// A loosely typed row as the store returns it.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Read side of the row store consumed by the aggregation layer
#[async_trait]
pub trait RowStore: Send + Sync {
    async fn select(&self, query: &RowQuery) -> Result<Vec<Row>, StoreError>;
}
