use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::store::{Store, StoreError};

/// Compact `store` if its log has grown by at least `threshold` events since the last
/// compaction. Returns whether it compacted.
pub fn maybe_compact(store: &Store, threshold: u64) -> Result<bool, StoreError> {
    let appends = store.appends_since_compact();
    if appends < threshold {
        return Ok(false);
    }
    store.compact()?;
    info!("WAL compacted after {appends} appends");
    Ok(true)
}

/// Background task that periodically checks if WAL compaction is needed.
pub async fn run_compactor(store: Arc<Store>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let store = store.clone();
        let result = tokio::task::spawn_blocking(move || maybe_compact(&store, threshold)).await;
        match result {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => error!("WAL compaction failed: {e}"),
            Err(e) => error!("WAL compaction task panicked: {e}"),
        }
    }
}
