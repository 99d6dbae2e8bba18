//! Background sweep loop — fires due actions on a fixed tick.

use std::sync::Arc;

use crate::engine::ProcessEngine;

/// Spawn the sweep loop as a background tokio task. Each tick fires every
/// pending action whose trigger has passed, up to `batch_size` per tick.
pub async fn spawn_sweep(engine: Arc<ProcessEngine>, interval_secs: u64, batch_size: usize) {
    tracing::info!("⏰ Sweep started (check every {}s)", interval_secs);

    let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs));

    loop {
        interval.tick().await;

        match engine.sweep_once(batch_size).await {
            Ok(0) => {}
            Ok(n) => tracing::info!("📣 Sweep processed {} due action(s)", n),
            Err(e) => tracing::warn!("⚠️ Sweep pass failed: {}", e),
        }
    }
}
