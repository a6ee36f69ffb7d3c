use std::sync::Arc;

use sqlx::SqlitePool;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use typerace_core::protocol::RaceSummary;

use crate::db;

/// Subscribe the downstream consumers of race summaries, one task each.
pub fn spawn_listeners(
    results_tx: &broadcast::Sender<Arc<RaceSummary>>,
    pool: SqlitePool,
    webhook_url: Option<String>,
) {
    let mut rx = results_tx.subscribe();
    tokio::spawn(async move {
        while let Some(summary) = next_summary(&mut rx, "race log").await {
            match db::record_race(&pool, &summary).await {
                Ok(race_id) => info!(
                    race_id,
                    room_id = %summary.room_id,
                    race_number = summary.race_number,
                    racers = summary.results.len(),
                    "race recorded"
                ),
                Err(err) => warn!(room_id = %summary.room_id, %err, "failed to record race"),
            }
        }
    });

    if let Some(url) = webhook_url {
        let mut rx = results_tx.subscribe();
        let client = reqwest::Client::new();
        tokio::spawn(async move {
            while let Some(summary) = next_summary(&mut rx, "webhook").await {
                post_summary(&client, &url, &summary).await;
            }
        });
    }
}

async fn post_summary(client: &reqwest::Client, url: &str, summary: &RaceSummary) {
    let result = client
        .post(url)
        .json(summary)
        .send()
        .await
        .and_then(|resp| resp.error_for_status());
    if let Err(err) = result {
        warn!(room_id = %summary.room_id, %err, "webhook delivery failed");
    }
}

/// Next summary, skipping over any the listener fell behind on.
/// `None` once the channel is closed.
async fn next_summary(
    rx: &mut broadcast::Receiver<Arc<RaceSummary>>,
    listener: &'static str,
) -> Option<Arc<RaceSummary>> {
    loop {
        match rx.recv().await {
            Ok(summary) => return Some(summary),
            Err(RecvError::Lagged(skipped)) => {
                warn!(listener, skipped, "listener lagged, summaries dropped");
            }
            Err(RecvError::Closed) => return None,
        }
    }
}
