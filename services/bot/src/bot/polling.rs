//! services/bot/src/bot/polling.rs
//!
//! Long-polling intake: fetches updates with `getUpdates` and hands them to the
//! dispatcher until shutdown is requested.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapters::telegram::TelegramClient;
use crate::bot::dispatcher::Dispatcher;
use crate::bot::protocol::inbound_event;

const ERROR_PAUSE: Duration = Duration::from_secs(5);

pub async fn run(client: Arc<TelegramClient>, dispatcher: Dispatcher, shutdown: CancellationToken) {
    if let Err(e) = client.delete_webhook().await {
        warn!("Could not remove a previously set webhook: {}", e);
    }
    info!("Long polling started");

    let mut offset = 0;
    loop {
        let batch = tokio::select! {
            _ = shutdown.cancelled() => break,
            batch = client.get_updates(offset) => batch,
        };

        match batch {
            Ok(updates) => {
                for update in updates {
                    offset = offset.max(update.update_id + 1);
                    match inbound_event(update) {
                        Some(event) => dispatcher.dispatch(event),
                        None => debug!("Ignoring update"),
                    }
                }
            }
            Err(e) => {
                warn!("getUpdates failed: {}", e);
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(ERROR_PAUSE) => {}
                }
            }
        }
    }
    info!("Long polling stopped");
}
