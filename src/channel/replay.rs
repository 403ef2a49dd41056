//! Replay wiring: binds a replay store + listener to a channel so captured
//! failures are automatically reprocessed.

use std::sync::Arc;

use tracing::debug;

use super::Channel;
use crate::domain::Message;
use crate::listener::{ListenerConfig, StoreListener};
use crate::store::MessageStore;

/// Attach a replay listener to `channel` over `store`.
///
/// The listener's own retry count is forced to zero: retry is instead
/// performed at the service layer below, against the evolving [`Message`]
/// returned by each failed `replay` attempt, so that `skipDestinations`
/// keeps growing across attempts and already-succeeded destinations are
/// never re-invoked.
pub(super) fn wire(
    channel: Arc<Channel>,
    store: Arc<dyn MessageStore>,
    user_config: ListenerConfig,
    dead_letter_store: Option<Arc<dyn MessageStore>>,
) -> Arc<StoreListener> {
    let listener_config = ListenerConfig {
        max_retries: 0,
        ..user_config.clone()
    };
    let listener = Arc::new(StoreListener::new(store, listener_config));
    let service_max_retries = user_config.max_retries;
    let service_retry_interval = user_config.retry_interval;

    listener
        .attach_with_dlq(
            move |content| {
                let channel = Arc::clone(&channel);
                async move {
                    let mut message: Message =
                        serde_json::from_value(content).map_err(|e| e.to_string())?;
                    let mut attempt = 0u32;
                    loop {
                        match channel.replay(message.clone()).await {
                            Ok(_) => return Ok(()),
                            Err(err) => {
                                debug!(attempt, error = %err, "replay attempt failed");
                                if attempt >= service_max_retries {
                                    return Err(err.to_string());
                                }
                                if let Some(updated) = err.into_message() {
                                    message = updated;
                                }
                                attempt += 1;
                                tokio::time::sleep(service_retry_interval).await;
                            }
                        }
                    }
                }
            },
            dead_letter_store,
        )
        .expect("replay listener is freshly constructed and has no prior attachment");
    listener.start();
    listener
}
