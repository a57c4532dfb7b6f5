// ABOUTME: Activity observability: batched logger and live-stream fan-out
// ABOUTME: The logger feeds the stream registry through a registered listener

pub mod logger;
pub mod stream;

pub use logger::{sanitize_params, ActivityLogger, LogListener, LogParams};
pub use stream::{StreamConnection, StreamFilters, StreamRegistry};

use std::sync::Arc;

/// Wire the stream registry into the logger so every new entry is offered
/// to connected live-stream consumers.
pub fn register_stream_listener(logger: &ActivityLogger, registry: Arc<StreamRegistry>) {
    logger.add_listener(Arc::new(move |entry| {
        let registry = Arc::clone(&registry);
        Box::pin(async move {
            registry.broadcast(&entry).await;
        })
    }));
}
