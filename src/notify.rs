// ABOUTME: Tool-change signal fanned out to connected MCP clients
// ABOUTME: Gateway SSE streams subscribe and emit notifications/tools/list_changed frames

use tokio::sync::broadcast;

/// Broadcasts a unit signal whenever the set of exposed tools may have
/// changed (server start/stop, tool create/update/delete, approval
/// changes). Receivers that lag simply miss intermediate signals; the
/// notification is idempotent.
#[derive(Clone)]
pub struct ToolChangeNotifier {
    sender: broadcast::Sender<()>,
}

impl Default for ToolChangeNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolChangeNotifier {
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(16);
        Self { sender }
    }

    /// Signal connected clients that their tool list is stale.
    pub fn notify(&self) {
        let receivers = self.sender.send(()).unwrap_or(0);
        tracing::debug!(receivers, "tool change signal sent");
    }

    /// Subscribe; used by each gateway SSE stream.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.sender.subscribe()
    }
}
