/// Broadcast shutdown signal shared by every long-running task.
#[derive(Debug)]
pub struct Shutdown(
    tokio::sync::broadcast::Sender<()>,
    tokio::sync::broadcast::Receiver<()>,
);

impl Shutdown {
    pub fn new() -> Self {
        let (tx, rx) = tokio::sync::broadcast::channel(1);
        Shutdown(tx, rx)
    }

    pub fn shutdown(&self) {
        // no receivers left means everyone is already gone
        let _ = self.0.send(());
    }

    pub async fn wait(&mut self) {
        let _ = self.1.recv().await;
    }

    pub fn sender(&self) -> tokio::sync::broadcast::Sender<()> {
        self.0.clone()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Shutdown {
    fn clone(&self) -> Self {
        Shutdown(self.0.clone(), self.0.subscribe())
    }
}

/// Wall clock in milliseconds since the unix epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
