use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use wsmux_core::protocol::InboundMessage;
use wsmux_core::ChannelKey;

use crate::state::{ConnectionStatus, StateStore};

/// Owns a driver task. Dropping the handle cancels and aborts the task, which
/// takes its heartbeat and reconnect timers with it.
pub(crate) struct DriverHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl DriverHandle {
    pub(crate) fn new(cancel: CancellationToken, task: JoinHandle<()>) -> Self {
        Self {
            cancel,
            task: Some(task),
        }
    }

    /// Cancel, give the driver `grace` to close its socket cleanly, then abort.
    /// Returns once the task has finished.
    pub(crate) async fn shutdown(mut self, grace: Duration) {
        self.cancel.cancel();
        let Some(mut task) = self.task.take() else { return };
        if tokio::time::timeout(grace, &mut task).await.is_err() {
            tracing::debug!("driver did not stop within grace period; aborting");
            task.abort();
            let _ = task.await;
        }
    }
}

impl Drop for DriverHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

/// Manager bookkeeping for one channel key.
pub(crate) struct ConnectionRecord {
    /// Identifies the broadcast channel; survives record replacement.
    pub(crate) stream_id: u64,
    pub(crate) inbound: broadcast::Sender<InboundMessage>,
    outbound: Option<mpsc::UnboundedSender<String>>,
    driver: Option<DriverHandle>,
}

impl ConnectionRecord {
    /// Record with a running driver.
    pub(crate) fn active(
        stream_id: u64,
        inbound: broadcast::Sender<InboundMessage>,
        outbound: mpsc::UnboundedSender<String>,
        driver: DriverHandle,
    ) -> Self {
        Self {
            stream_id,
            inbound,
            outbound: Some(outbound),
            driver: Some(driver),
        }
    }

    /// Record without a connection (endpoint unresolved). Subscribers stay
    /// attached but receive nothing.
    pub(crate) fn unresolved(stream_id: u64, inbound: broadcast::Sender<InboundMessage>) -> Self {
        Self {
            stream_id,
            inbound,
            outbound: None,
            driver: None,
        }
    }

    /// Driver running and not waiting out a backoff.
    pub(crate) fn is_live(&self, key: ChannelKey, states: &StateStore) -> bool {
        self.driver.is_some() && states.snapshot(key).status != ConnectionStatus::Disconnected
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<InboundMessage> {
        self.inbound.subscribe()
    }

    /// Queue text for the driver. False when there is no driver to take it.
    pub(crate) fn push_outbound(&self, text: String) -> bool {
        self.outbound
            .as_ref()
            .map(|tx| tx.send(text).is_ok())
            .unwrap_or(false)
    }

    pub(crate) async fn shutdown(mut self, grace: Duration) {
        if let Some(driver) = self.driver.take() {
            driver.shutdown(grace).await;
        }
    }
}
