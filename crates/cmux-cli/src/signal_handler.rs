//! Ctrl+C handling for long-running commands

use futures::stream::StreamExt;
use signal_hook::consts::SIGINT;
use signal_hook_tokio::{Handle, Signals};
use std::future::Future;
use tokio::task::JoinHandle;

/// Runs a callback on the first SIGINT. Listening stops on drop.
pub struct InterruptHandler {
    handle: Handle,
    task: JoinHandle<()>,
}

impl InterruptHandler {
    pub fn install<F, Fut>(on_interrupt: F) -> std::io::Result<Self>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut signals = Signals::new([SIGINT])?;
        let handle = signals.handle();

        let task = tokio::spawn(async move {
            if signals.next().await.is_some() {
                tracing::info!("Received interrupt signal");
                on_interrupt().await;
            }
        });

        Ok(Self { handle, task })
    }
}

impl Drop for InterruptHandler {
    fn drop(&mut self) {
        self.handle.close();
        self.task.abort();
    }
}
