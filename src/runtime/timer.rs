//! Tokio-backed session timers.
//!
//! Each timer is a spawned `sleep` task. Expiry is reported as a
//! [`TimerFired`] event on an mpsc channel; the task driving the main
//! channel drains it and calls `MainChannel::on_ping_timer`.

use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

use crate::core::{ConnectionId, Timer, TimerError, TimerFactory};

/// A session timer expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired {
    /// Session owning the timer.
    pub connection_id: ConnectionId,
}

/// Creates [`TokioTimer`]s that report to one event channel.
#[derive(Debug, Clone)]
pub struct TokioTimerFactory {
    tx: mpsc::UnboundedSender<TimerFired>,
}

impl TokioTimerFactory {
    /// Create a factory and the receiver its timers report to.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TimerFired>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl TimerFactory for TokioTimerFactory {
    fn create(&mut self, connection_id: ConnectionId) -> Result<Box<dyn Timer>, TimerError> {
        let handle = Handle::try_current().map_err(|_| TimerError::NoRuntime)?;
        Ok(Box::new(TokioTimer {
            connection_id,
            handle,
            tx: self.tx.clone(),
            task: None,
        }))
    }
}

/// One-shot timer running on a tokio runtime.
#[derive(Debug)]
pub struct TokioTimer {
    connection_id: ConnectionId,
    handle: Handle,
    tx: mpsc::UnboundedSender<TimerFired>,
    task: Option<JoinHandle<()>>,
}

impl Timer for TokioTimer {
    fn start(&mut self, after: Duration) {
        self.cancel();
        let tx = self.tx.clone();
        let connection_id = self.connection_id;
        self.task = Some(self.handle.spawn(async move {
            tokio::time::sleep(after).await;
            trace!(connection_id, "timer fired");
            // receiver gone means the channel is shutting down
            let _ = tx.send(TimerFired { connection_id });
        }));
    }

    fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for TokioTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MainChannel;
    use crate::config::SessionConfigBuilder;
    use crate::core::CapabilitySet;
    use crate::monitor::PingCommand;
    use crate::pipe::msg;
    use crate::test_util::{FakeHooks, FakeTransport};

    #[test]
    fn test_create_outside_runtime() {
        let (mut factory, _rx) = TokioTimerFactory::new();
        assert!(matches!(factory.create(1), Err(TimerError::NoRuntime)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_once() {
        let (mut factory, mut rx) = TokioTimerFactory::new();
        let mut timer = factory.create(3).unwrap();
        timer.start(Duration::from_secs(10));

        let fired = rx.recv().await.unwrap();
        assert_eq!(fired, TimerFired { connection_id: 3 });

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel() {
        let (mut factory, mut rx) = TokioTimerFactory::new();
        let mut timer = factory.create(1).unwrap();
        timer.start(Duration::from_secs(10));
        timer.cancel();

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_replaces_pending_expiry() {
        let (mut factory, mut rx) = TokioTimerFactory::new();
        let mut timer = factory.create(1).unwrap();
        timer.start(Duration::from_secs(10));
        timer.start(Duration::from_secs(30));

        tokio::time::sleep(Duration::from_secs(15)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(rx.try_recv().unwrap().connection_id, 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels() {
        let (mut factory, mut rx) = TokioTimerFactory::new();
        let mut timer = factory.create(1).unwrap();
        timer.start(Duration::from_secs(1));
        drop(timer);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_loop_drives_channel() {
        let (factory, mut rx) = TokioTimerFactory::new();
        let config = SessionConfigBuilder::new()
            .statistics(true)
            .ping_interval(Duration::from_secs(2))
            .build()
            .unwrap();
        let mut channel =
            MainChannel::new(config, Box::new(FakeHooks::default()), Box::new(factory)).unwrap();
        let transport = FakeTransport::default();
        channel
            .add_client(5, Box::new(transport.clone()), CapabilitySet::default())
            .unwrap()
            .ping_command(PingCommand::On { interval: None });

        for _ in 0..3 {
            let fired = rx.recv().await.unwrap();
            channel.on_ping_timer(fired.connection_id).unwrap();
        }
        assert_eq!(
            channel.client(5).unwrap().pending_types(),
            vec![msg::PING; 3]
        );

        // a dead peer stops the keep-alive
        transport.set_connected(false);
        let fired = rx.recv().await.unwrap();
        channel.on_ping_timer(fired.connection_id).unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(channel.client(5).unwrap().pending_items(), 3);
    }
}
