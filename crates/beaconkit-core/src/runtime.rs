//! Single-owner tokio host for a [`ProximityEngine`].
//!
//! One task owns the engine and drains one bounded queue. Radio events
//! (through [`RadioEventSink`]) and application requests (through
//! [`EngineHandle`]) share that queue, so the engine sees one message at a
//! time and needs no locking.
//!
//! When every sender is dropped, or [`EngineHandle::stop`] is called, the
//! engine is stopped and handed back from the task's `JoinHandle`.

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info_span, Instrument};

use crate::aggregator::ProximityView;
use crate::engine::{EngineNotice, EngineStatus, ProximityEngine};
use crate::error::{BeaconError, Result};
use crate::radio::{RadioEvent, RadioEventHandler, RadioStack};
use crate::types::IdentityConstraint;
use crate::watcher::WatchOutcome;

enum EngineMessage {
    Radio(RadioEvent),
    Configure(oneshot::Sender<Result<()>>),
    Watch(IdentityConstraint, oneshot::Sender<Result<WatchOutcome>>),
    UnwatchAll(oneshot::Sender<()>),
    View(oneshot::Sender<ProximityView>),
    Status(oneshot::Sender<EngineStatus>),
    Subscribe(oneshot::Sender<broadcast::Receiver<EngineNotice>>),
    Stop(oneshot::Sender<()>),
}

/// Sender half handed to radio collaborators.
#[derive(Debug, Clone)]
pub struct RadioEventSink {
    tx: mpsc::Sender<EngineMessage>,
}

impl RadioEventSink {
    /// Queue an event, waiting for capacity.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::EngineClosed`] if the engine task has ended.
    pub async fn send(&self, event: RadioEvent) -> Result<()> {
        self.tx
            .send(EngineMessage::Radio(event))
            .await
            .map_err(|_| BeaconError::EngineClosed)
    }

    /// Queue an event from a thread outside the runtime.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::EngineClosed`] if the engine task has ended.
    ///
    /// # Panics
    ///
    /// Panics if called from within an async context.
    pub fn blocking_send(&self, event: RadioEvent) -> Result<()> {
        self.tx
            .blocking_send(EngineMessage::Radio(event))
            .map_err(|_| BeaconError::EngineClosed)
    }

    /// Whether the engine task has ended.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Application-side handle to a running engine.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineMessage>,
}

impl std::fmt::Debug for EngineMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Radio(_) => "Radio",
            Self::Configure(_) => "Configure",
            Self::Watch(..) => "Watch",
            Self::UnwatchAll(_) => "UnwatchAll",
            Self::View(_) => "View",
            Self::Status(_) => "Status",
            Self::Subscribe(_) => "Subscribe",
            Self::Stop(_) => "Stop",
        };
        f.write_str(name)
    }
}

impl EngineHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> EngineMessage,
    ) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| BeaconError::EngineClosed)?;
        rx.await.map_err(|_| BeaconError::EngineClosed)
    }

    /// See [`ProximityEngine::configure`].
    ///
    /// # Errors
    ///
    /// Returns the configuration error, or [`BeaconError::EngineClosed`].
    pub async fn configure(&self) -> Result<()> {
        self.request(EngineMessage::Configure).await?
    }

    /// See [`ProximityEngine::watch`].
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::NotConfigured`] or [`BeaconError::EngineClosed`].
    pub async fn watch(&self, constraint: IdentityConstraint) -> Result<WatchOutcome> {
        self.request(|reply| EngineMessage::Watch(constraint, reply))
            .await?
    }

    /// See [`ProximityEngine::unwatch_all`].
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::EngineClosed`] if the engine task has ended.
    pub async fn unwatch_all(&self) -> Result<()> {
        self.request(EngineMessage::UnwatchAll).await
    }

    /// See [`ProximityEngine::current_proximity_view`].
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::EngineClosed`] if the engine task has ended.
    pub async fn proximity_view(&self) -> Result<ProximityView> {
        self.request(EngineMessage::View).await
    }

    /// See [`ProximityEngine::status`].
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::EngineClosed`] if the engine task has ended.
    pub async fn status(&self) -> Result<EngineStatus> {
        self.request(EngineMessage::Status).await
    }

    /// See [`ProximityEngine::subscribe`].
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::EngineClosed`] if the engine task has ended.
    pub async fn subscribe(&self) -> Result<broadcast::Receiver<EngineNotice>> {
        self.request(EngineMessage::Subscribe).await
    }

    /// Stop the engine and end its task.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::EngineClosed`] if the engine task had already ended.
    pub async fn stop(&self) -> Result<()> {
        self.request(EngineMessage::Stop).await
    }
}

/// Move `engine` onto its own task.
///
/// Returns the application handle, the sink for radio events, and the task
/// handle, which yields the stopped engine.
pub fn spawn_engine<R>(
    engine: ProximityEngine<R>,
    capacity: usize,
) -> (EngineHandle, RadioEventSink, JoinHandle<ProximityEngine<R>>)
where
    R: RadioStack + Send + 'static,
{
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let task = tokio::spawn(run(engine, rx).instrument(info_span!("engine")));
    (EngineHandle { tx: tx.clone() }, RadioEventSink { tx }, task)
}

async fn run<R: RadioStack>(
    mut engine: ProximityEngine<R>,
    mut rx: mpsc::Receiver<EngineMessage>,
) -> ProximityEngine<R> {
    while let Some(message) = rx.recv().await {
        match message {
            EngineMessage::Radio(event) => engine.dispatch(event),
            EngineMessage::Configure(reply) => {
                let _ = reply.send(engine.configure());
            }
            EngineMessage::Watch(constraint, reply) => {
                let _ = reply.send(engine.watch(constraint));
            }
            EngineMessage::UnwatchAll(reply) => {
                engine.unwatch_all();
                let _ = reply.send(());
            }
            EngineMessage::View(reply) => {
                let _ = reply.send(engine.current_proximity_view());
            }
            EngineMessage::Status(reply) => {
                let _ = reply.send(engine.status());
            }
            EngineMessage::Subscribe(reply) => {
                let _ = reply.send(engine.subscribe());
            }
            EngineMessage::Stop(reply) => {
                engine.stop();
                let _ = reply.send(());
                return engine;
            }
        }
    }

    debug!("All engine senders dropped, stopping");
    engine.stop();
    engine
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BeaconConfig;
    use crate::radio::mock::MockRadio;
    use crate::radio::RadioCommand;
    use crate::types::PowerState;
    use uuid::Uuid;

    fn spawn() -> (
        EngineHandle,
        RadioEventSink,
        JoinHandle<ProximityEngine<MockRadio>>,
    ) {
        let engine = ProximityEngine::new(BeaconConfig::default(), MockRadio::authorized());
        spawn_engine(engine, 8)
    }

    #[tokio::test]
    async fn test_requests_are_served_in_order() {
        let (handle, sink, task) = spawn();
        handle.configure().await.unwrap();
        sink.send(RadioEvent::PowerStateChanged(PowerState::PoweredOn))
            .await
            .unwrap();

        let c = IdentityConstraint::new(Uuid::from_u128(1));
        assert_eq!(handle.watch(c).await.unwrap(), WatchOutcome::Monitoring);
        assert_eq!(handle.watch(c).await.unwrap(), WatchOutcome::AlreadyWatched);

        let status = handle.status().await.unwrap();
        assert!(status.advertising);
        assert_eq!(status.watching.len(), 1);

        handle.stop().await.unwrap();
        let engine = task.await.unwrap();
        assert_eq!(
            engine.radio().commands().last(),
            Some(&RadioCommand::StopMonitoring(
                crate::types::BeaconRegion::for_constraint(c)
            ))
        );
    }

    #[tokio::test]
    async fn test_handle_errors_after_stop() {
        let (handle, sink, task) = spawn();
        handle.stop().await.unwrap();
        task.await.unwrap();

        assert!(matches!(
            handle.proximity_view().await,
            Err(BeaconError::EngineClosed)
        ));
        assert!(sink.is_closed());
    }

    #[tokio::test]
    async fn test_dropping_all_senders_stops_engine() {
        let (handle, sink, task) = spawn();
        handle.configure().await.unwrap();
        sink.send(RadioEvent::PowerStateChanged(PowerState::PoweredOn))
            .await
            .unwrap();
        drop(handle);
        drop(sink);

        let engine = task.await.unwrap();
        assert!(!engine.status().configured);
        assert_eq!(
            engine.radio().commands().last(),
            Some(&RadioCommand::StopAdvertising)
        );
    }

    #[tokio::test]
    async fn test_watch_before_configure_is_rejected() {
        let (handle, _sink, _task) = spawn();
        assert!(matches!(
            handle.watch(IdentityConstraint::new(Uuid::nil())).await,
            Err(BeaconError::NotConfigured)
        ));
    }

    #[tokio::test]
    async fn test_blocking_send_from_worker_thread() {
        let (handle, sink, _task) = spawn();
        handle.configure().await.unwrap();

        let worker = sink.clone();
        tokio::task::spawn_blocking(move || {
            worker.blocking_send(RadioEvent::PowerStateChanged(PowerState::PoweredOn))
        })
        .await
        .unwrap()
        .unwrap();

        let status = handle.status().await.unwrap();
        assert_eq!(status.power_state, PowerState::PoweredOn);
        assert!(status.advertising);
    }
}
