// ── Coordinator registry ──
//
// Composition root: owns one of each coordinator, the shared store and
// the background tasks that drive them.

use std::net::SocketAddr;
use std::sync::Arc;

use portier_api::{EventDecoder, ListenerHandle, RebindConfig, Status, Transport};
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RegistryConfig;
use crate::coordinator::{
    CardCoordinator, ControllerCoordinator, DoorCoordinator, EventCoordinator, late_reply_task,
    poll_task,
};
use crate::directory::Directory;
use crate::error::CoreError;
use crate::store::DataStore;

// ── Registry ─────────────────────────────────────────────────────────

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<RegistryInner>`. Construct with
/// [`new()`](Self::new), then [`start()`](Self::start) the background
/// tasks and [`shutdown()`](Self::shutdown) when done. A registry that
/// was shut down cannot be restarted.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    config: RegistryConfig,
    directory: Arc<Directory>,
    store: Arc<DataStore>,
    controllers: Arc<ControllerCoordinator>,
    doors: Arc<DoorCoordinator>,
    cards: Arc<CardCoordinator>,
    events: Arc<EventCoordinator>,
    decoder: Option<Arc<dyn EventDecoder>>,
    late_rx: Mutex<Option<mpsc::UnboundedReceiver<portier_api::Late>>>,
    listener: Mutex<Option<ListenerHandle>>,
    cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Registry {
    /// Build the registry. Does NOT start polling; call
    /// [`start()`](Self::start).
    ///
    /// `decoder` turns pushed datagrams into statuses. Without one (or
    /// without `config.listen`) events are only reconciled by polling.
    pub fn new(
        config: RegistryConfig,
        transport: Arc<dyn Transport>,
        decoder: Option<Arc<dyn EventDecoder>>,
    ) -> Result<Self, CoreError> {
        let directory = Arc::new(Directory::new(&config)?);
        let store = Arc::new(DataStore::new());
        let (late_tx, late_rx) = mpsc::unbounded_channel();
        let timeouts = config.timeouts;

        let controllers = Arc::new(ControllerCoordinator::new(
            Arc::clone(&transport),
            Arc::clone(&directory),
            Arc::clone(&store),
            late_tx,
            timeouts.controllers,
        ));
        let doors = Arc::new(DoorCoordinator::new(
            Arc::clone(&transport),
            Arc::clone(&directory),
            Arc::clone(&store),
            timeouts.doors,
        ));
        let cards = Arc::new(CardCoordinator::new(
            Arc::clone(&transport),
            Arc::clone(&directory),
            Arc::clone(&store),
            timeouts.cards,
        ));
        let events = Arc::new(EventCoordinator::new(
            transport,
            Arc::clone(&directory),
            Arc::clone(&store),
            doors.trigger(),
            timeouts.events,
        ));

        Ok(Self {
            inner: Arc::new(RegistryInner {
                config,
                directory,
                store,
                controllers,
                doors,
                cards,
                events,
                decoder,
                late_rx: Mutex::new(Some(late_rx)),
                listener: Mutex::new(None),
                cancel: CancellationToken::new(),
                task_handles: Mutex::new(Vec::new()),
            }),
        })
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Spawn the poll tasks, the late-reply merger and, if configured, the
    /// passive event listener.
    ///
    /// A listener that cannot bind is logged and skipped: polling still
    /// reconciles events. Calling `start()` twice is a no-op.
    pub async fn start(&self) -> Result<(), CoreError> {
        let inner = &self.inner;
        let mut handles = inner.task_handles.lock().await;
        if !handles.is_empty() {
            debug!("registry already started");
            return Ok(());
        }
        if inner.cancel.is_cancelled() {
            return Err(CoreError::Internal("registry was shut down".into()));
        }

        if let Some(rx) = inner.late_rx.lock().await.take() {
            handles.push(tokio::spawn(late_reply_task(
                Arc::clone(&inner.store),
                rx,
                inner.cancel.clone(),
            )));
        }

        let intervals = inner.config.intervals;
        handles.push(tokio::spawn(poll_task(
            Arc::clone(&inner.controllers),
            intervals.controllers,
            inner.controllers.trigger(),
            inner.cancel.clone(),
        )));
        handles.push(tokio::spawn(poll_task(
            Arc::clone(&inner.doors),
            intervals.doors,
            inner.doors.trigger(),
            inner.cancel.clone(),
        )));
        handles.push(tokio::spawn(poll_task(
            Arc::clone(&inner.cards),
            intervals.cards,
            inner.cards.trigger(),
            inner.cancel.clone(),
        )));
        handles.push(tokio::spawn(poll_task(
            Arc::clone(&inner.events),
            intervals.events,
            inner.events.trigger(),
            inner.cancel.clone(),
        )));

        if let (Some(addr), Some(decoder)) = (inner.config.listen, inner.decoder.as_ref()) {
            match ListenerHandle::bind(
                addr,
                Arc::clone(decoder),
                RebindConfig::default(),
                inner.cancel.child_token(),
            )
            .await
            {
                Ok(listener) => {
                    handles.push(tokio::spawn(listen_task(
                        Arc::clone(&inner.events),
                        listener.subscribe(),
                        inner.cancel.clone(),
                    )));
                    *inner.listener.lock().await = Some(listener);
                }
                Err(e) => {
                    warn!(%addr, error = %e, "event listener unavailable, polling only");
                }
            }
        }

        info!(
            controllers = inner.directory.controller_ids().len(),
            doors = inner.directory.door_names().len(),
            "registry started"
        );
        Ok(())
    }

    /// Stop every background task and wait for them to exit.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();

        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        *self.inner.listener.lock().await = None;
        info!("registry stopped");
    }

    /// Address the passive listener is bound to, once started.
    pub async fn listener_addr(&self) -> Option<SocketAddr> {
        self.inner
            .listener
            .lock()
            .await
            .as_ref()
            .map(ListenerHandle::local_addr)
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn store(&self) -> &Arc<DataStore> {
        &self.inner.store
    }

    pub fn directory(&self) -> &Arc<Directory> {
        &self.inner.directory
    }

    pub fn controllers(&self) -> &Arc<ControllerCoordinator> {
        &self.inner.controllers
    }

    pub fn doors(&self) -> &Arc<DoorCoordinator> {
        &self.inner.doors
    }

    pub fn cards(&self) -> &Arc<CardCoordinator> {
        &self.inner.cards
    }

    pub fn events(&self) -> &Arc<EventCoordinator> {
        &self.inner.events
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Run one cycle of every coordinator now. Returns the first failure.
    pub async fn refresh_all(&self) -> Result<(), CoreError> {
        let inner = &self.inner;
        let (controllers, doors, cards, events) = tokio::join!(
            inner.controllers.refresh(),
            inner.doors.refresh(),
            inner.cards.refresh(),
            inner.events.refresh(),
        );
        controllers.and(doors).and(cards).and(events)
    }

    /// Unlock a door by name. `false` if the name is unknown or the
    /// controller did not open it.
    pub async fn unlock_door(&self, name: &str) -> bool {
        self.inner.doors.unlock_by_name(name).await
    }

    /// Add a card to every controller. `false` if any controller failed.
    pub async fn add_card(&self, card: u32) -> bool {
        match self.inner.cards.add(card).await {
            Ok(()) => true,
            Err(e) => {
                warn!(card, error = %e, "add-card failed");
                false
            }
        }
    }

    /// Delete a card from every controller. `false` if any controller
    /// failed.
    pub async fn delete_card(&self, card: u32) -> bool {
        match self.inner.cards.delete(card).await {
            Ok(()) => true,
            Err(e) => {
                warn!(card, error = %e, "delete-card failed");
                false
            }
        }
    }
}

// ── Background tasks ─────────────────────────────────────────────────

/// Feed decoded datagrams to the event coordinator.
async fn listen_task(
    events: Arc<EventCoordinator>,
    mut rx: broadcast::Receiver<Arc<Status>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            received = rx.recv() => match received {
                Ok(status) => events.on_pushed(&status),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event listener lagged, polling will catch up");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}
