//! Open request sequencing
//!
//! An `OpenRequest` issues the engine open immediately and hands back a
//! chainable value. Work registered with `then` is queued in order and run
//! once the connection exists; `upgrade` registers the hook for a version
//! change. Both only take effect through a driver task on the local event
//! loop, which cannot observe engine events until the caller yields, so a
//! hook supplied anywhere in the initial chain is never missed.

use futures_util::future::LocalBoxFuture;
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::future::Future;
use std::rc::Rc;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use stash_storage::{Engine, OpenEvent, RawOpenRequest, VersionChange};

use crate::error::{OpenError, UpgradeError};
use crate::handle::StorageHandle;
use crate::sink::{LogSink, TracingSink};
use crate::state::RequestState;

type Continuation = Box<dyn FnOnce(StorageHandle) -> LocalBoxFuture<'static, ()>>;

tokio::task_local! {
    /// Request whose continuation the current task is running
    static RUNNING: usize;
}
type UpgradeHook = Box<dyn FnOnce(&StorageHandle, VersionChange) -> Result<(), UpgradeError>>;

/// Which database, at which version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionRequest {
    pub name: String,
    pub version: u32,
}

struct Shared {
    request: ConnectionRequest,
    state: Cell<RequestState>,
    upgrade: RefCell<Option<UpgradeHook>>,
}

impl Shared {
    fn transition(&self, target: RequestState) -> bool {
        let current = self.state.get();
        if !current.can_transition_to(target) {
            tracing::warn!(
                database = %self.request.name,
                from = %current,
                to = %target,
                "Ignoring invalid open request transition"
            );
            return false;
        }

        tracing::debug!(
            database = %self.request.name,
            from = %current,
            to = %target,
            "Open request state transition"
        );
        self.state.set(target);
        true
    }
}

/// Open `name` at `version`, reporting failures through `tracing`.
///
/// # Panics
///
/// Panics outside a tokio `LocalSet`.
pub fn open(engine: &Engine, name: &str, version: u32) -> OpenRequest {
    open_with_sink(engine, name, version, Arc::new(TracingSink))
}

/// Open `name` at `version`, reporting a failed open to `sink`.
///
/// # Panics
///
/// Panics outside a tokio `LocalSet`.
pub fn open_with_sink(
    engine: &Engine,
    name: &str,
    version: u32,
    sink: Arc<dyn LogSink>,
) -> OpenRequest {
    let raw = engine.open(name, version);
    let (queue, pending) = mpsc::unbounded_channel();

    let shared = Rc::new(Shared {
        request: ConnectionRequest {
            name: name.to_string(),
            version,
        },
        state: Cell::new(RequestState::Pending),
        upgrade: RefCell::new(None),
    });

    tokio::task::spawn_local(drive(raw, Rc::clone(&shared), pending, sink));

    OpenRequest { shared, queue }
}

/// Chainable handle on an in-flight or settled open
#[derive(Clone)]
pub struct OpenRequest {
    shared: Rc<Shared>,
    queue: mpsc::UnboundedSender<Continuation>,
}

impl OpenRequest {
    pub fn request(&self) -> &ConnectionRequest {
        &self.shared.request
    }

    pub fn state(&self) -> RequestState {
        self.shared.state.get()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == RequestState::Ready
    }

    /// Run `continuation` with the storage handle once the open succeeds.
    ///
    /// Continuations run one at a time in registration order, each to
    /// completion, after any upgrade. Registering after the request is
    /// ready still runs asynchronously and behind everything queued
    /// earlier. On a failed open they never run.
    pub fn then<F, Fut>(self, continuation: F) -> Self
    where
        F: FnOnce(StorageHandle) -> Fut + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        let continuation: Continuation =
            Box::new(move |handle| -> LocalBoxFuture<'static, ()> { Box::pin(continuation(handle)) });

        if self.queue.send(continuation).is_err() {
            tracing::debug!(
                database = %self.shared.request.name,
                "Open request failed; continuation discarded"
            );
        }
        self
    }

    /// Register the schema upgrade hook.
    ///
    /// Runs at most once, only when the engine reports a version change,
    /// and before any continuation. A later registration replaces an
    /// earlier one; registering after the upgrade stage has passed has no effect.
    pub fn upgrade<F>(self, hook: F) -> Self
    where
        F: FnOnce(&StorageHandle, VersionChange) -> Result<(), UpgradeError> + 'static,
    {
        match self.state() {
            RequestState::Pending => {
                if self
                    .shared
                    .upgrade
                    .borrow_mut()
                    .replace(Box::new(hook))
                    .is_some()
                {
                    tracing::warn!(
                        database = %self.shared.request.name,
                        "Replacing previously registered upgrade hook"
                    );
                }
            }
            state => {
                tracing::warn!(
                    database = %self.shared.request.name,
                    state = %state,
                    "Upgrade hook registered too late; ignoring"
                );
            }
        }
        self
    }

    /// Wait until every continuation registered so far has finished,
    /// or the open has failed. Returns the resulting state.
    ///
    /// From inside one of this request's own continuations it returns at
    /// once: the queue cannot move until that continuation finishes.
    pub async fn flush(&self) -> RequestState {
        if RUNNING.try_with(|id| *id == self.id()).unwrap_or(false) {
            tracing::debug!(
                database = %self.shared.request.name,
                "Flush from a running continuation; not waiting"
            );
            return self.state();
        }

        let (done, finished) = oneshot::channel::<()>();
        let marker: Continuation = Box::new(move |_| -> LocalBoxFuture<'static, ()> {
            Box::pin(async move {
                let _ = done.send(());
            })
        });

        if self.queue.send(marker).is_ok() {
            // Dropped unrun when the open fails
            let _ = finished.await;
        }
        self.state()
    }

    fn id(&self) -> usize {
        Rc::as_ptr(&self.shared) as usize
    }
}

impl std::fmt::Debug for OpenRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenRequest")
            .field("request", &self.shared.request)
            .field("state", &self.state())
            .finish()
    }
}

async fn drive(
    mut raw: RawOpenRequest,
    shared: Rc<Shared>,
    mut pending: mpsc::UnboundedReceiver<Continuation>,
    sink: Arc<dyn LogSink>,
) {
    let resolved = resolve(&mut raw, &shared).await;

    // Consumed or never needed; either way it will not run now
    shared.upgrade.borrow_mut().take();

    let handle = match resolved {
        Ok(handle) => handle,
        Err(err) => {
            shared.transition(RequestState::Failed);
            // Queued continuations are dropped unrun and later sends fail
            pending.close();
            drop(pending);
            sink.error(&err.to_string());
            return;
        }
    };

    let id = Rc::as_ptr(&shared) as usize;
    while let Some(continuation) = pending.recv().await {
        RUNNING.scope(id, continuation(handle.clone())).await;
    }
}

async fn resolve(raw: &mut RawOpenRequest, shared: &Shared) -> Result<StorageHandle, OpenError> {
    let request = &shared.request;

    while let Some(event) = raw.next_event().await {
        match event {
            OpenEvent::UpgradeNeeded {
                connection,
                change,
                reply,
            } => {
                if !shared.transition(RequestState::Upgrading) {
                    let _ = reply.send(Ok(()));
                    continue;
                }

                tracing::info!(
                    database = %request.name,
                    from = change.old_version,
                    to = change.new_version,
                    "Upgrade needed"
                );

                let handle = StorageHandle::new(connection);
                let hook = shared.upgrade.borrow_mut().take();
                let outcome = match hook {
                    Some(hook) => hook(&handle, change).map_err(UpgradeError::into_inner),
                    None => Ok(()),
                };
                let _ = reply.send(outcome);
            }
            OpenEvent::Success(connection) => {
                shared.transition(RequestState::Ready);
                tracing::info!(
                    database = %request.name,
                    version = connection.version(),
                    "Database ready"
                );
                return Ok(StorageHandle::new(connection));
            }
            OpenEvent::Error(e) => {
                return Err(OpenError::from_engine(&request.name, request.version, e));
            }
        }
    }

    Err(OpenError::Interrupted {
        name: request.name.clone(),
        version: request.version,
    })
}
