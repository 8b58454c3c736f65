//! Open request events

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::database::Connection;
use crate::error::StorageError;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionChange {
    /// 0 when the database did not exist
    pub old_version: u32,
    pub new_version: u32,
}

/// Answer to an upgrade signal. `Err` aborts the open.
pub type UpgradeReply = oneshot::Sender<Result<()>>;

pub enum OpenEvent {
    /// The stored version is below the requested one.
    ///
    /// The engine holds the version change open until `reply` is
    /// answered or dropped.
    UpgradeNeeded {
        connection: Connection,
        change: VersionChange,
        reply: UpgradeReply,
    },
    Success(Connection),
    Error(StorageError),
}

impl OpenEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            OpenEvent::UpgradeNeeded { .. } => "upgradeneeded",
            OpenEvent::Success(_) => "success",
            OpenEvent::Error(_) => "error",
        }
    }
}

impl std::fmt::Debug for OpenEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OpenEvent::UpgradeNeeded { change, .. } => f
                .debug_struct("UpgradeNeeded")
                .field("change", change)
                .finish(),
            OpenEvent::Success(conn) => f.debug_tuple("Success").field(conn).finish(),
            OpenEvent::Error(e) => f.debug_tuple("Error").field(e).finish(),
        }
    }
}

/// In-flight open. Events are buffered until read.
pub struct RawOpenRequest {
    name: String,
    version: u32,
    events: mpsc::UnboundedReceiver<OpenEvent>,
}

impl RawOpenRequest {
    pub(crate) fn new(
        name: String,
        version: u32,
        events: mpsc::UnboundedReceiver<OpenEvent>,
    ) -> Self {
        Self {
            name,
            version,
            events,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Next event, or `None` once the engine has nothing more to say
    pub async fn next_event(&mut self) -> Option<OpenEvent> {
        self.events.recv().await
    }
}
