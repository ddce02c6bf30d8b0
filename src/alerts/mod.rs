// =============================================================================
// Alerts — typed notifications derived from snapshot diffs
// =============================================================================

pub mod bus;
pub mod generator;

pub use bus::{AlertBus, AlertFilter, AlertStream, BusEvent};
pub use generator::AlertGenerator;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{AlertKind, AlertPriority};

/// A notification pushed to subscribers and retained in the recent ring.
///
/// Field names follow the wire contract: `type` and `emittedAt` (RFC 3339).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub symbol: String,
    #[serde(rename = "type")]
    pub kind: AlertKind,
    pub message: String,
    pub priority: AlertPriority,
    #[serde(rename = "emittedAt")]
    pub emitted_at: DateTime<Utc>,
    pub read: bool,
}

impl Alert {
    pub fn new(
        symbol: impl Into<String>,
        kind: AlertKind,
        priority: AlertPriority,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            symbol: symbol.into(),
            kind,
            message: message.into(),
            priority,
            emitted_at: Utc::now(),
            read: false,
        }
    }
}
