use serde::{Deserialize, Serialize};

use crate::model::RecordKey;
use crate::notifier::{HistoryEntry, TransactionStatus};

/// Everything the presentation layer can subscribe to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DashboardEvent {
    StatusChanged(TransactionStatus),
    StatusCleared {
        seq: u64,
    },
    HistoryPushed(HistoryEntry),
    FencesReloaded {
        ticket: u64,
        count: usize,
        dropped: usize,
    },
    DetailChanged {
        key: Option<RecordKey>,
    },
    VerificationStarted {
        key: RecordKey,
    },
    VerificationFinished {
        key: RecordKey,
        verified: bool,
    },
    CreationFinished {
        key: Option<RecordKey>,
    },
}

impl DashboardEvent {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::StatusChanged(_) => "status_changed",
            Self::StatusCleared { .. } => "status_cleared",
            Self::HistoryPushed(_) => "history_pushed",
            Self::FencesReloaded { .. } => "fences_reloaded",
            Self::DetailChanged { .. } => "detail_changed",
            Self::VerificationStarted { .. } => "verification_started",
            Self::VerificationFinished { .. } => "verification_finished",
            Self::CreationFinished { .. } => "creation_finished",
        }
    }
}
