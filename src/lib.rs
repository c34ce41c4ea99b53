// lib.rs - Encrypted geofence dashboard core

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_lines)]

pub mod app;
pub mod capabilities;
pub mod config;
pub mod create;
pub mod event;
pub mod model;
pub mod notifier;
pub mod sync;
pub mod verify;
pub mod view;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub use app::Dashboard;
pub use capabilities::Collaborators;
pub use config::DashboardConfig;
pub use event::DashboardEvent;
pub use model::{FenceForm, FenceRecord, LocationStats, RecordKey};
pub use view::ViewModel;

pub const RECORD_KEY_PREFIX: &str = "fence-";
pub const RECORD_LABEL: &str = "Encrypted Location Fence";
pub const SECONDARY_VALUE: u32 = 0;
pub const RECENT_ACTIVITY_WINDOW_SECS: u64 = 60 * 60 * 24 * 7;
pub const MAX_HISTORY_ENTRIES: usize = 10;
pub const SUCCESS_STATUS_MS: u64 = 2000;
pub const ERROR_STATUS_MS: u64 = 3000;
pub const INFO_STATUS_MS: u64 = 3000;
pub const MIN_RADIUS: u32 = 10;
pub const MAX_RADIUS: u32 = 10_000;
pub const ALREADY_VERIFIED_MARKER: &str = "already verified";
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorSeverity {
    /// Resolved locally, never shown as a failure.
    Benign,
    Transient,
    Permanent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    NotConnected,
    Validation,
    EncryptionFailure,
    TransactionRejected,
    TransactionFailure,
    AlreadyVerifiedRace,
    DecryptionVerificationFailure,
    PartialLoadFailure,
    AlreadyInProgress,
    LedgerUnavailable,
    FheNotReady,
    InvalidState,
    Internal,
}

impl ErrorKind {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::NotConnected => "NOT_CONNECTED",
            Self::Validation => "VALIDATION_ERROR",
            Self::EncryptionFailure => "ENCRYPTION_FAILED",
            Self::TransactionRejected => "TX_REJECTED",
            Self::TransactionFailure => "TX_FAILED",
            Self::AlreadyVerifiedRace => "ALREADY_VERIFIED",
            Self::DecryptionVerificationFailure => "DECRYPTION_VERIFICATION_FAILED",
            Self::PartialLoadFailure => "PARTIAL_LOAD_FAILURE",
            Self::AlreadyInProgress => "ALREADY_IN_PROGRESS",
            Self::LedgerUnavailable => "LEDGER_UNAVAILABLE",
            Self::FheNotReady => "FHE_NOT_READY",
            Self::InvalidState => "INVALID_STATE",
            Self::Internal => "INTERNAL_ERROR",
        }
    }

    #[must_use]
    pub const fn default_severity(self) -> ErrorSeverity {
        match self {
            Self::AlreadyVerifiedRace | Self::PartialLoadFailure => ErrorSeverity::Benign,

            Self::TransactionFailure
            | Self::LedgerUnavailable
            | Self::DecryptionVerificationFailure
            | Self::AlreadyInProgress => ErrorSeverity::Transient,

            Self::NotConnected
            | Self::Validation
            | Self::EncryptionFailure
            | Self::TransactionRejected
            | Self::FheNotReady
            | Self::InvalidState
            | Self::Internal => ErrorSeverity::Permanent,
        }
    }

    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::TransactionFailure
                | Self::LedgerUnavailable
                | Self::DecryptionVerificationFailure
                | Self::AlreadyInProgress
                | Self::TransactionRejected
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppError {
    pub kind: ErrorKind,
    pub severity: ErrorSeverity,
    pub message: String,
    pub internal_message: Option<String>,
    pub context: HashMap<String, String>,
}

impl AppError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: kind.default_severity(),
            message: message.into(),
            internal_message: None,
            context: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_internal(mut self, internal: impl Into<String>) -> Self {
        self.internal_message = Some(internal.into());
        self
    }

    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.kind.code()
    }

    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    #[must_use]
    pub const fn is_benign(&self) -> bool {
        matches!(self.severity, ErrorSeverity::Benign)
    }

    #[must_use]
    pub fn user_facing_message(&self) -> String {
        match self.kind {
            ErrorKind::NotConnected => "Please connect wallet first".into(),
            ErrorKind::TransactionRejected => "Transaction rejected by user".into(),
            ErrorKind::AlreadyVerifiedRace => "Location data is already verified on-chain".into(),
            ErrorKind::AlreadyInProgress => {
                "This operation is already in progress. Please wait.".into()
            }
            ErrorKind::FheNotReady => {
                "The FHE client is not ready yet. Please wait for initialization.".into()
            }
            ErrorKind::LedgerUnavailable => {
                "Unable to reach the ledger. Please check your connection and try again.".into()
            }
            ErrorKind::Validation
            | ErrorKind::EncryptionFailure
            | ErrorKind::TransactionFailure
            | ErrorKind::DecryptionVerificationFailure
            | ErrorKind::PartialLoadFailure => self.message.clone(),
            ErrorKind::InvalidState | ErrorKind::Internal => {
                "An unexpected error occurred. Please try again.".into()
            }
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code(), self.message)?;
        if let Some(internal) = &self.internal_message {
            write!(f, " (internal: {internal})")?;
        }
        Ok(())
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

/// Case-insensitive check for the ledger's benign "already verified" revert.
#[must_use]
pub fn mentions_already_verified(message: &str) -> bool {
    message.to_ascii_lowercase().contains(ALREADY_VERIFIED_MARKER)
}

#[must_use]
pub fn get_current_time_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

#[must_use]
pub fn get_current_time_secs() -> u64 {
    get_current_time_ms() / 1000
}

/// `HH:MM:SS` (UTC) prefix used by history lines.
#[must_use]
pub fn format_clock_time(timestamp_ms: u64) -> String {
    let secs_of_day = (timestamp_ms / 1000) % 86_400;
    format!(
        "{:02}:{:02}:{:02}",
        secs_of_day / 3600,
        (secs_of_day / 60) % 60,
        secs_of_day % 60
    )
}

#[must_use]
pub fn format_time_ago(timestamp_ms: u64, now_ms: u64) -> String {
    // Clock skew can put a fresh record slightly in the future.
    let secs = now_ms.saturating_sub(timestamp_ms) / 1000;
    match secs {
        0..=4 => "Just now".into(),
        5..=59 => format!("{secs}s ago"),
        60..=3_599 => format!("{}m ago", secs / 60),
        3_600..=86_399 => format!("{}h ago", secs / 3_600),
        _ => format!("{}d ago", secs / 86_400),
    }
}
