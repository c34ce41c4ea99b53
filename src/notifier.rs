//! Transaction status slot, operation history, and the event channel the
//! presentation layer subscribes to.
//!
//! The status slot holds at most one message. Each write gets a sequence
//! number; auto-hide is an explicit `expire(seq)` that only clears the slot if
//! nothing has overwritten it since.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::config::DashboardConfig;
use crate::event::DashboardEvent;
use crate::{format_clock_time, get_current_time_ms, AppError, ErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusPhase {
    Pending,
    Success,
    Error,
    Info,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionStatus {
    pub phase: StatusPhase,
    pub message: String,
    pub seq: u64,
    pub shown_at_ms: u64,
    /// `None` for pending: it stays until the workflow overwrites it.
    pub expires_after_ms: Option<u64>,
}

impl TransactionStatus {
    #[must_use]
    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_after_ms
            .is_some_and(|after| now_ms.saturating_sub(self.shown_at_ms) >= after)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub at_ms: u64,
    pub message: String,
}

impl fmt::Display for HistoryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", format_clock_time(self.at_ms), self.message)
    }
}

/// Newest-first, bounded.
#[derive(Debug, Clone, Default)]
pub struct OperationHistory {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
}

impl OperationHistory {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, entry: HistoryEntry) {
        self.entries.push_front(entry);
        self.entries.truncate(self.capacity);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.entries.iter().map(ToString::to_string).collect()
    }
}

struct NotifierState {
    status: Option<TransactionStatus>,
    history: OperationHistory,
    next_seq: u64,
}

pub struct Notifier {
    config: DashboardConfig,
    state: Mutex<NotifierState>,
    events: broadcast::Sender<DashboardEvent>,
}

impl Notifier {
    #[must_use]
    pub fn new(config: &DashboardConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_channel_capacity);
        Self {
            config: config.clone(),
            state: Mutex::new(NotifierState {
                status: None,
                history: OperationHistory::with_capacity(config.history_capacity),
                next_seq: 0,
            }),
            events,
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DashboardEvent> {
        self.events.subscribe()
    }

    pub fn publish(&self, event: DashboardEvent) {
        let name = event.name();
        // No subscribers is normal before the shell attaches.
        if self.events.send(event).is_err() {
            trace!(event = name, "no subscribers");
        }
    }

    /// Overwrites the status slot and returns the new sequence number.
    pub fn set_status(&self, phase: StatusPhase, message: impl Into<String>) -> u64 {
        let message = message.into();
        let expires_after_ms = self
            .config
            .status_duration(phase)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX));

        let status = {
            let Ok(mut state) = self.state.lock() else {
                warn!("notifier state poisoned, dropping status");
                return 0;
            };
            state.next_seq += 1;
            let status = TransactionStatus {
                phase,
                message,
                seq: state.next_seq,
                shown_at_ms: get_current_time_ms(),
                expires_after_ms,
            };
            state.status = Some(status.clone());
            status
        };

        debug!(seq = status.seq, phase = ?status.phase, message = %status.message, "status");
        let seq = status.seq;
        self.publish(DashboardEvent::StatusChanged(status));
        seq
    }

    pub fn pending(&self, message: impl Into<String>) -> u64 {
        self.set_status(StatusPhase::Pending, message)
    }

    pub fn success(&self, message: impl Into<String>) -> u64 {
        self.set_status(StatusPhase::Success, message)
    }

    pub fn error(&self, message: impl Into<String>) -> u64 {
        self.set_status(StatusPhase::Error, message)
    }

    pub fn info(&self, message: impl Into<String>) -> u64 {
        self.set_status(StatusPhase::Info, message)
    }

    /// Surfaces a rejected intent. Benign errors stay silent and in-progress
    /// rejections show as info rather than failure.
    pub fn report(&self, err: &AppError) -> Option<u64> {
        if err.is_benign() {
            debug!(error = %err, "benign error not surfaced");
            return None;
        }
        let message = err.user_facing_message();
        Some(if err.kind == ErrorKind::AlreadyInProgress {
            self.info(message)
        } else {
            self.error(message)
        })
    }

    #[must_use]
    pub fn status(&self) -> Option<TransactionStatus> {
        self.state.lock().ok().and_then(|state| state.status.clone())
    }

    /// Clears the slot if `seq` is still the one shown.
    pub fn expire(&self, seq: u64) -> bool {
        let cleared = match self.state.lock() {
            Ok(mut state) => {
                if state.status.as_ref().is_some_and(|status| status.seq == seq) {
                    state.status = None;
                    true
                } else {
                    false
                }
            }
            Err(_) => false,
        };
        if cleared {
            self.publish(DashboardEvent::StatusCleared { seq });
        }
        cleared
    }

    /// Clears the slot if its display time has elapsed. For shells that poll.
    pub fn expire_due(&self, now_ms: u64) -> bool {
        let due = self
            .status()
            .filter(|status| status.is_expired(now_ms))
            .map(|status| status.seq);
        due.is_some_and(|seq| self.expire(seq))
    }

    pub fn push_history(&self, message: impl Into<String>) {
        let entry = HistoryEntry {
            at_ms: get_current_time_ms(),
            message: message.into(),
        };
        if let Ok(mut state) = self.state.lock() {
            state.history.push(entry.clone());
        }
        self.publish(DashboardEvent::HistoryPushed(entry));
    }

    #[must_use]
    pub fn history(&self) -> OperationHistory {
        self.state
            .lock()
            .map(|state| state.history.clone())
            .unwrap_or_default()
    }

    /// Runs auto-hide on the tokio clock. Each status change schedules its
    /// own expiry; the task ends when the notifier is dropped.
    pub fn spawn_expiry_driver(self: &Arc<Self>) -> JoinHandle<()> {
        let mut events = self.subscribe();
        let notifier: Weak<Self> = Arc::downgrade(self);

        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(DashboardEvent::StatusChanged(status)) => {
                        let Some(after_ms) = status.expires_after_ms else {
                            continue;
                        };
                        let weak = notifier.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(Duration::from_millis(after_ms)).await;
                            if let Some(notifier) = weak.upgrade() {
                                notifier.expire(status.seq);
                            }
                        });
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "expiry driver lagged behind status events");
                        if let Some(notifier) = notifier.upgrade() {
                            notifier.expire_due(get_current_time_ms());
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}
