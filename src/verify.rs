//! Decrypt-and-prove for a single fence.
//!
//! A record moves Encrypted -> LocallyDecrypted -> Verified. The locally
//! decrypted value lives only in the open detail view and is wiped when the
//! view closes or another record is opened.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::capabilities::{
    ClearValuesEncoding, Collaborators, DecryptionProof, FheClient, LedgerError, LedgerReader,
    LedgerWriter, Session, TxReceipt, VerificationSubmitter,
};
use crate::event::DashboardEvent;
use crate::model::{FenceRecord, RecordKey};
use crate::notifier::Notifier;
use crate::sync::FenceListSynchronizer;
use crate::{mentions_already_verified, AppError, AppResult, ErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum VerificationState {
    Encrypted,
    LocallyDecrypted(i64),
    Verified(i64),
}

impl VerificationState {
    #[must_use]
    pub fn of(record: &FenceRecord, detail: Option<&DetailState>) -> Self {
        if let Some(value) = record.verified_value() {
            return Self::Verified(value);
        }
        let detail = detail.filter(|d| d.key == record.location_handle);
        match detail {
            Some(DetailState {
                confirmed_value: Some(value),
                ..
            }) => Self::Verified(*value),
            Some(DetailState {
                local_value: Some(value),
                ..
            }) => Self::LocallyDecrypted(*value),
            _ => Self::Encrypted,
        }
    }
}

/// Snapshot of the open detail view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetailState {
    pub key: RecordKey,
    pub local_value: Option<i64>,
    pub confirmed_value: Option<i64>,
}

struct DetailSession {
    key: RecordKey,
    token: u64,
    local_value: Option<Zeroizing<i64>>,
    confirmed_value: Option<i64>,
}

struct VerifyGuard<'a> {
    in_flight: &'a Mutex<HashSet<RecordKey>>,
    key: RecordKey,
}

impl Drop for VerifyGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut keys) = self.in_flight.lock() {
            keys.remove(&self.key);
        }
    }
}

enum Resolution {
    AlreadyVerified(i64),
    Decrypted(Zeroizing<i64>),
}

/// Submits the SDK's cleartexts and proof for one record and waits for the
/// transaction to land.
struct LedgerSubmitter {
    writer: Arc<dyn LedgerWriter>,
    notifier: Arc<Notifier>,
    key: RecordKey,
}

#[async_trait]
impl VerificationSubmitter for LedgerSubmitter {
    async fn submit(
        &self,
        clear_values: ClearValuesEncoding,
        proof: DecryptionProof,
    ) -> Result<TxReceipt, LedgerError> {
        self.notifier
            .pending("Verifying location decryption on-chain...");
        debug!(key = %self.key, proof = %proof.to_hex(), "submitting decryption proof");
        let tx = self
            .writer
            .submit_verification(&self.key, &clear_values, &proof)
            .await?;
        self.writer.wait_for_confirmation(&tx).await
    }
}

pub struct FenceVerificationController {
    reader: Arc<dyn LedgerReader>,
    writer: Arc<dyn LedgerWriter>,
    fhe: Arc<dyn FheClient>,
    session: Arc<dyn Session>,
    notifier: Arc<Notifier>,
    sync: Arc<FenceListSynchronizer>,
    detail: Mutex<Option<DetailSession>>,
    next_token: AtomicU64,
    in_flight: Mutex<HashSet<RecordKey>>,
}

impl FenceVerificationController {
    #[must_use]
    pub fn new(
        collaborators: &Collaborators,
        notifier: Arc<Notifier>,
        sync: Arc<FenceListSynchronizer>,
    ) -> Self {
        Self {
            reader: collaborators.reader.clone(),
            writer: collaborators.writer.clone(),
            fhe: collaborators.fhe.clone(),
            session: collaborators.session.clone(),
            notifier,
            sync,
            detail: Mutex::new(None),
            next_token: AtomicU64::new(0),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Opens the detail view for `key`, discarding whatever the previous view held.
    pub fn open_detail(&self, key: RecordKey) {
        let token = self.next_token.fetch_add(1, Ordering::SeqCst) + 1;
        if let Ok(mut detail) = self.detail.lock() {
            *detail = Some(DetailSession {
                key: key.clone(),
                token,
                local_value: None,
                confirmed_value: None,
            });
        }
        self.notifier
            .publish(DashboardEvent::DetailChanged { key: Some(key) });
    }

    pub fn close_detail(&self) {
        let closed = self
            .detail
            .lock()
            .map(|mut detail| detail.take().is_some())
            .unwrap_or(false);
        if closed {
            self.notifier
                .publish(DashboardEvent::DetailChanged { key: None });
        }
    }

    #[must_use]
    pub fn detail(&self) -> Option<DetailState> {
        self.detail.lock().ok().and_then(|detail| {
            detail.as_ref().map(|session| DetailState {
                key: session.key.clone(),
                local_value: session.local_value.as_deref().copied(),
                confirmed_value: session.confirmed_value,
            })
        })
    }

    #[must_use]
    pub fn is_verifying(&self, key: &RecordKey) -> bool {
        self.in_flight
            .lock()
            .map(|keys| keys.contains(key))
            .unwrap_or(false)
    }

    #[instrument(skip(self, key), fields(key = %key, op_id = %Uuid::new_v4()))]
    pub async fn verify(&self, key: &RecordKey) -> AppResult<Option<i64>> {
        if !self.session.is_connected() {
            let err = AppError::new(ErrorKind::NotConnected, "no active session");
            self.notifier.report(&err);
            return Err(err);
        }

        let _guard = match self.begin(key) {
            Ok(guard) => guard,
            Err(err) => {
                debug!(error = %err, "verification rejected");
                self.notifier.report(&err);
                return Err(err);
            }
        };
        let token = self.open_token(key);

        if self.toggle_local_value(key, token).await {
            debug!("local value hidden");
            return Ok(None);
        }

        self.notifier
            .publish(DashboardEvent::VerificationStarted { key: key.clone() });

        let result = match self.resolve(key).await {
            Ok(Resolution::AlreadyVerified(value)) => {
                info!("record already verified, skipping decryption");
                let listed_verified = self
                    .sync
                    .find(key)
                    .await
                    .is_some_and(|fence| fence.is_verified);
                if !listed_verified {
                    if let Err(e) = self.sync.reload().await {
                        warn!(error = %e, "reload of stale fence list failed");
                    }
                }
                self.update_detail(token, |session| session.confirmed_value = Some(value));
                self.notifier
                    .success("Location data already verified on-chain");
                Ok(Some(value))
            }
            Ok(Resolution::Decrypted(value)) => {
                info!("location decrypted and verified");
                if let Err(e) = self.sync.reload().await {
                    warn!(error = %e, "reload after verification failed");
                }
                self.notifier
                    .push_history("Decrypted and verified location data");
                self.notifier
                    .success("Location data decrypted and verified successfully!");
                let clear = *value;
                self.update_detail(token, |session| session.local_value = Some(value));
                Ok(Some(clear))
            }
            Err(err) if err.kind == ErrorKind::AlreadyVerifiedRace
                || mentions_already_verified(&err.message) =>
            {
                info!(error = %err, "record was verified concurrently");
                self.notifier
                    .success("Location data is already verified on-chain");
                if let Err(e) = self.sync.reload().await {
                    warn!(error = %e, "reload after verification race failed");
                }
                let stored = self
                    .sync
                    .find(key)
                    .await
                    .and_then(|fence| fence.verified_value());
                if let Some(value) = stored {
                    self.update_detail(token, |session| session.confirmed_value = Some(value));
                }
                Ok(stored)
            }
            Err(err) => {
                error!(error = %err, retryable = err.is_retryable(), "location verification failed");
                self.notifier
                    .error(format!("Location decryption failed: {}", err.message));
                Err(err)
            }
        };

        self.notifier.publish(DashboardEvent::VerificationFinished {
            key: key.clone(),
            verified: matches!(result, Ok(Some(_))),
        });
        result
    }

    fn begin(&self, key: &RecordKey) -> AppResult<VerifyGuard<'_>> {
        let mut keys = self
            .in_flight
            .lock()
            .map_err(|_| AppError::new(ErrorKind::Internal, "in-flight set poisoned"))?;
        if !keys.insert(key.clone()) {
            return Err(AppError::new(
                ErrorKind::AlreadyInProgress,
                format!("verification already running for {key}"),
            )
            .with_context("key", key.as_str()));
        }
        Ok(VerifyGuard {
            in_flight: &self.in_flight,
            key: key.clone(),
        })
    }

    /// Token of the detail view if it currently shows `key`.
    fn open_token(&self, key: &RecordKey) -> Option<u64> {
        self.detail.lock().ok().and_then(|detail| {
            detail
                .as_ref()
                .filter(|session| &session.key == key)
                .map(|session| session.token)
        })
    }

    fn update_detail(&self, token: Option<u64>, apply: impl FnOnce(&mut DetailSession)) {
        let Some(token) = token else {
            return;
        };
        let updated = self
            .detail
            .lock()
            .map(|mut detail| match detail.as_mut() {
                Some(session) if session.token == token => {
                    apply(session);
                    Some(session.key.clone())
                }
                _ => None,
            })
            .ok()
            .flatten();
        if let Some(key) = updated {
            self.notifier
                .publish(DashboardEvent::DetailChanged { key: Some(key) });
        }
    }

    async fn toggle_local_value(&self, key: &RecordKey, token: Option<u64>) -> bool {
        let Some(token) = token else {
            return false;
        };
        let verified = self
            .sync
            .find(key)
            .await
            .is_some_and(|fence| fence.is_verified);
        if verified {
            return false;
        }

        let cleared = self
            .detail
            .lock()
            .map(|mut detail| match detail.as_mut() {
                Some(session) if session.token == token && session.local_value.is_some() => {
                    session.local_value = None;
                    true
                }
                _ => false,
            })
            .unwrap_or(false);
        if cleared {
            self.notifier.publish(DashboardEvent::DetailChanged {
                key: Some(key.clone()),
            });
        }
        cleared
    }

    async fn resolve(&self, key: &RecordKey) -> AppResult<Resolution> {
        let record = self.reader.get_record(key).await?;
        if record.is_verified {
            return Ok(Resolution::AlreadyVerified(record.decrypted_value));
        }

        let handle = self.reader.get_encrypted_value_handle(key).await?;
        let contract = self.reader.contract_address().await?;
        let submitter = LedgerSubmitter {
            writer: self.writer.clone(),
            notifier: self.notifier.clone(),
            key: key.clone(),
        };

        let outcome = self
            .fhe
            .verify_decryption(std::slice::from_ref(&handle), &contract, &submitter)
            .await?;
        if let Some(receipt) = &outcome.receipt {
            debug!(tx = %receipt.hash, block = receipt.block_number, "verification confirmed");
        }

        outcome
            .clear_values
            .get(&handle)
            .map(|value| Resolution::Decrypted(Zeroizing::new(*value)))
            .ok_or_else(|| {
                AppError::new(
                    ErrorKind::DecryptionVerificationFailure,
                    "no clear value returned for the location handle",
                )
                .with_context("handle", handle.as_str())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::testing::LocalBackends;
    use crate::capabilities::LedgerRecord;
    use crate::config::DashboardConfig;
    use crate::model::{AccountAddress, CiphertextHandle};
    use crate::notifier::StatusPhase;

    struct Harness {
        backends: LocalBackends,
        notifier: Arc<Notifier>,
        sync: Arc<FenceListSynchronizer>,
        controller: FenceVerificationController,
    }

    async fn harness(verified: Option<i64>) -> (Harness, RecordKey) {
        let backends = LocalBackends::connected();
        let key = RecordKey::new("fence-1700000000000");
        let handle = CiphertextHandle::new("0xfeed");
        backends.ledger.insert_record(
            key.clone(),
            LedgerRecord {
                name: "Office".into(),
                timestamp_secs: crate::get_current_time_secs(),
                creator: AccountAddress::new(LocalBackends::ACCOUNT),
                public_value1: 120,
                public_value2: 0,
                is_verified: verified.is_some(),
                decrypted_value: verified.unwrap_or(0),
            },
            handle.clone(),
        );
        backends.fhe.register(handle, 37);

        let config = DashboardConfig::default();
        let collaborators = backends.collaborators();
        let notifier = Arc::new(Notifier::new(&config));
        let sync = Arc::new(FenceListSynchronizer::new(&collaborators, notifier.clone(), &config));
        sync.reload().await.unwrap();
        let controller = FenceVerificationController::new(&collaborators, notifier.clone(), sync.clone());
        (
            Harness {
                backends,
                notifier,
                sync,
                controller,
            },
            key,
        )
    }

    #[tokio::test]
    async fn decrypts_and_marks_verified() {
        let (h, key) = harness(None).await;
        h.controller.open_detail(key.clone());

        let value = h.controller.verify(&key).await.unwrap();
        assert_eq!(value, Some(37));

        let detail = h.controller.detail().unwrap();
        assert_eq!(detail.local_value, Some(37));
        let fence = h.sync.find(&key).await.unwrap();
        assert_eq!(fence.verified_value(), Some(37));
        assert_eq!(
            VerificationState::of(&fence, Some(&detail)),
            VerificationState::Verified(37)
        );
        assert_eq!(
            h.notifier.status().unwrap().message,
            "Location data decrypted and verified successfully!"
        );
        assert!(!h.controller.is_verifying(&key));
    }

    #[tokio::test]
    async fn already_verified_makes_no_protocol_calls() {
        let (h, key) = harness(Some(37)).await;
        h.controller.open_detail(key.clone());

        assert_eq!(h.controller.verify(&key).await.unwrap(), Some(37));
        assert_eq!(h.controller.detail().unwrap().confirmed_value, Some(37));
        assert_eq!(h.backends.fhe.calls.decryptions.load(Ordering::SeqCst), 0);
        assert_eq!(
            h.backends
                .ledger
                .calls
                .verification_submissions
                .load(Ordering::SeqCst),
            0
        );
        assert_eq!(
            h.notifier.status().unwrap().message,
            "Location data already verified on-chain"
        );
    }

    #[tokio::test]
    async fn concurrent_verification_is_a_success() {
        let (h, key) = harness(None).await;
        h.backends.ledger.set_race_verification(true);

        assert_eq!(h.controller.verify(&key).await.unwrap(), Some(37));
        let status = h.notifier.status().unwrap();
        assert_eq!(status.phase, StatusPhase::Success);
        assert_eq!(status.message, "Location data is already verified on-chain");
    }

    #[tokio::test]
    async fn failure_leaves_local_value_alone() {
        let (h, key) = harness(None).await;
        h.controller.open_detail(key.clone());
        h.backends.fhe.set_fail_decrypt(true);

        let err = h.controller.verify(&key).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::DecryptionVerificationFailure);
        assert!(h
            .notifier
            .status()
            .unwrap()
            .message
            .starts_with("Location decryption failed: "));
        assert_eq!(h.controller.detail().unwrap().local_value, None);
        assert!(!h.controller.is_verifying(&key));
    }

    #[tokio::test]
    async fn reopening_discards_local_value() {
        let (h, key) = harness(None).await;
        h.controller.open_detail(key.clone());
        h.controller.update_detail(h.controller.open_token(&key), |session| {
            session.local_value = Some(Zeroizing::new(37));
        });
        assert_eq!(h.controller.detail().unwrap().local_value, Some(37));

        h.controller.open_detail(key.clone());
        assert_eq!(h.controller.detail().unwrap().local_value, None);

        h.controller.close_detail();
        assert!(h.controller.detail().is_none());
    }
}
