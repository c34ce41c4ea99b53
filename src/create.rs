use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::capabilities::{
    Collaborators, CreateRecordRequest, FheClient, LedgerReader, LedgerWriter, Session,
};
use crate::config::DashboardConfig;
use crate::event::DashboardEvent;
use crate::model::{AccountAddress, FenceForm, RecordKey, ValidatedFence};
use crate::notifier::Notifier;
use crate::sync::FenceListSynchronizer;
use crate::{get_current_time_ms, AppError, AppResult, ErrorKind};

struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Encrypt, submit, confirm, reload.
pub struct FenceCreationWorkflow {
    reader: Arc<dyn LedgerReader>,
    writer: Arc<dyn LedgerWriter>,
    fhe: Arc<dyn FheClient>,
    session: Arc<dyn Session>,
    notifier: Arc<Notifier>,
    sync: Arc<FenceListSynchronizer>,
    config: DashboardConfig,
    creating: AtomicBool,
}

impl FenceCreationWorkflow {
    #[must_use]
    pub fn new(
        collaborators: &Collaborators,
        notifier: Arc<Notifier>,
        sync: Arc<FenceListSynchronizer>,
        config: &DashboardConfig,
    ) -> Self {
        Self {
            reader: collaborators.reader.clone(),
            writer: collaborators.writer.clone(),
            fhe: collaborators.fhe.clone(),
            session: collaborators.session.clone(),
            notifier,
            sync,
            config: config.clone(),
            creating: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn is_creating(&self) -> bool {
        self.creating.load(Ordering::SeqCst)
    }

    #[instrument(skip(self, form), fields(op_id = %Uuid::new_v4()))]
    pub async fn create(&self, form: &FenceForm) -> AppResult<RecordKey> {
        let Some(account) = self.session.account() else {
            let err = AppError::new(ErrorKind::NotConnected, "no active session");
            self.notifier.report(&err);
            return Err(err);
        };

        let fence = match form.validate(&self.config) {
            Ok(fence) => fence,
            Err(e) => {
                warn!(error = %e, "fence form rejected");
                self.notifier.error(e.to_string());
                return Err(e.into());
            }
        };

        if self.creating.swap(true, Ordering::SeqCst) {
            let err = AppError::new(
                ErrorKind::AlreadyInProgress,
                "a geofence is already being created",
            );
            self.notifier.report(&err);
            return Err(err);
        }
        let _creating = InFlight(&self.creating);

        self.notifier.pending("Creating encrypted geofence...");

        match self.submit(&account, fence).await {
            Ok(key) => {
                self.notifier.success("Geofence created successfully!");
                self.notifier.push_history("Created new encrypted geofence");
                if let Err(e) = self.sync.reload().await {
                    warn!(key = %key, error = %e, "reload after creation failed");
                }
                self.notifier.publish(DashboardEvent::CreationFinished {
                    key: Some(key.clone()),
                });
                Ok(key)
            }
            Err(err) => {
                error!(error = %err, retryable = err.is_retryable(), "fence creation failed");
                let message = if err.kind == ErrorKind::TransactionRejected {
                    "Transaction rejected by user".to_string()
                } else {
                    format!("Submission failed: {}", err.message)
                };
                self.notifier.error(message);
                self.notifier
                    .publish(DashboardEvent::CreationFinished { key: None });
                Err(err)
            }
        }
    }

    async fn submit(&self, account: &AccountAddress, fence: ValidatedFence) -> AppResult<RecordKey> {
        let contract = self.reader.contract_address().await?;
        let encrypted = self.fhe.encrypt(&contract, account, *fence.latitude).await?;

        let key = RecordKey::generate(get_current_time_ms());
        let tx = self
            .writer
            .create_record(CreateRecordRequest {
                key: key.clone(),
                name: fence.name.clone(),
                ciphertext: encrypted.handle,
                input_proof: encrypted.input_proof,
                public_value1: fence.radius,
                public_value2: self.config.secondary_value,
                label: self.config.record_label.clone(),
            })
            .await?;

        self.notifier.pending("Waiting for transaction confirmation...");
        let receipt = self.writer.wait_for_confirmation(&tx).await?;

        info!(
            key = %key,
            tx = %receipt.hash,
            block = receipt.block_number,
            radius = fence.radius,
            "fence created"
        );
        Ok(key)
    }
}
