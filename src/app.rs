//! Dashboard facade. Shells drive it with user intents and render the
//! [`ViewModel`] it produces; everything else flows through the event channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::capabilities::Collaborators;
use crate::config::{ConfigError, DashboardConfig};
use crate::create::FenceCreationWorkflow;
use crate::event::DashboardEvent;
use crate::model::{ContractAddress, FenceForm, FormField, RecordKey};
use crate::notifier::Notifier;
use crate::sync::{FenceListSynchronizer, ReloadOutcome};
use crate::verify::FenceVerificationController;
use crate::view::{self, StatsView, StatusView, ViewModel};
use crate::{get_current_time_ms, AppError, AppResult, ErrorKind};

struct Initializing<'a>(&'a AtomicBool);

impl Drop for Initializing<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct Dashboard {
    collaborators: Collaborators,
    config: DashboardConfig,
    notifier: Arc<Notifier>,
    sync: Arc<FenceListSynchronizer>,
    creator: FenceCreationWorkflow,
    verifier: FenceVerificationController,
    form: Mutex<FenceForm>,
    create_panel_open: AtomicBool,
    fhe_initializing: AtomicBool,
    contract: Mutex<Option<ContractAddress>>,
}

impl Dashboard {
    pub fn new(collaborators: Collaborators, config: DashboardConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let notifier = Arc::new(Notifier::new(&config));
        let sync = Arc::new(FenceListSynchronizer::new(
            &collaborators,
            notifier.clone(),
            &config,
        ));
        let creator =
            FenceCreationWorkflow::new(&collaborators, notifier.clone(), sync.clone(), &config);
        let verifier = FenceVerificationController::new(&collaborators, notifier.clone(), sync.clone());

        Ok(Self {
            collaborators,
            config,
            notifier,
            sync,
            creator,
            verifier,
            form: Mutex::new(FenceForm::default()),
            create_panel_open: AtomicBool::new(false),
            fhe_initializing: AtomicBool::new(false),
            contract: Mutex::new(None),
        })
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DashboardEvent> {
        self.notifier.subscribe()
    }

    /// Starts status auto-hide on the current tokio runtime.
    #[must_use]
    pub fn spawn_status_expiry(&self) -> JoinHandle<()> {
        self.notifier.spawn_expiry_driver()
    }

    /// Call whenever the wallet connects, disconnects or switches account.
    #[instrument(skip(self))]
    pub async fn session_changed(&self) -> AppResult<()> {
        if !self.collaborators.session.is_connected() {
            self.verifier.close_detail();
            self.sync.clear().await;
            if let Ok(mut contract) = self.contract.lock() {
                *contract = None;
            }
            info!("session ended, dashboard cleared");
            return Ok(());
        }

        self.ensure_fhe_initialized().await;

        match self.collaborators.reader.contract_address().await {
            Ok(address) => {
                info!(contract = %address, "contract address resolved");
                if let Ok(mut contract) = self.contract.lock() {
                    *contract = Some(address);
                }
            }
            Err(e) => warn!(error = %e, "contract address lookup failed"),
        }

        self.sync.reload().await.map(|_| ())
    }

    async fn ensure_fhe_initialized(&self) {
        if self.collaborators.fhe.is_initialized()
            || self.fhe_initializing.swap(true, Ordering::SeqCst)
        {
            return;
        }
        let _initializing = Initializing(&self.fhe_initializing);

        match self.collaborators.fhe.initialize().await {
            Ok(()) => {
                info!("FHE client initialized");
                self.notifier
                    .push_history("FHE client initialized successfully");
            }
            Err(e) => {
                error!(error = %e, "FHE initialization failed");
                self.notifier
                    .error("FHE initialization failed. Please check your wallet connection.");
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn test_availability(&self) -> AppResult<bool> {
        if !self.collaborators.session.is_connected() {
            let err = AppError::new(ErrorKind::NotConnected, "no active session");
            self.notifier.report(&err);
            return Err(err);
        }

        match self.collaborators.reader.is_available().await {
            Ok(true) => {
                self.notifier.success("FHE System is available and ready!");
                self.notifier
                    .push_history("Tested FHE system availability - Success");
                Ok(true)
            }
            Ok(false) => {
                debug!("contract reports FHE system unavailable");
                Ok(false)
            }
            Err(e) => {
                warn!(error = %e, "availability check failed");
                self.notifier.error("FHE System test failed");
                Err(e.into())
            }
        }
    }

    pub fn open_detail(&self, key: RecordKey) {
        self.verifier.open_detail(key);
    }

    pub fn close_detail(&self) {
        self.verifier.close_detail();
    }

    pub async fn verify(&self, key: &RecordKey) -> AppResult<Option<i64>> {
        self.verifier.verify(key).await
    }

    /// Runs verification for the record shown in the detail view.
    pub async fn verify_selected(&self) -> AppResult<Option<i64>> {
        let Some(detail) = self.verifier.detail() else {
            return Err(AppError::new(ErrorKind::InvalidState, "no fence selected"));
        };
        self.verifier.verify(&detail.key).await
    }

    pub async fn refresh(&self) -> AppResult<ReloadOutcome> {
        self.sync.reload().await
    }

    pub fn set_form_field(&self, field: FormField, value: &str) {
        if let Ok(mut form) = self.form.lock() {
            form.set_field(field, value);
        }
    }

    pub fn open_create_panel(&self) {
        self.create_panel_open.store(true, Ordering::SeqCst);
    }

    pub fn close_create_panel(&self) {
        self.create_panel_open.store(false, Ordering::SeqCst);
    }

    /// Submits the form. On success the form is cleared and the panel closed;
    /// on failure both are left as they were so the user can retry.
    pub async fn submit_form(&self) -> AppResult<RecordKey> {
        let mut form = self
            .form
            .lock()
            .map(|form| form.clone())
            .map_err(|_| AppError::new(ErrorKind::Internal, "form state poisoned"))?;

        let result = self.creator.create(&form).await;
        form.reset();

        if result.is_ok() {
            if let Ok(mut current) = self.form.lock() {
                current.reset();
            }
            self.close_create_panel();
        }
        result
    }

    pub async fn view(&self) -> ViewModel {
        let now_ms = get_current_time_ms();
        let account = self.collaborators.session.account();
        let fhe_ready = self.collaborators.fhe.is_initialized();
        let fences = self.sync.fences().await;
        let stats = self.sync.stats().await;
        let detail = self.verifier.detail();
        let selected = detail.as_ref().map(|d| d.key.clone());

        let detail_view = detail.as_ref().and_then(|detail| {
            fences
                .iter()
                .find(|f| f.location_handle == detail.key)
                .map(|fence| {
                    view::detail_view(
                        fence,
                        detail,
                        &self.config.record_label,
                        self.verifier.is_verifying(&detail.key),
                        now_ms,
                    )
                })
        });

        let form = self
            .form
            .lock()
            .map(|form| {
                view::form_view(
                    &form,
                    self.create_panel_open.load(Ordering::SeqCst),
                    self.creator.is_creating(),
                    fhe_ready,
                )
            })
            .unwrap_or_else(|_| {
                view::form_view(&FenceForm::default(), false, self.creator.is_creating(), fhe_ready)
            });

        ViewModel {
            connected: account.is_some(),
            account: account.map(|a| a.to_string()),
            contract_address: self
                .contract
                .lock()
                .ok()
                .and_then(|c| c.as_ref().map(ToString::to_string)),
            fhe_ready,
            refreshing: self.sync.is_refreshing(),
            stats: StatsView::from(&stats),
            fences: fences
                .iter()
                .map(|f| view::list_item(f, selected.as_ref() == Some(&f.location_handle), now_ms))
                .collect(),
            detail: detail_view,
            form,
            status: self.notifier.status().as_ref().map(StatusView::from),
            history: self.notifier.history().lines(),
        }
    }
}
