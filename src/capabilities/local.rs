//! In-process ledger and FHE client.
//!
//! These back the development shell and the test suite. The ledger keeps the
//! contract's observable rules (duplicate keys revert, a second verification
//! reverts with "Data already verified", proofs must match the submitted
//! cleartexts) and the FHE client keeps plaintexts keyed by handle. Both expose
//! failure switches and call counters.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::Notify;
use tracing::debug;

use super::fhe::{DecryptionOutcome, EncryptedInput, FheClient, FheError, VerificationSubmitter};
use super::ledger::{
    ClearValuesEncoding, CreateRecordRequest, DecryptionProof, LedgerError, LedgerReader,
    LedgerRecord, LedgerWriter, PendingTx, TxReceipt,
};
use crate::get_current_time_secs;
use crate::model::{AccountAddress, CiphertextHandle, ContractAddress, RecordKey, TxHash};

/// Digest binding a set of handles to their cleartext encoding.
#[must_use]
pub fn proof_digest(handles: &[CiphertextHandle], clear_values: &ClearValuesEncoding) -> DecryptionProof {
    let mut hasher = blake3::Hasher::new();
    for handle in handles {
        hasher.update(handle.as_str().as_bytes());
        hasher.update(&[0]);
    }
    hasher.update(&clear_values.0);
    DecryptionProof(Bytes::copy_from_slice(hasher.finalize().as_bytes()))
}

fn lock_poisoned() -> LedgerError {
    LedgerError::Transport("local ledger state poisoned".into())
}

#[derive(Debug, Clone)]
struct StoredRecord {
    record: LedgerRecord,
    handle: CiphertextHandle,
}

#[derive(Debug, Clone)]
enum PendingEffect {
    Create(CreateRecordRequest),
    Verify { key: RecordKey, value: i64 },
}

#[derive(Debug, Default)]
struct LedgerState {
    records: BTreeMap<RecordKey, StoredRecord>,
    pending: HashMap<TxHash, PendingEffect>,
    block_number: u64,
}

#[derive(Debug, Default)]
pub struct LedgerCallCounts {
    pub list_calls: AtomicUsize,
    pub record_reads: AtomicUsize,
    pub handle_reads: AtomicUsize,
    pub creates: AtomicUsize,
    pub verification_submissions: AtomicUsize,
}

#[derive(Debug, Default)]
struct LedgerFaults {
    unavailable: AtomicBool,
    paused: AtomicBool,
    fail_list: AtomicBool,
    failing_records: Mutex<HashSet<RecordKey>>,
    reject_signatures: AtomicBool,
    revert_creates: AtomicBool,
    race_verification: AtomicBool,
}

#[derive(Debug)]
pub struct LocalLedger {
    contract: ContractAddress,
    signer: AccountAddress,
    state: Mutex<LedgerState>,
    faults: LedgerFaults,
    tx_counter: AtomicU64,
    pub calls: LedgerCallCounts,
}

impl LocalLedger {
    #[must_use]
    pub fn new(contract: ContractAddress, signer: AccountAddress) -> Self {
        Self {
            contract,
            signer,
            state: Mutex::new(LedgerState::default()),
            faults: LedgerFaults::default(),
            tx_counter: AtomicU64::new(0),
            calls: LedgerCallCounts::default(),
        }
    }

    /// Seeds a record directly, bypassing the transaction path.
    pub fn insert_record(&self, key: RecordKey, record: LedgerRecord, handle: CiphertextHandle) {
        if let Ok(mut state) = self.state.lock() {
            state.records.insert(key, StoredRecord { record, handle });
        }
    }

    /// Marks a record verified as if another account had done it.
    pub fn verify_externally(&self, key: &RecordKey, value: i64) {
        if let Ok(mut state) = self.state.lock() {
            if let Some(stored) = state.records.get_mut(key) {
                stored.record.is_verified = true;
                stored.record.decrypted_value = value;
            }
        }
    }

    #[must_use]
    pub fn record(&self, key: &RecordKey) -> Option<LedgerRecord> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.records.get(key).map(|s| s.record.clone()))
    }

    #[must_use]
    pub fn record_count(&self) -> usize {
        self.state.lock().map(|state| state.records.len()).unwrap_or(0)
    }

    pub fn set_unavailable(&self, on: bool) {
        self.faults.unavailable.store(on, Ordering::SeqCst);
    }

    /// `is_available` answers `false` without failing.
    pub fn set_paused(&self, on: bool) {
        self.faults.paused.store(on, Ordering::SeqCst);
    }

    pub fn set_fail_list(&self, on: bool) {
        self.faults.fail_list.store(on, Ordering::SeqCst);
    }

    pub fn fail_record_reads(&self, key: RecordKey) {
        if let Ok(mut keys) = self.faults.failing_records.lock() {
            keys.insert(key);
        }
    }

    pub fn set_reject_signatures(&self, on: bool) {
        self.faults.reject_signatures.store(on, Ordering::SeqCst);
    }

    pub fn set_revert_creates(&self, on: bool) {
        self.faults.revert_creates.store(on, Ordering::SeqCst);
    }

    /// Another party verifies the record between our read and our submission.
    pub fn set_race_verification(&self, on: bool) {
        self.faults.race_verification.store(on, Ordering::SeqCst);
    }

    fn next_tx(&self) -> TxHash {
        let n = self.tx_counter.fetch_add(1, Ordering::SeqCst) + 1;
        TxHash::new(format!("0x{}", hex::encode(n.to_be_bytes())))
    }

    fn check_signature(&self) -> Result<(), LedgerError> {
        if self.faults.reject_signatures.load(Ordering::SeqCst) {
            return Err(LedgerError::from_provider_message(
                "user rejected transaction",
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerReader for LocalLedger {
    async fn list_record_ids(&self) -> Result<Vec<RecordKey>, LedgerError> {
        self.calls.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.faults.fail_list.load(Ordering::SeqCst) {
            return Err(LedgerError::Transport("getAllBusinessIds failed".into()));
        }
        let state = self.state.lock().map_err(|_| lock_poisoned())?;
        Ok(state.records.keys().cloned().collect())
    }

    async fn get_record(&self, key: &RecordKey) -> Result<LedgerRecord, LedgerError> {
        self.calls.record_reads.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .faults
            .failing_records
            .lock()
            .map(|keys| keys.contains(key))
            .unwrap_or(false);
        if failing {
            return Err(LedgerError::Transport(format!("getBusinessData({key}) failed")));
        }
        let state = self.state.lock().map_err(|_| lock_poisoned())?;
        state
            .records
            .get(key)
            .map(|s| s.record.clone())
            .ok_or_else(|| LedgerError::NotFound(key.clone()))
    }

    async fn get_encrypted_value_handle(
        &self,
        key: &RecordKey,
    ) -> Result<CiphertextHandle, LedgerError> {
        self.calls.handle_reads.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().map_err(|_| lock_poisoned())?;
        state
            .records
            .get(key)
            .map(|s| s.handle.clone())
            .ok_or_else(|| LedgerError::NotFound(key.clone()))
    }

    async fn is_available(&self) -> Result<bool, LedgerError> {
        if self.faults.unavailable.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("isAvailable reverted".into()));
        }
        Ok(!self.faults.paused.load(Ordering::SeqCst))
    }

    async fn contract_address(&self) -> Result<ContractAddress, LedgerError> {
        Ok(self.contract.clone())
    }
}

#[async_trait]
impl LedgerWriter for LocalLedger {
    async fn create_record(&self, request: CreateRecordRequest) -> Result<PendingTx, LedgerError> {
        self.calls.creates.fetch_add(1, Ordering::SeqCst);
        self.check_signature()?;
        if self.faults.revert_creates.load(Ordering::SeqCst) {
            return Err(LedgerError::Reverted("createBusinessData reverted".into()));
        }

        let hash = self.next_tx();
        let mut state = self.state.lock().map_err(|_| lock_poisoned())?;
        if state.records.contains_key(&request.key) {
            return Err(LedgerError::Reverted(format!(
                "Business data already exists: {}",
                request.key
            )));
        }
        state
            .pending
            .insert(hash.clone(), PendingEffect::Create(request));
        Ok(PendingTx { hash })
    }

    async fn submit_verification(
        &self,
        key: &RecordKey,
        clear_values: &ClearValuesEncoding,
        proof: &DecryptionProof,
    ) -> Result<PendingTx, LedgerError> {
        self.calls
            .verification_submissions
            .fetch_add(1, Ordering::SeqCst);
        self.check_signature()?;

        let values = clear_values.decode()?;
        let hash = self.next_tx();
        let mut state = self.state.lock().map_err(|_| lock_poisoned())?;

        if self.faults.race_verification.load(Ordering::SeqCst) {
            if let (Some(stored), Some(value)) = (state.records.get_mut(key), values.first()) {
                stored.record.is_verified = true;
                stored.record.decrypted_value = *value;
            }
        }

        let stored = state
            .records
            .get(key)
            .ok_or_else(|| LedgerError::NotFound(key.clone()))?;
        if stored.record.is_verified {
            return Err(LedgerError::from_provider_message(
                "execution reverted: Data already verified",
            ));
        }
        if proof_digest(std::slice::from_ref(&stored.handle), clear_values) != *proof {
            return Err(LedgerError::Reverted("Invalid decryption proof".into()));
        }
        let value = *values
            .first()
            .ok_or_else(|| LedgerError::Reverted("empty clear values".into()))?;

        state.pending.insert(
            hash.clone(),
            PendingEffect::Verify {
                key: key.clone(),
                value,
            },
        );
        Ok(PendingTx { hash })
    }

    async fn wait_for_confirmation(&self, tx: &PendingTx) -> Result<TxReceipt, LedgerError> {
        let mut state = self.state.lock().map_err(|_| lock_poisoned())?;
        let effect = state
            .pending
            .remove(&tx.hash)
            .ok_or_else(|| LedgerError::Transport(format!("unknown transaction {}", tx.hash)))?;

        match effect {
            PendingEffect::Create(request) => {
                let record = LedgerRecord {
                    name: request.name,
                    timestamp_secs: get_current_time_secs(),
                    creator: self.signer.clone(),
                    public_value1: request.public_value1,
                    public_value2: request.public_value2,
                    is_verified: false,
                    decrypted_value: 0,
                };
                state.records.insert(
                    request.key,
                    StoredRecord {
                        record,
                        handle: request.ciphertext,
                    },
                );
            }
            PendingEffect::Verify { key, value } => {
                let stored = state
                    .records
                    .get_mut(&key)
                    .ok_or_else(|| LedgerError::NotFound(key.clone()))?;
                if stored.record.is_verified {
                    return Err(LedgerError::AlreadyVerified);
                }
                stored.record.is_verified = true;
                stored.record.decrypted_value = value;
            }
        }

        state.block_number += 1;
        debug!(tx = %tx.hash, block = state.block_number, "local transaction mined");
        Ok(TxReceipt {
            hash: tx.hash.clone(),
            block_number: state.block_number,
        })
    }
}

#[derive(Debug, Default)]
pub struct FheCallCounts {
    pub encryptions: AtomicUsize,
    pub decryptions: AtomicUsize,
}

#[derive(Debug, Default)]
pub struct LocalFhe {
    initialized: AtomicBool,
    fail_init: AtomicBool,
    fail_encrypt: AtomicBool,
    fail_decrypt: AtomicBool,
    hold_decryptions: AtomicBool,
    plaintexts: Mutex<HashMap<CiphertextHandle, i64>>,
    handle_counter: AtomicU64,
    entered: Notify,
    release: Notify,
    pub calls: FheCallCounts,
}

impl LocalFhe {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn initialized() -> Self {
        let fhe = Self::default();
        fhe.initialized.store(true, Ordering::SeqCst);
        fhe
    }

    /// Makes a handle decryptable, for records seeded straight into the ledger.
    pub fn register(&self, handle: CiphertextHandle, plaintext: i64) {
        if let Ok(mut map) = self.plaintexts.lock() {
            map.insert(handle, plaintext);
        }
    }

    pub fn set_fail_init(&self, on: bool) {
        self.fail_init.store(on, Ordering::SeqCst);
    }

    pub fn set_fail_encrypt(&self, on: bool) {
        self.fail_encrypt.store(on, Ordering::SeqCst);
    }

    pub fn set_fail_decrypt(&self, on: bool) {
        self.fail_decrypt.store(on, Ordering::SeqCst);
    }

    /// Parks every decryption request until [`LocalFhe::release_one`].
    pub fn set_hold_decryptions(&self, on: bool) {
        self.hold_decryptions.store(on, Ordering::SeqCst);
    }

    pub fn release_one(&self) {
        self.release.notify_one();
    }

    /// Resolves once a decryption request has started.
    pub async fn decryption_started(&self) {
        self.entered.notified().await;
    }

    fn require_initialized(&self) -> Result<(), FheError> {
        if self.initialized.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(FheError::NotInitialized)
        }
    }
}

#[async_trait]
impl FheClient for LocalFhe {
    async fn initialize(&self) -> Result<(), FheError> {
        if self.fail_init.load(Ordering::SeqCst) {
            return Err(FheError::Initialization("relayer unreachable".into()));
        }
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    async fn encrypt(
        &self,
        contract: &ContractAddress,
        account: &AccountAddress,
        plaintext: i64,
    ) -> Result<EncryptedInput, FheError> {
        self.calls.encryptions.fetch_add(1, Ordering::SeqCst);
        self.require_initialized()?;
        if self.fail_encrypt.load(Ordering::SeqCst) {
            return Err(FheError::Encryption("public key fetch failed".into()));
        }

        let n = self.handle_counter.fetch_add(1, Ordering::SeqCst);
        let mut hasher = blake3::Hasher::new();
        hasher.update(contract.as_str().as_bytes());
        hasher.update(account.as_str().as_bytes());
        hasher.update(&n.to_be_bytes());
        let digest = hasher.finalize();

        let handle = CiphertextHandle::new(format!("0x{}", digest.to_hex()));
        let input_proof = Bytes::copy_from_slice(blake3::hash(handle.as_str().as_bytes()).as_bytes());

        self.plaintexts
            .lock()
            .map_err(|_| FheError::Encryption("plaintext table poisoned".into()))?
            .insert(handle.clone(), plaintext);

        Ok(EncryptedInput {
            handle,
            input_proof,
        })
    }

    async fn verify_decryption(
        &self,
        handles: &[CiphertextHandle],
        _contract: &ContractAddress,
        submitter: &dyn VerificationSubmitter,
    ) -> Result<DecryptionOutcome, FheError> {
        self.calls.decryptions.fetch_add(1, Ordering::SeqCst);
        self.require_initialized()?;
        self.entered.notify_one();

        if self.hold_decryptions.load(Ordering::SeqCst) {
            self.release.notified().await;
        }
        if self.fail_decrypt.load(Ordering::SeqCst) {
            return Err(FheError::Decryption("relayer returned 503".into()));
        }

        let clear_values: HashMap<CiphertextHandle, i64> = {
            let map = self
                .plaintexts
                .lock()
                .map_err(|_| FheError::Decryption("plaintext table poisoned".into()))?;
            handles
                .iter()
                .map(|h| {
                    map.get(h)
                        .map(|v| (h.clone(), *v))
                        .ok_or_else(|| FheError::Decryption(format!("unknown handle {h}")))
                })
                .collect::<Result<_, _>>()?
        };

        let ordered: Vec<i64> = handles.iter().map(|h| clear_values[h]).collect();
        let encoding = ClearValuesEncoding::encode(&ordered);
        let proof = proof_digest(handles, &encoding);

        let receipt = submitter.submit(encoding, proof).await?;

        Ok(DecryptionOutcome {
            clear_values,
            receipt: Some(receipt),
        })
    }
}
