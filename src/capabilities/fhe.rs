use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use super::ledger::{ClearValuesEncoding, DecryptionProof, LedgerError, TxReceipt};
use crate::model::{AccountAddress, CiphertextHandle, ContractAddress};
use crate::{AppError, ErrorKind};

/// Output of client-side encryption for a single plaintext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedInput {
    pub handle: CiphertextHandle,
    pub input_proof: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptionOutcome {
    pub clear_values: HashMap<CiphertextHandle, i64>,
    pub receipt: Option<TxReceipt>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FheError {
    #[error("FHE client is not initialized")]
    NotInitialized,

    #[error("FHE initialization failed: {0}")]
    Initialization(String),

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("decryption failed: {0}")]
    Decryption(String),

    #[error("{0}")]
    Submission(#[from] LedgerError),
}

impl FheError {
    #[must_use]
    pub fn is_already_verified(&self) -> bool {
        match self {
            Self::Submission(e) => e.is_already_verified(),
            Self::Decryption(msg) => crate::mentions_already_verified(msg),
            _ => false,
        }
    }
}

impl From<FheError> for AppError {
    fn from(e: FheError) -> Self {
        match e {
            FheError::Submission(ledger) => ledger.into(),
            FheError::NotInitialized | FheError::Initialization(_) => {
                AppError::new(ErrorKind::FheNotReady, e.to_string())
            }
            FheError::Encryption(_) => AppError::new(ErrorKind::EncryptionFailure, e.to_string()),
            FheError::Decryption(_) if e.is_already_verified() => {
                AppError::new(ErrorKind::AlreadyVerifiedRace, e.to_string())
            }
            FheError::Decryption(_) => {
                AppError::new(ErrorKind::DecryptionVerificationFailure, e.to_string())
            }
        }
    }
}

/// On-chain half of the decrypt-and-prove protocol. The SDK calls this
/// once it holds cleartexts and a proof for the requested handles.
#[async_trait]
pub trait VerificationSubmitter: Send + Sync {
    async fn submit(
        &self,
        clear_values: ClearValuesEncoding,
        proof: DecryptionProof,
    ) -> Result<TxReceipt, LedgerError>;
}

/// Client FHE SDK.
#[async_trait]
pub trait FheClient: Send + Sync {
    async fn initialize(&self) -> Result<(), FheError>;

    fn is_initialized(&self) -> bool;

    async fn encrypt(
        &self,
        contract: &ContractAddress,
        account: &AccountAddress,
        plaintext: i64,
    ) -> Result<EncryptedInput, FheError>;

    /// Requests cleartexts and a proof for `handles`, then hands both to
    /// `submitter`. Fails with `FheError::Submission` if the submitter does.
    async fn verify_decryption(
        &self,
        handles: &[CiphertextHandle],
        contract: &ContractAddress,
        submitter: &dyn VerificationSubmitter,
    ) -> Result<DecryptionOutcome, FheError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submission_race_maps_to_benign_kind() {
        let err: AppError = FheError::Submission(LedgerError::AlreadyVerified).into();
        assert_eq!(err.kind, ErrorKind::AlreadyVerifiedRace);
        assert!(err.is_benign());
    }

    #[test]
    fn decryption_failure_kind() {
        let err: AppError = FheError::Decryption("relayer timeout".into()).into();
        assert_eq!(err.kind, ErrorKind::DecryptionVerificationFailure);
    }

    #[test]
    fn encryption_failure_kind() {
        let err: AppError = FheError::Encryption("bad key".into()).into();
        assert_eq!(err.kind, ErrorKind::EncryptionFailure);
    }
}
