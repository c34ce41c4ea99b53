use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{AccountAddress, CiphertextHandle, ContractAddress, RecordKey, TxHash};
use crate::{mentions_already_verified, AppError, ErrorKind};

/// Record fields as the contract returns them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub name: String,
    pub timestamp_secs: u64,
    pub creator: AccountAddress,
    pub public_value1: u32,
    pub public_value2: u32,
    pub is_verified: bool,
    /// Meaningful only when `is_verified`; the contract reports 0 otherwise.
    pub decrypted_value: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRecordRequest {
    pub key: RecordKey,
    pub name: String,
    pub ciphertext: CiphertextHandle,
    pub input_proof: Bytes,
    pub public_value1: u32,
    pub public_value2: u32,
    pub label: String,
}

/// ABI-style encoding of decrypted values, as produced by the FHE SDK.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearValuesEncoding(pub Bytes);

impl ClearValuesEncoding {
    const WORD: usize = 32;

    /// One big-endian two's complement word per value.
    #[must_use]
    pub fn encode(values: &[i64]) -> Self {
        let mut out = Vec::with_capacity(values.len() * Self::WORD);
        for value in values {
            let fill = if *value < 0 { 0xff } else { 0x00 };
            out.extend(std::iter::repeat(fill).take(Self::WORD - 8));
            out.extend_from_slice(&value.to_be_bytes());
        }
        Self(Bytes::from(out))
    }

    pub fn decode(&self) -> Result<Vec<i64>, LedgerError> {
        if self.0.len() % Self::WORD != 0 {
            return Err(LedgerError::Reverted(format!(
                "malformed clear values: {} bytes",
                self.0.len()
            )));
        }
        self.0
            .chunks(Self::WORD)
            .map(|word| {
                let mut tail = [0u8; 8];
                tail.copy_from_slice(&word[Self::WORD - 8..]);
                Ok(i64::from_be_bytes(tail))
            })
            .collect()
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.0))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptionProof(pub Bytes);

impl DecryptionProof {
    #[must_use]
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.0))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PendingTx {
    pub hash: TxHash,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub hash: TxHash,
    pub block_number: u64,
}

#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerError {
    #[error("user rejected transaction")]
    UserRejected,

    #[error("Data already verified")]
    AlreadyVerified,

    #[error("transaction reverted: {0}")]
    Reverted(String),

    #[error("record not found: {0}")]
    NotFound(RecordKey),

    #[error("contract unavailable: {0}")]
    Unavailable(String),

    #[error("transport error: {0}")]
    Transport(String),
}

impl LedgerError {
    /// Classifies a raw provider/wallet error message.
    #[must_use]
    pub fn from_provider_message(message: &str) -> Self {
        let lower = message.to_ascii_lowercase();
        if lower.contains("user rejected") || lower.contains("user denied") {
            Self::UserRejected
        } else if mentions_already_verified(&lower) {
            Self::AlreadyVerified
        } else {
            Self::Reverted(message.to_string())
        }
    }

    #[must_use]
    pub fn is_already_verified(&self) -> bool {
        match self {
            Self::AlreadyVerified => true,
            Self::Reverted(msg) | Self::Transport(msg) => mentions_already_verified(msg),
            _ => false,
        }
    }
}

impl From<LedgerError> for AppError {
    fn from(e: LedgerError) -> Self {
        let kind = match &e {
            LedgerError::UserRejected => ErrorKind::TransactionRejected,
            _ if e.is_already_verified() => ErrorKind::AlreadyVerifiedRace,
            LedgerError::Reverted(_) => ErrorKind::TransactionFailure,
            LedgerError::NotFound(_) => ErrorKind::InvalidState,
            LedgerError::Unavailable(_) | LedgerError::Transport(_) => {
                ErrorKind::LedgerUnavailable
            }
            LedgerError::AlreadyVerified => ErrorKind::AlreadyVerifiedRace,
        };
        AppError::new(kind, e.to_string())
    }
}

/// Read-only contract handle.
#[async_trait]
pub trait LedgerReader: Send + Sync {
    async fn list_record_ids(&self) -> Result<Vec<RecordKey>, LedgerError>;

    async fn get_record(&self, key: &RecordKey) -> Result<LedgerRecord, LedgerError>;

    async fn get_encrypted_value_handle(
        &self,
        key: &RecordKey,
    ) -> Result<CiphertextHandle, LedgerError>;

    async fn is_available(&self) -> Result<bool, LedgerError>;

    async fn contract_address(&self) -> Result<ContractAddress, LedgerError>;
}

/// Signer-bound contract handle.
#[async_trait]
pub trait LedgerWriter: Send + Sync {
    async fn create_record(&self, request: CreateRecordRequest) -> Result<PendingTx, LedgerError>;

    async fn submit_verification(
        &self,
        key: &RecordKey,
        clear_values: &ClearValuesEncoding,
        proof: &DecryptionProof,
    ) -> Result<PendingTx, LedgerError>;

    async fn wait_for_confirmation(&self, tx: &PendingTx) -> Result<TxReceipt, LedgerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_values_keep_sign() {
        let encoding = ClearValuesEncoding::encode(&[37, -122, 0]);
        assert_eq!(encoding.0.len(), 96);
        assert_eq!(encoding.decode().unwrap(), vec![37, -122, 0]);
        assert!(encoding.to_hex().starts_with("0x"));
    }

    #[test]
    fn malformed_clear_values_are_rejected() {
        let encoding = ClearValuesEncoding(Bytes::from_static(&[1, 2, 3]));
        assert!(matches!(encoding.decode(), Err(LedgerError::Reverted(_))));
    }

    #[test]
    fn provider_messages_are_classified() {
        assert_eq!(
            LedgerError::from_provider_message("MetaMask: User rejected transaction"),
            LedgerError::UserRejected
        );
        assert_eq!(
            LedgerError::from_provider_message("execution reverted: Data already verified"),
            LedgerError::AlreadyVerified
        );
        assert!(matches!(
            LedgerError::from_provider_message("out of gas"),
            LedgerError::Reverted(_)
        ));
    }

    #[test]
    fn app_error_kinds() {
        assert_eq!(
            AppError::from(LedgerError::UserRejected).kind,
            ErrorKind::TransactionRejected
        );
        assert_eq!(
            AppError::from(LedgerError::Reverted("Data already verified".into())).kind,
            ErrorKind::AlreadyVerifiedRace
        );
        assert_eq!(
            AppError::from(LedgerError::Transport("timeout".into())).kind,
            ErrorKind::LedgerUnavailable
        );
    }
}
