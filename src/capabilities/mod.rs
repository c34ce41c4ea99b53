mod fhe;
mod ledger;
mod local;
mod session;

pub use self::fhe::{
    DecryptionOutcome, EncryptedInput, FheClient, FheError, VerificationSubmitter,
};
pub use self::ledger::{
    ClearValuesEncoding, CreateRecordRequest, DecryptionProof, LedgerError, LedgerReader,
    LedgerRecord, LedgerWriter, PendingTx, TxReceipt,
};
pub use self::local::{proof_digest, FheCallCounts, LedgerCallCounts, LocalFhe, LocalLedger};
pub use self::session::{Session, WalletSession};

use std::sync::Arc;

use crate::model::{AccountAddress, ContractAddress};

/// Everything the core talks to outside the process.
#[derive(Clone)]
pub struct Collaborators {
    pub reader: Arc<dyn LedgerReader>,
    pub writer: Arc<dyn LedgerWriter>,
    pub fhe: Arc<dyn FheClient>,
    pub session: Arc<dyn Session>,
}

impl Collaborators {
    #[must_use]
    pub fn new(
        reader: Arc<dyn LedgerReader>,
        writer: Arc<dyn LedgerWriter>,
        fhe: Arc<dyn FheClient>,
        session: Arc<dyn Session>,
    ) -> Self {
        Self {
            reader,
            writer,
            fhe,
            session,
        }
    }
}

pub mod testing {
    //! Wiring for the in-process backends.

    use super::*;

    pub struct LocalBackends {
        pub ledger: Arc<LocalLedger>,
        pub fhe: Arc<LocalFhe>,
        pub session: Arc<WalletSession>,
    }

    impl LocalBackends {
        pub const CONTRACT: &'static str = "0x5fbdb2315678afecb367f032d93f642f64180aa3";
        pub const ACCOUNT: &'static str = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266";

        /// Connected session and an initialized FHE client.
        #[must_use]
        pub fn connected() -> Self {
            let account = AccountAddress::new(Self::ACCOUNT);
            Self {
                ledger: Arc::new(LocalLedger::new(
                    ContractAddress::new(Self::CONTRACT),
                    account.clone(),
                )),
                fhe: Arc::new(LocalFhe::initialized()),
                session: Arc::new(WalletSession::connected(account)),
            }
        }

        /// Disconnected session and an uninitialized FHE client.
        #[must_use]
        pub fn disconnected() -> Self {
            Self {
                ledger: Arc::new(LocalLedger::new(
                    ContractAddress::new(Self::CONTRACT),
                    AccountAddress::new(Self::ACCOUNT),
                )),
                fhe: Arc::new(LocalFhe::new()),
                session: Arc::new(WalletSession::new()),
            }
        }

        #[must_use]
        pub fn collaborators(&self) -> Collaborators {
            Collaborators::new(
                self.ledger.clone(),
                self.ledger.clone(),
                self.fhe.clone(),
                self.session.clone(),
            )
        }
    }
}
