use std::sync::RwLock;

use crate::model::AccountAddress;

/// Wallet connection as seen by the core.
pub trait Session: Send + Sync {
    fn account(&self) -> Option<AccountAddress>;

    fn is_connected(&self) -> bool {
        self.account().is_some()
    }
}

/// Session whose account is pushed in by the shell's wallet adapter.
#[derive(Debug, Default)]
pub struct WalletSession {
    account: RwLock<Option<AccountAddress>>,
}

impl WalletSession {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn connected(account: AccountAddress) -> Self {
        Self {
            account: RwLock::new(Some(account)),
        }
    }

    pub fn connect(&self, account: AccountAddress) {
        if let Ok(mut slot) = self.account.write() {
            *slot = Some(account);
        }
    }

    pub fn disconnect(&self) {
        if let Ok(mut slot) = self.account.write() {
            *slot = None;
        }
    }
}

impl Session for WalletSession {
    fn account(&self) -> Option<AccountAddress> {
        self.account.read().ok().and_then(|slot| slot.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_and_disconnect() {
        let session = WalletSession::new();
        assert!(!session.is_connected());

        session.connect(AccountAddress::new("0xabc"));
        assert_eq!(session.account(), Some(AccountAddress::new("0xabc")));

        session.disconnect();
        assert!(!session.is_connected());
    }
}
