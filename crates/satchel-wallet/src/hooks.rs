//! Observer hooks on wallet lifecycle events.
//!
//! Hooks run synchronously, in registration order, on the task that raised
//! the event. Only [`WalletHook::before_broadcast`] can veto.

use std::sync::Arc;

use tracing::debug;

use satchel_core::types::{Balance, IndexerStatus};

use crate::broadcast::BroadcastOutcome;
use crate::builder::SignedTransaction;
use crate::error::WalletError;
use crate::monitor::ActivityEvent;

/// Receiver of wallet events. Every method defaults to a no-op.
pub trait WalletHook: Send + Sync {
    fn on_login(&self, _identity: &str) {}

    fn on_logout(&self) {}

    /// Refuse to relay `tx` by returning an error message.
    fn before_broadcast(&self, _tx: &SignedTransaction) -> Result<(), String> {
        Ok(())
    }

    fn after_broadcast(&self, _outcome: &BroadcastOutcome) {}

    fn on_sync(&self, _status: &IndexerStatus, _balance: Balance) {}

    fn on_activity(&self, _event: &ActivityEvent) {}
}

/// Ordered set of hooks.
#[derive(Clone, Default)]
pub struct HookRegistry {
    hooks: Vec<Arc<dyn WalletHook>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, hook: Arc<dyn WalletHook>) {
        self.hooks.push(hook);
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub fn login(&self, identity: &str) {
        self.hooks.iter().for_each(|h| h.on_login(identity));
    }

    pub fn logout(&self) {
        self.hooks.iter().for_each(|h| h.on_logout());
    }

    /// First veto wins; later hooks are not consulted.
    pub fn before_broadcast(&self, tx: &SignedTransaction) -> Result<(), WalletError> {
        for hook in &self.hooks {
            if let Err(reason) = hook.before_broadcast(tx) {
                debug!(txid = %tx.txid(), %reason, "broadcast vetoed");
                return Err(WalletError::HookRejected(reason));
            }
        }
        Ok(())
    }

    pub fn after_broadcast(&self, outcome: &BroadcastOutcome) {
        self.hooks.iter().for_each(|h| h.after_broadcast(outcome));
    }

    pub fn sync(&self, status: &IndexerStatus) {
        let balance = status.balance();
        self.hooks.iter().for_each(|h| h.on_sync(status, balance));
    }

    pub fn activity(&self, event: &ActivityEvent) {
        self.hooks.iter().for_each(|h| h.on_activity(event));
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry").field("hooks", &self.hooks.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    impl WalletHook for Recorder {
        fn on_login(&self, identity: &str) {
            self.seen.lock().push(format!("login {identity}"));
        }
        fn on_logout(&self) {
            self.seen.lock().push("logout".into());
        }
        fn on_sync(&self, _: &IndexerStatus, balance: Balance) {
            self.seen.lock().push(format!("sync {}", balance.total()));
        }
    }

    struct Silent;
    impl WalletHook for Silent {}

    #[test]
    fn hooks_run_in_order() {
        let a = Arc::new(Recorder::default());
        let mut reg = HookRegistry::new();
        reg.register(a.clone());
        reg.register(Arc::new(Silent));
        reg.login("xpub1");
        reg.sync(&IndexerStatus { confirmed: 10, unconfirmed: 5, ..Default::default() });
        reg.logout();
        assert_eq!(*a.seen.lock(), vec!["login xpub1", "sync 15", "logout"]);
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn empty_registry() {
        let reg = HookRegistry::new();
        assert!(reg.is_empty());
        reg.logout();
    }

    #[test]
    fn veto_message_surfaces() {
        struct Veto(&'static str);
        impl WalletHook for Veto {
            fn before_broadcast(&self, _: &SignedTransaction) -> Result<(), String> {
                Err(self.0.to_string())
            }
        }
        let tx = SignedTransaction::from_parts(
            bitcoin::Transaction {
                version: bitcoin::transaction::Version::ONE,
                lock_time: bitcoin::absolute::LockTime::ZERO,
                input: vec![],
                output: vec![],
            },
            vec![],
            1000,
        );
        let mut reg = HookRegistry::new();
        reg.register(Arc::new(Silent));
        assert!(reg.before_broadcast(&tx).is_ok());
        reg.register(Arc::new(Veto("daily limit")));
        reg.register(Arc::new(Veto("second")));
        assert_eq!(reg.before_broadcast(&tx), Err(WalletError::HookRejected("daily limit".into())));
    }
}
