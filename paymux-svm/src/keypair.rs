//! A wallet adapter backed by an in-process keypair.
//!
//! Useful for servers, bots and tests that pay without a browser wallet.

use std::fmt::{self, Debug, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};

use paymux::wallet::{WalletAdapter, WalletError, WalletReadyState};
use solana_keypair::Keypair;
use solana_signer::Signer;
use solana_transaction::versioned::VersionedTransaction;

use crate::transfer::sign_in_place;

/// Signs payment transactions with a local [`Keypair`].
pub struct KeypairWallet {
    name: String,
    keypair: Keypair,
    connected: AtomicBool,
}

impl Debug for KeypairWallet {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeypairWallet")
            .field("name", &self.name)
            .field("pubkey", &self.keypair.pubkey())
            .field("connected", &self.connected.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl KeypairWallet {
    /// Wraps `keypair`. The wallet starts disconnected.
    #[must_use]
    pub fn new(keypair: Keypair) -> Self {
        Self {
            name: "keypair".to_owned(),
            keypair,
            connected: AtomicBool::new(false),
        }
    }

    /// Overrides the adapter name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn sign(&self, transaction: &[u8]) -> Result<Vec<u8>, WalletError> {
        let mut tx: VersionedTransaction =
            bincode::deserialize(transaction).map_err(|e| WalletError::Signing {
                reason: format!("malformed transaction: {e}"),
            })?;
        sign_in_place(&mut tx, &self.keypair).map_err(|e| WalletError::Signing {
            reason: e.to_string(),
        })?;
        bincode::serialize(&tx).map_err(|e| WalletError::Signing {
            reason: e.to_string(),
        })
    }
}

impl WalletAdapter for KeypairWallet {
    fn name(&self) -> &str {
        &self.name
    }

    fn ready_state(&self) -> WalletReadyState {
        WalletReadyState::Installed
    }

    fn public_key(&self) -> Option<String> {
        self.connected
            .load(Ordering::SeqCst)
            .then(|| self.keypair.pubkey().to_string())
    }

    fn connect(&self) -> Pin<Box<dyn Future<Output = Result<String, WalletError>> + Send + '_>> {
        self.connected.store(true, Ordering::SeqCst);
        let public_key = self.keypair.pubkey().to_string();
        Box::pin(async move { Ok(public_key) })
    }

    fn disconnect(&self) -> Pin<Box<dyn Future<Output = Result<(), WalletError>> + Send + '_>> {
        self.connected.store(false, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }

    fn sign_transaction(
        &self,
        transaction: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<u8>, WalletError>> + Send + '_>> {
        Box::pin(async move {
            if !self.connected.load(Ordering::SeqCst) {
                return Err(WalletError::NotConnected);
            }
            self.sign(&transaction)
        })
    }
}
