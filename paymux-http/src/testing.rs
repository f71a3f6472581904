//! Test doubles for the HTTP rail.

use std::future::{Future, ready};
use std::pin::Pin;

use paymux::wallet::{WalletAdapter, WalletError, WalletReadyState};
use paymux_svm::RpcClientLike;
use solana_account::Account;
use solana_client::client_error::ClientError;
use solana_client::rpc_response::RpcPrioritizationFee;
use solana_message::Hash;
use solana_pubkey::Pubkey;

/// Serves a fixed blockhash and no fee history. Requirements must carry
/// their mint decimals in `extra`.
#[derive(Debug)]
pub struct OfflineRpc {
    blockhash: Hash,
}

impl OfflineRpc {
    pub fn new() -> Self {
        Self {
            blockhash: Hash::new_unique(),
        }
    }
}

impl RpcClientLike for OfflineRpc {
    fn get_account(
        &self,
        _pubkey: &Pubkey,
    ) -> impl Future<Output = Result<Account, ClientError>> + Send {
        ready(Ok(Account::default()))
    }

    fn get_recent_prioritization_fees(
        &self,
        _addresses: &[Pubkey],
    ) -> impl Future<Output = Result<Vec<RpcPrioritizationFee>, ClientError>> + Send {
        ready(Ok(Vec::new()))
    }

    fn get_latest_blockhash(&self) -> impl Future<Output = Result<Hash, ClientError>> + Send {
        ready(Ok(self.blockhash))
    }
}

/// Connected wallet whose user declines every signature request.
#[derive(Debug)]
pub struct DecliningWallet {
    public_key: String,
}

impl DecliningWallet {
    pub fn new() -> Self {
        Self {
            public_key: Pubkey::new_unique().to_string(),
        }
    }
}

impl WalletAdapter for DecliningWallet {
    fn name(&self) -> &str {
        "declining"
    }

    fn ready_state(&self) -> WalletReadyState {
        WalletReadyState::Installed
    }

    fn public_key(&self) -> Option<String> {
        Some(self.public_key.clone())
    }

    fn connect(&self) -> Pin<Box<dyn Future<Output = Result<String, WalletError>> + Send + '_>> {
        Box::pin(async move { Ok(self.public_key.clone()) })
    }

    fn disconnect(&self) -> Pin<Box<dyn Future<Output = Result<(), WalletError>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }

    fn sign_transaction(
        &self,
        _transaction: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<u8>, WalletError>> + Send + '_>> {
        Box::pin(async {
            Err(WalletError::Rejected {
                reason: "User rejected the request.".into(),
            })
        })
    }
}

/// Installs a test subscriber honoring `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
