//! Test doubles for the Solana rail.

use std::future::{Future, ready};
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering::SeqCst;

use paymux::proto::PaymentRequirements;
use paymux::scheme::EXACT_SCHEME;
use solana_account::Account;
use solana_client::client_error::ClientError;
use solana_client::rpc_response::RpcPrioritizationFee;
use solana_message::Hash;
use solana_pubkey::Pubkey;

use crate::networks::SOLANA_DEVNET;
use crate::rpc::RpcClientLike;

/// Answers every call from memory. Accounts are owned by the system
/// program, so they never unpack as mints.
#[derive(Debug)]
pub struct FakeRpc {
    pub blockhash: Hash,
    fees: Vec<u64>,
    account_lookups: AtomicUsize,
    fee_lookups: AtomicUsize,
}

impl FakeRpc {
    pub fn new(fees: &[u64]) -> Self {
        Self {
            blockhash: Hash::new_unique(),
            fees: fees.to_vec(),
            account_lookups: AtomicUsize::new(0),
            fee_lookups: AtomicUsize::new(0),
        }
    }

    pub fn account_lookups(&self) -> usize {
        self.account_lookups.load(SeqCst)
    }

    pub fn fee_lookups(&self) -> usize {
        self.fee_lookups.load(SeqCst)
    }
}

impl RpcClientLike for FakeRpc {
    fn get_account(
        &self,
        _pubkey: &Pubkey,
    ) -> impl Future<Output = Result<Account, ClientError>> + Send {
        self.account_lookups.fetch_add(1, SeqCst);
        ready(Ok(Account {
            lamports: 1_461_600,
            data: vec![0; 82],
            owner: Pubkey::default(),
            executable: false,
            rent_epoch: 0,
        }))
    }

    fn get_recent_prioritization_fees(
        &self,
        _addresses: &[Pubkey],
    ) -> impl Future<Output = Result<Vec<RpcPrioritizationFee>, ClientError>> + Send {
        self.fee_lookups.fetch_add(1, SeqCst);
        ready(Ok(self
            .fees
            .iter()
            .enumerate()
            .map(|(slot, fee)| RpcPrioritizationFee {
                slot: slot as u64,
                prioritization_fee: *fee,
            })
            .collect()))
    }

    fn get_latest_blockhash(&self) -> impl Future<Output = Result<Hash, ClientError>> + Send {
        ready(Ok(self.blockhash))
    }
}

/// A devnet USDC requirement with decimals supplied in `extra`.
pub fn requirement(amount: &str, fee_payer: Option<&Pubkey>) -> PaymentRequirements {
    let mut extra = serde_json::json!({ "decimals": 6 });
    if let Some(fee_payer) = fee_payer {
        extra["feePayer"] = serde_json::Value::String(fee_payer.to_string());
    }
    PaymentRequirements {
        scheme: EXACT_SCHEME.to_owned(),
        network: SOLANA_DEVNET.name.to_owned(),
        max_amount_required: amount.to_owned(),
        resource: "article-1".to_owned(),
        description: "Premium article".to_owned(),
        mime_type: "text/html".to_owned(),
        pay_to: Pubkey::new_unique().to_string(),
        max_timeout_seconds: 300,
        asset: SOLANA_DEVNET.usdc_mint.to_string(),
        extra: Some(extra),
    }
}
