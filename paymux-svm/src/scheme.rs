//! The `exact` scheme on Solana.

use std::fmt::{self, Debug, Formatter};
use std::future::Future;
use std::pin::Pin;

use paymux::WalletError;
use paymux::proto::{Base64Bytes, PaymentRequirements};
use paymux::scheme::{EXACT_SCHEME, SchemeClient, SchemeError};
use paymux::wallet::WalletAdapter;
use solana_pubkey::Pubkey;

use crate::error::SolanaSchemeError;
use crate::networks::{SolanaNetwork, network_by_name};
use crate::rpc::RpcClientLike;
use crate::transfer::build_transfer_transaction;

/// Pays `exact` requirements on one Solana network with an SPL transfer
/// signed by the connected wallet.
pub struct SolanaExactScheme<R> {
    network: &'static SolanaNetwork,
    rpc_client: R,
}

impl<R> Debug for SolanaExactScheme<R> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("SolanaExactScheme")
            .field("network", &self.network.name)
            .finish_non_exhaustive()
    }
}

impl<R> SolanaExactScheme<R> {
    /// Creates a scheme client for `network`.
    pub const fn new(network: &'static SolanaNetwork, rpc_client: R) -> Self {
        Self {
            network,
            rpc_client,
        }
    }
}

impl<R: RpcClientLike + Send + Sync> SolanaExactScheme<R> {
    async fn sign_transfer(
        &self,
        requirements: &PaymentRequirements,
        wallet: &dyn WalletAdapter,
    ) -> Result<String, SolanaSchemeError> {
        let payer = wallet.public_key().ok_or(WalletError::NotConnected)?;
        let payer = payer
            .parse::<Pubkey>()
            .map_err(|e| SolanaSchemeError::InvalidRequirement {
                field: "wallet public key",
                reason: format!("{payer:?}: {e}"),
            })?;

        let tx = build_transfer_transaction(&self.rpc_client, requirements, &payer).await?;
        let unsigned = bincode::serialize(&tx).map_err(|source| {
            SolanaSchemeError::Serialization {
                context: "failed to serialize transaction",
                source,
            }
        })?;

        #[cfg(feature = "telemetry")]
        tracing::debug!(wallet = wallet.name(), %payer, "requesting wallet signature");
        let signed = wallet.sign_transaction(unsigned).await?;
        Ok(Base64Bytes::encode(signed).into_string())
    }
}

impl<R: RpcClientLike + Send + Sync> SchemeClient for SolanaExactScheme<R> {
    fn scheme(&self) -> &str {
        EXACT_SCHEME
    }

    fn network(&self) -> &str {
        self.network.name
    }

    fn accepts(&self, requirements: &PaymentRequirements) -> bool {
        requirements.scheme == EXACT_SCHEME
            && network_by_name(&requirements.network).is_some_and(|n| n == self.network)
    }

    fn sign<'a>(
        &'a self,
        requirements: &'a PaymentRequirements,
        wallet: &'a dyn WalletAdapter,
    ) -> Pin<Box<dyn Future<Output = Result<String, SchemeError>> + Send + 'a>> {
        Box::pin(async move {
            self.sign_transfer(requirements, wallet)
                .await
                .map_err(SchemeError::from)
        })
    }
}

#[cfg(test)]
mod tests {
    use solana_keypair::Keypair;
    use solana_signer::Signer;
    use solana_transaction::versioned::VersionedTransaction;

    use super::*;
    use crate::keypair::KeypairWallet;
    use crate::networks::{SOLANA, SOLANA_DEVNET};
    use crate::testing::{FakeRpc, requirement};

    #[test]
    fn accepts_by_name_or_caip2_on_its_network_only() {
        let scheme = SolanaExactScheme::new(&SOLANA_DEVNET, FakeRpc::new(&[]));
        let mut req = requirement("1", None);
        assert!(scheme.accepts(&req));

        req.network = SOLANA_DEVNET.caip2();
        assert!(scheme.accepts(&req));

        req.network = SOLANA.name.to_owned();
        assert!(!scheme.accepts(&req));

        req.network = SOLANA_DEVNET.name.to_owned();
        req.scheme = "upto".to_owned();
        assert!(!scheme.accepts(&req));
    }

    #[tokio::test]
    async fn signs_with_the_connected_keypair() {
        let keypair = Keypair::new();
        let payer = keypair.pubkey();
        let wallet = KeypairWallet::new(keypair.insecure_clone());
        wallet.connect().await.unwrap();
        let scheme = SolanaExactScheme::new(&SOLANA_DEVNET, FakeRpc::new(&[5]));

        let encoded = scheme
            .sign(&requirement("2500000", None), &wallet)
            .await
            .unwrap();

        let bytes = Base64Bytes::from_encoded(encoded).decode().unwrap();
        let tx: VersionedTransaction = bincode::deserialize(&bytes).unwrap();
        assert_eq!(tx.message.static_account_keys()[0], payer);
        assert_eq!(
            tx.signatures,
            vec![keypair.sign_message(&tx.message.serialize())]
        );
    }

    #[tokio::test]
    async fn disconnected_wallet_cannot_pay() {
        let wallet = KeypairWallet::new(Keypair::new());
        let scheme = SolanaExactScheme::new(&SOLANA_DEVNET, FakeRpc::new(&[]));
        let err = scheme
            .sign(&requirement("1", None), &wallet)
            .await
            .unwrap_err();
        assert!(matches!(err, SchemeError::Wallet(WalletError::NotConnected)));
    }
}
