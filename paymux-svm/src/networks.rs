//! Well-known Solana networks and their USDC deployments.

use paymux::SolanaCluster;
use solana_pubkey::{Pubkey, pubkey};

/// One Solana network as named in x402 payment requirements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SolanaNetwork {
    /// x402 network name.
    pub name: &'static str,
    /// CAIP-2 reference (genesis hash prefix).
    pub caip2_reference: &'static str,
    /// Cluster the network runs on.
    pub cluster: SolanaCluster,
    /// Native Circle USDC mint.
    pub usdc_mint: Pubkey,
    /// USDC decimals.
    pub usdc_decimals: u8,
}

impl SolanaNetwork {
    /// CAIP-2 chain id, e.g. `solana:5eykt4UsFv8P8NJdTREpY1vzqKqZKvdp`.
    #[must_use]
    pub fn caip2(&self) -> String {
        format!("solana:{}", self.caip2_reference)
    }
}

/// Mainnet-beta.
pub const SOLANA: SolanaNetwork = SolanaNetwork {
    name: "solana",
    caip2_reference: "5eykt4UsFv8P8NJdTREpY1vzqKqZKvdp",
    cluster: SolanaCluster::MainnetBeta,
    usdc_mint: pubkey!("EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v"),
    usdc_decimals: 6,
};

/// Devnet.
pub const SOLANA_DEVNET: SolanaNetwork = SolanaNetwork {
    name: "solana-devnet",
    caip2_reference: "EtWTRABZaYq6iMfeYKouRu166VU2xqa1",
    cluster: SolanaCluster::Devnet,
    usdc_mint: pubkey!("4zMMC9srt5Ri5X14GAgXhaHii3GnPAEERYPJgZJDncDU"),
    usdc_decimals: 6,
};

/// Every network x402 payments can settle on.
pub static SOLANA_NETWORKS: &[SolanaNetwork] = &[SOLANA, SOLANA_DEVNET];

/// Looks up a network by x402 name or CAIP-2 id.
#[must_use]
pub fn network_by_name(name: &str) -> Option<&'static SolanaNetwork> {
    SOLANA_NETWORKS
        .iter()
        .find(|n| n.name == name || name.strip_prefix("solana:") == Some(n.caip2_reference))
}

/// The x402 network of a cluster. Testnet and localnet have none.
#[must_use]
pub fn network_for_cluster(cluster: SolanaCluster) -> Option<&'static SolanaNetwork> {
    SOLANA_NETWORKS.iter().find(|n| n.cluster == cluster)
}

/// Public RPC endpoint of a cluster.
#[must_use]
pub const fn default_rpc_url(cluster: SolanaCluster) -> &'static str {
    match cluster {
        SolanaCluster::MainnetBeta => "https://api.mainnet-beta.solana.com",
        SolanaCluster::Devnet => "https://api.devnet.solana.com",
        SolanaCluster::Testnet => "https://api.testnet.solana.com",
        SolanaCluster::Localnet => "http://127.0.0.1:8899",
    }
}
