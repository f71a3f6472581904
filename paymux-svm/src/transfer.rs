//! SPL token transfer building.
//!
//! The transaction is a v0 message with three instructions: compute unit
//! limit, compute unit price and a `transfer_checked` from the payer's
//! associated token account to the payee's. The fee payer is the server's
//! `extra.feePayer` when present, otherwise the payer itself. Signature
//! slots are left empty for the wallet (and the server) to fill.

use paymux::proto::PaymentRequirements;
use solana_compute_budget_interface::ComputeBudgetInstruction;
use solana_message::v0::Message as MessageV0;
use solana_message::VersionedMessage;
use solana_pubkey::{Pubkey, pubkey};
use solana_signature::Signature;
use solana_transaction::Instruction;
use solana_transaction::versioned::VersionedTransaction;
use spl_token::solana_program::program_pack::Pack;

use crate::error::SolanaSchemeError;
use crate::rpc::RpcClientLike;

/// Associated Token Account program.
pub const ATA_PROGRAM_PUBKEY: Pubkey = pubkey!("ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL");

/// Compute unit limit used unless the server sets `extra.computeUnitLimit`.
pub const DEFAULT_COMPUTE_UNIT_LIMIT: u32 = 100_000;

/// Mint information for SPL tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mint {
    /// Standard SPL Token mint.
    Token {
        /// Number of decimal places.
        decimals: u8,
    },
    /// SPL Token-2022 mint.
    Token2022 {
        /// Number of decimal places.
        decimals: u8,
    },
}

impl Mint {
    /// Owning token program.
    #[must_use]
    pub fn token_program(&self) -> Pubkey {
        match self {
            Self::Token { .. } => spl_token::id(),
            Self::Token2022 { .. } => spl_token_2022::id(),
        }
    }

    /// Decimal places.
    #[must_use]
    pub const fn decimals(&self) -> u8 {
        match self {
            Self::Token { decimals } | Self::Token2022 { decimals } => *decimals,
        }
    }
}

/// Fetches mint information from the chain.
///
/// # Errors
///
/// Returns [`SolanaSchemeError`] if the account cannot be fetched or is not a
/// mint of either token program.
pub async fn fetch_mint<R: RpcClientLike>(
    mint: &Pubkey,
    rpc_client: &R,
) -> Result<Mint, SolanaSchemeError> {
    let account = rpc_client
        .get_account(mint)
        .await
        .map_err(|e| SolanaSchemeError::rpc("failed to fetch mint account", e))?;
    let unpack_error = |e: &dyn std::fmt::Display| SolanaSchemeError::Mint {
        mint: *mint,
        reason: e.to_string(),
    };
    if account.owner == spl_token::id() {
        let state = spl_token::state::Mint::unpack(&account.data).map_err(|e| unpack_error(&e))?;
        Ok(Mint::Token {
            decimals: state.decimals,
        })
    } else if account.owner == spl_token_2022::id() {
        let state =
            spl_token_2022::state::Mint::unpack(&account.data).map_err(|e| unpack_error(&e))?;
        Ok(Mint::Token2022 {
            decimals: state.decimals,
        })
    } else {
        Err(unpack_error(&"unknown owner"))
    }
}

/// Reads the mint from `extra.decimals` and `extra.tokenProgram`, saving an
/// RPC round trip. Returns `None` when the server did not send decimals.
///
/// # Errors
///
/// Returns [`SolanaSchemeError::InvalidRequirement`] for out-of-range
/// decimals or an unknown token program.
pub fn mint_from_extra(
    requirements: &PaymentRequirements,
) -> Result<Option<Mint>, SolanaSchemeError> {
    let Some(decimals) = requirements.extra_u64("decimals") else {
        return Ok(None);
    };
    let decimals = u8::try_from(decimals).map_err(|e| SolanaSchemeError::InvalidRequirement {
        field: "extra.decimals",
        reason: e.to_string(),
    })?;
    let Some(program) = requirements.extra_str("tokenProgram") else {
        return Ok(Some(Mint::Token { decimals }));
    };
    let program = parse_pubkey("extra.tokenProgram", program)?;
    if program == spl_token::id() {
        Ok(Some(Mint::Token { decimals }))
    } else if program == spl_token_2022::id() {
        Ok(Some(Mint::Token2022 { decimals }))
    } else {
        Err(SolanaSchemeError::InvalidRequirement {
            field: "extra.tokenProgram",
            reason: format!("{program} is not a token program"),
        })
    }
}

/// Lowest non-zero recent prioritization fee, in micro-lamports; 1 when
/// every recent fee was zero.
///
/// # Errors
///
/// Returns [`SolanaSchemeError::Rpc`] if the fee lookup fails.
pub async fn get_priority_fee_micro_lamports<R: RpcClientLike>(
    rpc_client: &R,
    writeable_accounts: &[Pubkey],
) -> Result<u64, SolanaSchemeError> {
    let recent_fees = rpc_client
        .get_recent_prioritization_fees(writeable_accounts)
        .await
        .map_err(|e| SolanaSchemeError::rpc("failed to fetch prioritization fees", e))?;
    Ok(recent_fees
        .iter()
        .map(|f| f.prioritization_fee)
        .filter(|fee| *fee > 0)
        .min()
        .unwrap_or(1))
}

/// Associated token account of `owner` for `mint`.
#[must_use]
pub fn associated_token_address(owner: &Pubkey, mint: &Pubkey, token_program: &Pubkey) -> Pubkey {
    let (ata, _) = Pubkey::find_program_address(
        &[owner.as_ref(), token_program.as_ref(), mint.as_ref()],
        &ATA_PROGRAM_PUBKEY,
    );
    ata
}

/// Builds the unsigned transfer transaction `requirements` ask `payer` for.
///
/// # Errors
///
/// Returns [`SolanaSchemeError`] for malformed requirements, failed RPC
/// calls or message compilation errors.
#[cfg_attr(
    feature = "telemetry",
    tracing::instrument(
        name = "paymux.svm.build_transfer",
        skip_all,
        err,
        fields(network = %requirements.network, amount = %requirements.max_amount_required)
    )
)]
pub async fn build_transfer_transaction<R: RpcClientLike>(
    rpc_client: &R,
    requirements: &PaymentRequirements,
    payer: &Pubkey,
) -> Result<VersionedTransaction, SolanaSchemeError> {
    let amount = requirements
        .amount()
        .ok_or_else(|| SolanaSchemeError::InvalidRequirement {
            field: "maxAmountRequired",
            reason: format!("{:?} is not an integer", requirements.max_amount_required),
        })?;
    let pay_to = parse_pubkey("payTo", &requirements.pay_to)?;
    let asset = parse_pubkey("asset", &requirements.asset)?;
    let fee_payer = match requirements.extra_str("feePayer") {
        Some(fee_payer) => parse_pubkey("extra.feePayer", fee_payer)?,
        None => *payer,
    };

    let mint = match mint_from_extra(requirements)? {
        Some(mint) => mint,
        None => fetch_mint(&asset, rpc_client).await?,
    };
    let token_program = mint.token_program();
    let source_ata = associated_token_address(payer, &asset, &token_program);
    let destination_ata = associated_token_address(&pay_to, &asset, &token_program);

    let transfer_error = |e: &dyn std::fmt::Display| SolanaSchemeError::Build {
        context: "failed to build transfer instruction",
        reason: e.to_string(),
    };
    let transfer = match mint {
        Mint::Token { decimals } => spl_token::instruction::transfer_checked(
            &token_program,
            &source_ata,
            &asset,
            &destination_ata,
            payer,
            &[],
            amount,
            decimals,
        )
        .map_err(|e| transfer_error(&e))?,
        Mint::Token2022 { decimals } => spl_token_2022::instruction::transfer_checked(
            &token_program,
            &source_ata,
            &asset,
            &destination_ata,
            payer,
            &[],
            amount,
            decimals,
        )
        .map_err(|e| transfer_error(&e))?,
    };

    let unit_price = match requirements.extra_u64("computeUnitPrice") {
        Some(price) => price,
        None => {
            get_priority_fee_micro_lamports(rpc_client, &[fee_payer, destination_ata, source_ata])
                .await?
        }
    };
    let unit_limit = match requirements.extra_u64("computeUnitLimit") {
        Some(limit) => u32::try_from(limit).map_err(|e| SolanaSchemeError::InvalidRequirement {
            field: "extra.computeUnitLimit",
            reason: e.to_string(),
        })?,
        None => DEFAULT_COMPUTE_UNIT_LIMIT,
    };

    let recent_blockhash = rpc_client
        .get_latest_blockhash()
        .await
        .map_err(|e| SolanaSchemeError::rpc("failed to fetch latest blockhash", e))?;

    let instructions: [Instruction; 3] = [
        ComputeBudgetInstruction::set_compute_unit_limit(unit_limit),
        ComputeBudgetInstruction::set_compute_unit_price(unit_price),
        transfer,
    ];
    let message = MessageV0::try_compile(&fee_payer, &instructions, &[], recent_blockhash)
        .map_err(|e| SolanaSchemeError::Build {
            context: "failed to compile message",
            reason: format!("{e:?}"),
        })?;
    let message = VersionedMessage::V0(message);
    let required = usize::from(message.header().num_required_signatures);

    #[cfg(feature = "telemetry")]
    tracing::debug!(
        %payer,
        %fee_payer,
        %pay_to,
        amount,
        decimals = mint.decimals(),
        unit_price,
        unit_limit,
        "built transfer transaction"
    );

    Ok(VersionedTransaction {
        signatures: vec![Signature::default(); required],
        message,
    })
}

/// Signs `tx` with `signer` in place. The signer must be one of the
/// message's required signers.
///
/// # Errors
///
/// Returns [`SolanaSchemeError::Build`] if signing fails or the signer is not
/// required by the message.
pub fn sign_in_place<S: solana_signer::Signer + ?Sized>(
    tx: &mut VersionedTransaction,
    signer: &S,
) -> Result<(), SolanaSchemeError> {
    let message_bytes = tx.message.serialize();
    let signature = signer
        .try_sign_message(&message_bytes)
        .map_err(|e| SolanaSchemeError::Build {
            context: "failed to sign message",
            reason: e.to_string(),
        })?;

    let required = usize::from(tx.message.header().num_required_signatures);
    let signer_key = signer.pubkey();
    let position = tx
        .message
        .static_account_keys()
        .iter()
        .take(required)
        .position(|key| *key == signer_key)
        .ok_or_else(|| SolanaSchemeError::Build {
            context: "failed to sign message",
            reason: format!("{signer_key} is not a required signer"),
        })?;

    if tx.signatures.len() < required {
        tx.signatures.resize(required, Signature::default());
    }
    tx.signatures[position] = signature;
    Ok(())
}

fn parse_pubkey(field: &'static str, value: &str) -> Result<Pubkey, SolanaSchemeError> {
    value
        .parse::<Pubkey>()
        .map_err(|e| SolanaSchemeError::InvalidRequirement {
            field,
            reason: format!("{value:?}: {e}"),
        })
}
