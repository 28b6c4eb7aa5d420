use ethers::types::{Address, Bytes, H256, U256};

use crate::encoding::{
    DEFAULT_CALL_GAS_LIMIT, DEFAULT_PRE_VERIFICATION_GAS, DEFAULT_VERIFICATION_GAS_LIMIT,
    FALLBACK_FEE_1_GWEI,
};

/// ERC-4337 UserOperation, unpacked (EntryPoint v0.8 layout).
///
/// `factory`/`factory_data` are present only while the sender contract is
/// still counterfactual, and only ever as a pair. The four paymaster fields
/// are all-or-nothing as a group. `signature` stays empty (`0x`) until the
/// final EIP-712 signature is attached; gas simulation uses a separate
/// placeholder and never this field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserOperation {
    pub sender: Address,
    pub nonce: U256,
    pub factory: Option<Address>,
    pub factory_data: Option<Bytes>,
    pub call_data: Bytes,
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    pub paymaster: Option<Address>,
    pub paymaster_verification_gas_limit: Option<U256>,
    pub paymaster_post_op_gas_limit: Option<U256>,
    pub paymaster_data: Option<Bytes>,
    pub signature: Bytes,
}

impl UserOperation {
    /// A skeleton for `sender` with the documented conservative defaults, no
    /// deployment, no paymaster and an empty signature.
    pub fn new(sender: Address) -> Self {
        Self {
            sender,
            nonce: U256::zero(),
            factory: None,
            factory_data: None,
            call_data: Bytes::default(),
            call_gas_limit: U256::from(DEFAULT_CALL_GAS_LIMIT),
            verification_gas_limit: U256::from(DEFAULT_VERIFICATION_GAS_LIMIT),
            pre_verification_gas: U256::from(DEFAULT_PRE_VERIFICATION_GAS),
            max_fee_per_gas: U256::from(FALLBACK_FEE_1_GWEI),
            max_priority_fee_per_gas: U256::from(FALLBACK_FEE_1_GWEI),
            paymaster: None,
            paymaster_verification_gas_limit: None,
            paymaster_post_op_gas_limit: None,
            paymaster_data: None,
            signature: Bytes::default(),
        }
    }
}

/// Canonical packed form used for on-chain hashing and EIP-712 signing.
///
/// `account_gas_limits` packs `verificationGasLimit` (high 128 bits) with
/// `callGasLimit` (low); `gas_fees` packs `maxPriorityFeePerGas` (high) with
/// `maxFeePerGas` (low). Packing is lossy of field boundaries but not of
/// values.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackedUserOperation {
    pub sender: Address,
    pub nonce: U256,
    pub init_code: Bytes,
    pub call_data: Bytes,
    pub account_gas_limits: H256,
    pub pre_verification_gas: U256,
    pub gas_fees: H256,
    pub paymaster_and_data: Bytes,
    pub signature: Bytes,
}

/// Read-only estimation summary for display. The totals are never fed back
/// into consensus-critical logic.
#[derive(Clone, Debug)]
pub struct GasEstimationResult {
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    pub total_gas_wei: U256,
    pub total_gas_eth: String,
}

/// How the user chose to pay for gas. Created fresh per submission attempt by
/// the confirmation step and consumed exactly once.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PaymentSelection {
    /// The sender contract pays from its own native balance.
    Native,
    /// A verifying paymaster sponsors the gas.
    Sponsored,
    /// A multi-token paymaster is paid in an ERC-20. `None` means "whatever
    /// the resolver's default token is"; resolution may fail with
    /// `NoTokenSelected`.
    Token { token: Option<Address> },
}

impl PaymentSelection {
    /// Stable label persisted with history records.
    pub fn label(&self) -> &'static str {
        match self {
            PaymentSelection::Native => "native",
            PaymentSelection::Sponsored => "sponsored",
            PaymentSelection::Token { .. } => "token",
        }
    }
}

/// Structured outcome of one coordinator run. This is the only thing the
/// coordinator's public entry point ever returns; no error escapes it.
#[derive(Clone, Debug, Default)]
pub struct ExecuteOutcome {
    pub success: bool,
    pub user_op_hash: Option<H256>,
    pub transaction_hash: Option<H256>,
    pub block_number: Option<u64>,
    pub error: Option<String>,
}

impl ExecuteOutcome {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }
}
