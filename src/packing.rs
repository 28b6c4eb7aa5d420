//! Unpacked -> packed UserOperation conversion and EIP-712 signing.
//!
//! The packed encoding must match the entry point's on-chain hashing exactly;
//! this is the one place where "close enough" is a correctness bug.

use anyhow::{anyhow, Context};
use ethers::abi::{self, Token};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Bytes, H256};
use ethers::utils::keccak256;

use crate::encoding::{pack_uints, to_u128_be};
use crate::error::ExecuteError;
use crate::types::{PackedUserOperation, UserOperation};

const PACKED_USER_OPERATION_TYPE: &str = "PackedUserOperation(address sender,uint256 nonce,bytes initCode,bytes callData,bytes32 accountGasLimits,uint256 preVerificationGas,bytes32 gasFees,bytes paymasterAndData)";
const EIP712_DOMAIN_TYPE: &str =
    "EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)";

/// The entry point's EIP-712 domain identity.
const DOMAIN_NAME: &str = "ERC4337";
const DOMAIN_VERSION: &str = "1";

/// `factory ++ factoryData`, or empty when the account is already deployed.
pub fn init_code(op: &UserOperation) -> Bytes {
    match (op.factory, op.factory_data.as_ref()) {
        (Some(factory), Some(data)) => {
            let mut out = Vec::with_capacity(20 + data.len());
            out.extend_from_slice(factory.as_bytes());
            out.extend_from_slice(data);
            Bytes::from(out)
        }
        _ => Bytes::default(),
    }
}

/// `paymaster ++ verificationGasLimit(u128) ++ postOpGasLimit(u128) ++ data`,
/// or empty when no paymaster address is set.
pub fn paymaster_and_data(op: &UserOperation) -> Bytes {
    let Some(paymaster) = op.paymaster else {
        return Bytes::default();
    };
    let verification = op.paymaster_verification_gas_limit.unwrap_or_default();
    let post_op = op.paymaster_post_op_gas_limit.unwrap_or_default();
    let data = op.paymaster_data.clone().unwrap_or_default();

    let mut out = Vec::with_capacity(20 + 16 + 16 + data.len());
    out.extend_from_slice(paymaster.as_bytes());
    out.extend_from_slice(&to_u128_be(verification));
    out.extend_from_slice(&to_u128_be(post_op));
    out.extend_from_slice(&data);
    Bytes::from(out)
}

/// Pure, deterministic unpacked -> packed transform. Calling it twice on the
/// same input yields byte-identical output.
pub fn pack_user_operation(op: &UserOperation) -> PackedUserOperation {
    PackedUserOperation {
        sender: op.sender,
        nonce: op.nonce,
        init_code: init_code(op),
        call_data: op.call_data.clone(),
        account_gas_limits: pack_uints(op.verification_gas_limit, op.call_gas_limit),
        pre_verification_gas: op.pre_verification_gas,
        gas_fees: pack_uints(op.max_priority_fee_per_gas, op.max_fee_per_gas),
        paymaster_and_data: paymaster_and_data(op),
        signature: op.signature.clone(),
    }
}

fn struct_hash(packed: &PackedUserOperation) -> [u8; 32] {
    let encoded = abi::encode(&[
        Token::FixedBytes(keccak256(PACKED_USER_OPERATION_TYPE).to_vec()),
        Token::Address(packed.sender),
        Token::Uint(packed.nonce),
        Token::FixedBytes(keccak256(&packed.init_code).to_vec()),
        Token::FixedBytes(keccak256(&packed.call_data).to_vec()),
        Token::FixedBytes(packed.account_gas_limits.as_bytes().to_vec()),
        Token::Uint(packed.pre_verification_gas),
        Token::FixedBytes(packed.gas_fees.as_bytes().to_vec()),
        Token::FixedBytes(keccak256(&packed.paymaster_and_data).to_vec()),
    ]);
    keccak256(encoded)
}

fn domain_separator(chain_id: u64, entry_point: Address) -> [u8; 32] {
    let encoded = abi::encode(&[
        Token::FixedBytes(keccak256(EIP712_DOMAIN_TYPE).to_vec()),
        Token::FixedBytes(keccak256(DOMAIN_NAME).to_vec()),
        Token::FixedBytes(keccak256(DOMAIN_VERSION).to_vec()),
        Token::Uint(chain_id.into()),
        Token::Address(entry_point),
    ]);
    keccak256(encoded)
}

/// EIP-712 digest of the packed operation, bound to the chain and entry point
/// so a signature can never be replayed across either.
pub fn user_operation_digest(
    packed: &PackedUserOperation,
    chain_id: u64,
    entry_point: Address,
) -> H256 {
    let mut message = Vec::with_capacity(2 + 32 + 32);
    message.extend_from_slice(&[0x19, 0x01]);
    message.extend_from_slice(&domain_separator(chain_id, entry_point));
    message.extend_from_slice(&struct_hash(packed));
    H256(keccak256(message))
}

/// Owner-key signer bound to one chain and entry point.
#[derive(Clone, Debug)]
pub struct UserOpSigner {
    wallet: LocalWallet,
    chain_id: u64,
    entry_point: Address,
}

impl UserOpSigner {
    pub fn new(wallet: LocalWallet, chain_id: u64, entry_point: Address) -> Self {
        Self {
            wallet,
            chain_id,
            entry_point,
        }
    }

    pub fn address(&self) -> Address {
        self.wallet.address()
    }

    /// Digest of `op` as it would be signed right now.
    pub fn digest(&self, op: &UserOperation) -> H256 {
        user_operation_digest(&pack_user_operation(op), self.chain_id, self.entry_point)
    }

    /// Signs the packed form of `op`, replaces its signature in place and
    /// returns the digest that was signed. The caller must re-sign whenever
    /// any packed field changes afterwards.
    pub fn sign(&self, op: &mut UserOperation) -> Result<H256, ExecuteError> {
        let digest = self.digest(op);
        let signature = self
            .wallet
            .sign_hash(digest)
            .map_err(|e| anyhow!(e))
            .context("failed to sign user operation digest")?;
        op.signature = Bytes::from(signature.to_vec());
        Ok(digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{fmt_h256, unpack_uints};
    use ethers::types::{Signature, U256};

    fn sample_op() -> UserOperation {
        let mut op = UserOperation::new(Address::repeat_byte(0x11));
        op.nonce = U256::from(3u64);
        op.call_data = Bytes::from(vec![0xaa, 0xbb]);
        op.call_gas_limit = U256::from(100_000u64);
        op.verification_gas_limit = U256::from(200_000u64);
        op.pre_verification_gas = U256::from(10_000u64);
        op.max_fee_per_gas = U256::from(2_000_000_000u64);
        op.max_priority_fee_per_gas = U256::from(1_000_000_000u64);
        op
    }

    #[test]
    fn packed_words_hold_exact_values() {
        let packed = pack_user_operation(&sample_op());
        assert_eq!(
            fmt_h256(packed.account_gas_limits),
            "0x00000000000000000000000000030d40000000000000000000000000000186a0"
        );
        let (priority, max_fee) = unpack_uints(packed.gas_fees);
        assert_eq!(priority, U256::from(1_000_000_000u64));
        assert_eq!(max_fee, U256::from(2_000_000_000u64));
    }

    #[test]
    fn packing_is_idempotent() {
        let op = sample_op();
        assert_eq!(pack_user_operation(&op), pack_user_operation(&op));
    }

    #[test]
    fn gas_round_trip_through_packed_words() {
        let op = sample_op();
        let packed = pack_user_operation(&op);
        let (verification, call) = unpack_uints(packed.account_gas_limits);
        assert_eq!(verification, op.verification_gas_limit);
        assert_eq!(call, op.call_gas_limit);
    }

    #[test]
    fn init_code_concatenates_factory_and_data() {
        let mut op = sample_op();
        assert!(init_code(&op).is_empty());

        op.factory = Some(Address::repeat_byte(0xfa));
        op.factory_data = Some(Bytes::from(vec![0x01, 0x02, 0x03]));
        let code = init_code(&op);
        assert_eq!(code.len(), 23);
        assert_eq!(&code[..20], Address::repeat_byte(0xfa).as_bytes());
        assert_eq!(&code[20..], &[0x01, 0x02, 0x03]);
    }

    #[test]
    fn paymaster_and_data_layout() {
        let mut op = sample_op();
        assert!(paymaster_and_data(&op).is_empty());

        op.paymaster = Some(Address::repeat_byte(0x22));
        op.paymaster_verification_gas_limit = Some(U256::from(0x30d40u64));
        op.paymaster_post_op_gas_limit = Some(U256::from(0xc350u64));
        op.paymaster_data = Some(Bytes::from(Address::repeat_byte(0x33).as_bytes().to_vec()));

        let pnd = paymaster_and_data(&op);
        assert_eq!(pnd.len(), 20 + 16 + 16 + 20);
        assert_eq!(&pnd[..20], Address::repeat_byte(0x22).as_bytes());
        assert_eq!(&pnd[33..36], &[0x03, 0x0d, 0x40]); // tail of the u128 word
        assert_eq!(&pnd[52..], Address::repeat_byte(0x33).as_bytes());
    }

    #[test]
    fn digest_changes_with_chain_and_entry_point() {
        let packed = pack_user_operation(&sample_op());
        let ep = Address::repeat_byte(0xee);
        let d1 = user_operation_digest(&packed, 1, ep);
        let d2 = user_operation_digest(&packed, 11155111, ep);
        let d3 = user_operation_digest(&packed, 1, Address::repeat_byte(0xef));
        assert_ne!(d1, d2);
        assert_ne!(d1, d3);
    }

    #[test]
    fn sign_attaches_recoverable_signature() {
        let wallet: LocalWallet =
            "0x0123456789012345678901234567890101234567890123456789012345678901"
                .parse()
                .unwrap();
        let signer = UserOpSigner::new(wallet, 11155111, Address::repeat_byte(0xee));
        let mut op = sample_op();
        let digest = signer.sign(&mut op).unwrap();

        assert_eq!(op.signature.len(), 65);
        let sig = Signature::try_from(op.signature.as_ref()).unwrap();
        assert_eq!(sig.recover(digest).unwrap(), signer.address());
    }
}
