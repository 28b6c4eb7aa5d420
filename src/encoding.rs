use crate::types::UserOperation;
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::format_ether;

/// Conservative gas defaults used until the bundler has estimated the real
/// limits, and as fallbacks when an estimate comes back missing or invalid.
pub const DEFAULT_CALL_GAS_LIMIT: u64 = 100_000; // 0x186a0
pub const DEFAULT_VERIFICATION_GAS_LIMIT: u64 = 200_000; // 0x30d40
pub const DEFAULT_PRE_VERIFICATION_GAS: u64 = 10_000; // 0x2710
pub const FALLBACK_FEE_1_GWEI: u64 = 1_000_000_000; // 0x3b9aca00

/// Paymaster gas budgets attached when the sponsoring service leaves them out.
pub const DEFAULT_PAYMASTER_VERIFICATION_GAS_LIMIT: u64 = 200_000;
pub const DEFAULT_PAYMASTER_POST_OP_GAS_LIMIT: u64 = 50_000;

/// Well-formed 65-byte placeholder signature used only for gas simulation.
/// Bundlers check signature length before simulating; the content is never
/// validated at this stage and this value must never be submitted.
const DUMMY_SIGNATURE_HEX: &str = concat!(
    "fffffffffffffffffffffffffffffff0000000000000000000000000000000007",
    "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa1c",
);

pub fn dummy_signature() -> Bytes {
    // The constant is compile-time fixed valid hex.
    Bytes::from(hex::decode(DUMMY_SIGNATURE_HEX).unwrap())
}

pub fn fmt_address(addr: Address) -> String {
    format!("0x{}", hex::encode(addr.as_bytes()))
}

pub fn fmt_h256(h: H256) -> String {
    format!("0x{}", hex::encode(h.as_bytes()))
}

/// JSON-RPC "quantity" encoding.
pub fn fmt_u256(v: U256) -> String {
    if v.is_zero() {
        "0x0".to_string()
    } else {
        format!("0x{:x}", v)
    }
}

pub fn fmt_bytes(b: &Bytes) -> String {
    format!("0x{}", hex::encode(b.as_ref()))
}

pub fn parse_u256_quantity(s: &str) -> anyhow::Result<U256> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    if s.is_empty() {
        return Ok(U256::zero());
    }
    Ok(U256::from_str_radix(s, 16)?)
}

pub fn parse_h256(s: &str) -> anyhow::Result<H256> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(s)?;
    if bytes.len() != 32 {
        anyhow::bail!("expected 32-byte hex, got {} bytes", bytes.len());
    }
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&bytes);
    Ok(H256(arr))
}

pub fn parse_bytes(s: &str) -> anyhow::Result<Bytes> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    Ok(Bytes::from(hex::decode(s)?))
}

/// Packs two 128-bit values into one 32-byte big-endian word:
/// `high` occupies the upper 128 bits, `low` the lower 128 bits.
pub fn pack_uints(high: U256, low: U256) -> H256 {
    let mask = (U256::one() << 128) - 1;
    let packed = ((high & mask) << 128) | (low & mask);
    let mut buf = [0u8; 32];
    packed.to_big_endian(&mut buf);
    H256(buf)
}

/// Inverse of [`pack_uints`]: `(high, low)`.
pub fn unpack_uints(word: H256) -> (U256, U256) {
    let v = U256::from_big_endian(word.as_bytes());
    (v >> 128, v & ((U256::one() << 128) - 1))
}

/// Lower 16 bytes of a value's big-endian encoding (uint128 wire form).
pub fn to_u128_be(v: U256) -> [u8; 16] {
    let mut buf = [0u8; 32];
    v.to_big_endian(&mut buf);
    let mut out = [0u8; 16];
    out.copy_from_slice(&buf[16..]);
    out
}

/// Accepts a gas value only if it parses as a positive integer; anything else
/// (absent, empty, `0x0`, non-hex) yields the fallback.
pub fn gas_value_or(value: Option<&str>, fallback: U256) -> U256 {
    match value {
        Some(s) => match parse_u256_quantity(s) {
            Ok(v) if !v.is_zero() => v,
            _ => fallback,
        },
        None => fallback,
    }
}

/// Total gas cost at `max_fee_per_gas`, plus its decimal-ETH display form.
pub fn total_gas_cost(
    call_gas_limit: U256,
    verification_gas_limit: U256,
    pre_verification_gas: U256,
    max_fee_per_gas: U256,
) -> (U256, String) {
    let total = (call_gas_limit + verification_gas_limit + pre_verification_gas) * max_fee_per_gas;
    (total, format_ether(total))
}

/// Unpacked v0.8 wire form for `eth_estimateUserOperationGas` and
/// `eth_sendUserOperation`. Optional field groups are omitted entirely when
/// absent, never sent as nulls.
pub fn user_op_to_json(op: &UserOperation) -> serde_json::Value {
    let mut obj = serde_json::json!({
        "sender": fmt_address(op.sender),
        "nonce": fmt_u256(op.nonce),
        "callData": fmt_bytes(&op.call_data),
        "callGasLimit": fmt_u256(op.call_gas_limit),
        "verificationGasLimit": fmt_u256(op.verification_gas_limit),
        "preVerificationGas": fmt_u256(op.pre_verification_gas),
        "maxFeePerGas": fmt_u256(op.max_fee_per_gas),
        "maxPriorityFeePerGas": fmt_u256(op.max_priority_fee_per_gas),
        "signature": fmt_bytes(&op.signature),
    });

    let map = obj.as_object_mut().expect("object literal");
    if let (Some(factory), Some(factory_data)) = (op.factory, op.factory_data.as_ref()) {
        map.insert("factory".into(), fmt_address(factory).into());
        map.insert("factoryData".into(), fmt_bytes(factory_data).into());
    }
    if let Some(paymaster) = op.paymaster {
        map.insert("paymaster".into(), fmt_address(paymaster).into());
        map.insert(
            "paymasterVerificationGasLimit".into(),
            fmt_u256(
                op.paymaster_verification_gas_limit
                    .unwrap_or_else(|| U256::from(DEFAULT_PAYMASTER_VERIFICATION_GAS_LIMIT)),
            )
            .into(),
        );
        map.insert(
            "paymasterPostOpGasLimit".into(),
            fmt_u256(
                op.paymaster_post_op_gas_limit
                    .unwrap_or_else(|| U256::from(DEFAULT_PAYMASTER_POST_OP_GAS_LIMIT)),
            )
            .into(),
        );
        map.insert(
            "paymasterData".into(),
            fmt_bytes(op.paymaster_data.as_ref().unwrap_or(&Bytes::default())).into(),
        );
    }

    obj
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dummy_signature_is_65_bytes() {
        assert_eq!(dummy_signature().len(), 65);
    }

    #[test]
    fn pack_uints_places_high_and_low_words() {
        let word = pack_uints(U256::from(0x30d40u64), U256::from(0x186a0u64));
        assert_eq!(
            fmt_h256(word),
            "0x00000000000000000000000000030d40000000000000000000000000000186a0"
        );
    }

    #[test]
    fn pack_unpack_round_trip() {
        let cases = [
            (U256::zero(), U256::zero()),
            (U256::from(1u64), U256::from(2u64)),
            (U256::from(u128::MAX), U256::from(u128::MAX)),
            (U256::from(200_000u64), U256::from(100_000u64)),
        ];
        for (high, low) in cases {
            let (h, l) = unpack_uints(pack_uints(high, low));
            assert_eq!((h, l), (high, low));
        }
    }

    #[test]
    fn gas_value_accepts_only_positive_integers() {
        let fallback = U256::from(DEFAULT_VERIFICATION_GAS_LIMIT);
        assert_eq!(gas_value_or(None, fallback), fallback);
        assert_eq!(gas_value_or(Some("0x0"), fallback), fallback);
        assert_eq!(gas_value_or(Some("0x"), fallback), fallback);
        assert_eq!(gas_value_or(Some("not-hex"), fallback), fallback);
        assert_eq!(gas_value_or(Some("0x5208"), fallback), U256::from(0x5208));
        // No 0x prefix is still a valid quantity for liberal parsers.
        assert_eq!(gas_value_or(Some("5208"), fallback), U256::from(0x5208));
    }

    #[test]
    fn quantity_formatting() {
        assert_eq!(fmt_u256(U256::zero()), "0x0");
        assert_eq!(fmt_u256(U256::from(100_000u64)), "0x186a0");
        assert_eq!(parse_u256_quantity("0x186a0").unwrap(), U256::from(100_000u64));
        assert_eq!(parse_u256_quantity("0x").unwrap(), U256::zero());
    }

    #[test]
    fn user_op_json_omits_absent_groups() {
        let op = UserOperation::new(Address::repeat_byte(0x11));
        let json = user_op_to_json(&op);
        assert!(json.get("factory").is_none());
        assert!(json.get("paymaster").is_none());
        assert_eq!(json["signature"], "0x");
    }

    #[test]
    fn user_op_json_includes_paymaster_group() {
        let mut op = UserOperation::new(Address::repeat_byte(0x11));
        op.paymaster = Some(Address::repeat_byte(0x22));
        op.paymaster_data = Some(Bytes::from(vec![0xde, 0xad]));
        let json = user_op_to_json(&op);
        assert_eq!(json["paymasterData"], "0xdead");
        // Absent limits fall back to documented defaults.
        assert_eq!(json["paymasterVerificationGasLimit"], "0x30d40");
        assert_eq!(json["paymasterPostOpGasLimit"], "0xc350");
    }
}
