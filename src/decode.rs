//! Best-effort calldata decoding for the confirmation step.
//!
//! A small registry of known function signatures is tried in a fixed priority
//! order (account dispatch wrappers first, then ERC-20). Anything that does
//! not match yields the tagged `Unknown` form instead of an error, so the
//! confirmation UI can always render something.

use ethers::abi::{Function, Token};
use ethers::types::{Address, Bytes, U256};

use crate::calls::{parse_abi, ACCOUNT_ABI, ERC20_ABI};

/// One human-readable action, either a direct call or one entry of a batch.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedOperation {
    pub function_name: String,
    pub target: Option<Address>,
    pub value: U256,
    pub args: Vec<Token>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DecodedCallData {
    pub function_name: String,
    pub operations: Vec<DecodedOperation>,
}

pub const UNKNOWN: &str = "Unknown";
pub const ETH_TRANSFER: &str = "ETH Transfer";

impl DecodedCallData {
    fn unknown() -> Self {
        Self {
            function_name: UNKNOWN.to_string(),
            operations: Vec::new(),
        }
    }

    /// Label used as the history record's `actionType`: the last decoded
    /// action of a batch, or the top-level name.
    pub fn action_type(&self) -> String {
        self.operations
            .last()
            .map(|op| op.function_name.clone())
            .unwrap_or_else(|| self.function_name.clone())
    }
}

fn known_functions() -> Vec<Function> {
    // Priority order: the account wrappers must win over any ERC-20 selector.
    let mut functions = Vec::new();
    for signatures in [ACCOUNT_ABI, ERC20_ABI] {
        if let Ok(abi) = parse_abi(signatures) {
            functions.extend(abi.functions().cloned());
        }
    }
    functions
}

fn match_selector<'a>(functions: &'a [Function], data: &[u8]) -> Option<(&'a Function, Vec<Token>)> {
    for f in functions {
        if data[..4] == f.short_signature() {
            if let Ok(tokens) = f.decode_input(&data[4..]) {
                return Some((f, tokens));
            }
        }
    }
    None
}

/// Decodes one inner (non-wrapper) call into a single operation.
fn decode_inner(functions: &[Function], target: Address, value: U256, data: &Bytes) -> DecodedOperation {
    if data.is_empty() {
        return DecodedOperation {
            function_name: ETH_TRANSFER.to_string(),
            target: Some(target),
            value,
            args: Vec::new(),
        };
    }
    if data.len() < 4 {
        return DecodedOperation {
            function_name: UNKNOWN.to_string(),
            target: Some(target),
            value,
            args: Vec::new(),
        };
    }
    match match_selector(functions, data) {
        Some((f, tokens)) => DecodedOperation {
            function_name: f.name.clone(),
            target: Some(target),
            value,
            args: tokens,
        },
        None => DecodedOperation {
            function_name: UNKNOWN.to_string(),
            target: Some(target),
            value,
            args: Vec::new(),
        },
    }
}

/// Decodes account calldata into the list of actions it will perform.
pub fn decode_call_data(call_data: &Bytes) -> DecodedCallData {
    if call_data.len() < 4 {
        return DecodedCallData::unknown();
    }

    let functions = known_functions();
    let Some((f, tokens)) = match_selector(&functions, call_data) else {
        return DecodedCallData::unknown();
    };

    match f.name.as_str() {
        "execute" => {
            let (Some(Token::Address(dest)), Some(Token::Uint(value)), Some(Token::Bytes(inner))) =
                (tokens.first(), tokens.get(1), tokens.get(2))
            else {
                return DecodedCallData::unknown();
            };
            let inner = Bytes::from(inner.clone());
            DecodedCallData {
                function_name: "execute".to_string(),
                operations: vec![decode_inner(&functions, *dest, *value, &inner)],
            }
        }
        "executeBatch" => {
            let (
                Some(Token::Array(dests)),
                Some(Token::Array(values)),
                Some(Token::Array(datas)),
            ) = (tokens.first(), tokens.get(1), tokens.get(2))
            else {
                return DecodedCallData::unknown();
            };
            let operations = dests
                .iter()
                .zip(values.iter())
                .zip(datas.iter())
                .filter_map(|((d, v), f)| match (d, v, f) {
                    (Token::Address(dest), Token::Uint(value), Token::Bytes(data)) => {
                        Some(decode_inner(&functions, *dest, *value, &Bytes::from(data.clone())))
                    }
                    _ => None,
                })
                .collect();
            DecodedCallData {
                function_name: "executeBatch".to_string(),
                operations,
            }
        }
        // A direct (non-wrapped) known call.
        name => DecodedCallData {
            function_name: name.to_string(),
            operations: vec![DecodedOperation {
                function_name: name.to_string(),
                target: None,
                value: U256::zero(),
                args: tokens,
            }],
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calls::{encode_erc20_approve, encode_execute, encode_execute_batch};
    use ethers::utils::parse_ether;

    #[test]
    fn decodes_native_transfer_through_execute() {
        let dest = Address::repeat_byte(0xbe);
        let one_eth = parse_ether(1u64).unwrap();
        let data = encode_execute(dest, one_eth, Bytes::default()).unwrap();

        let decoded = decode_call_data(&data);
        assert_eq!(decoded.function_name, "execute");
        assert_eq!(decoded.operations.len(), 1);
        let op = &decoded.operations[0];
        assert_eq!(op.function_name, ETH_TRANSFER);
        assert_eq!(op.target, Some(dest));
        assert_eq!(op.value, one_eth);
    }

    #[test]
    fn decodes_wrapped_erc20_approve() {
        let token = Address::repeat_byte(0x01);
        let spender = Address::repeat_byte(0x02);
        let approve = encode_erc20_approve(spender, U256::from(10u64)).unwrap();
        let data = encode_execute(token, U256::zero(), approve).unwrap();

        let decoded = decode_call_data(&data);
        assert_eq!(decoded.operations[0].function_name, "approve");
        assert_eq!(decoded.operations[0].target, Some(token));
        assert_eq!(decoded.action_type(), "approve");
    }

    #[test]
    fn decodes_batch_entries_in_order() {
        let token = Address::repeat_byte(0x01);
        let spender = Address::repeat_byte(0x02);
        let dest = Address::repeat_byte(0x03);
        let approve = encode_erc20_approve(spender, U256::from(10u64)).unwrap();
        let data = encode_execute_batch(&[
            (token, U256::zero(), approve),
            (dest, U256::from(5u64), Bytes::default()),
        ])
        .unwrap();

        let decoded = decode_call_data(&data);
        assert_eq!(decoded.function_name, "executeBatch");
        assert_eq!(decoded.operations.len(), 2);
        assert_eq!(decoded.operations[0].function_name, "approve");
        assert_eq!(decoded.operations[1].function_name, ETH_TRANSFER);
        assert_eq!(decoded.action_type(), ETH_TRANSFER);
    }

    #[test]
    fn unknown_selector_is_tagged_not_an_error() {
        let decoded = decode_call_data(&Bytes::from(vec![0xde, 0xad, 0xbe, 0xef, 0x00]));
        assert_eq!(decoded.function_name, UNKNOWN);
        assert!(decoded.operations.is_empty());
        assert_eq!(decoded.action_type(), UNKNOWN);
    }

    #[test]
    fn short_calldata_is_unknown() {
        assert_eq!(decode_call_data(&Bytes::default()).function_name, UNKNOWN);
        assert_eq!(
            decode_call_data(&Bytes::from(vec![0x01])).function_name,
            UNKNOWN
        );
    }
}
