//! Human-readable ABI helpers for the handful of contract calls the pipeline
//! itself constructs: SimpleAccount dispatch wrappers and the ERC-20 approval
//! used by the token paymaster flow.

use anyhow::{anyhow, Context, Result};
use ethers::abi::{Abi, AbiParser, Function, Token};
use ethers::types::{Address, Bytes, U256};

pub const ACCOUNT_ABI: &[&str] = &[
    "function execute(address dest, uint256 value, bytes func)",
    "function executeBatch(address[] dest, uint256[] value, bytes[] func)",
];

pub const ERC20_ABI: &[&str] = &[
    "function approve(address spender, uint256 amount) returns (bool)",
    "function transfer(address to, uint256 amount) returns (bool)",
    "function transferFrom(address from, address to, uint256 amount) returns (bool)",
    "function mint(address to, uint256 amount)",
];

pub fn parse_abi(signatures: &[&str]) -> Result<Abi> {
    AbiParser::default()
        .parse(signatures)
        .map_err(|e| anyhow!("failed to parse human-readable ABI: {e}"))
}

fn encode_call(abi: &Abi, name: &str, args: &[Token]) -> Result<Bytes> {
    let function: &Function = abi
        .function(name)
        .with_context(|| format!("unknown function {name}"))?;
    let data = function
        .encode_input(args)
        .with_context(|| format!("failed to encode {name} calldata"))?;
    Ok(Bytes::from(data))
}

/// `SimpleAccount.execute(dest, value, func)`.
pub fn encode_execute(dest: Address, value: U256, func: Bytes) -> Result<Bytes> {
    let abi = parse_abi(ACCOUNT_ABI)?;
    encode_call(
        &abi,
        "execute",
        &[
            Token::Address(dest),
            Token::Uint(value),
            Token::Bytes(func.to_vec()),
        ],
    )
}

/// `SimpleAccount.executeBatch(dest[], value[], func[])`.
pub fn encode_execute_batch(calls: &[(Address, U256, Bytes)]) -> Result<Bytes> {
    let abi = parse_abi(ACCOUNT_ABI)?;
    encode_call(
        &abi,
        "executeBatch",
        &[
            Token::Array(calls.iter().map(|(d, _, _)| Token::Address(*d)).collect()),
            Token::Array(calls.iter().map(|(_, v, _)| Token::Uint(*v)).collect()),
            Token::Array(
                calls
                    .iter()
                    .map(|(_, _, f)| Token::Bytes(f.to_vec()))
                    .collect(),
            ),
        ],
    )
}

/// `ERC20.approve(spender, amount)`.
pub fn encode_erc20_approve(spender: Address, amount: U256) -> Result<Bytes> {
    let abi = parse_abi(ERC20_ABI)?;
    encode_call(
        &abi,
        "approve",
        &[Token::Address(spender), Token::Uint(amount)],
    )
}

/// The allowance granted to the token paymaster: effectively unlimited, so a
/// single approval covers all future operations.
pub fn max_allowance() -> U256 {
    U256::MAX
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execute_selector_and_args_round_trip() {
        let dest = Address::repeat_byte(0xbe);
        let data = encode_execute(dest, U256::from(7u64), Bytes::from(vec![0x01, 0x02])).unwrap();
        let abi = parse_abi(ACCOUNT_ABI).unwrap();
        let f = abi.function("execute").unwrap();
        assert_eq!(&data[..4], f.short_signature());
        let tokens = f.decode_input(&data[4..]).unwrap();
        assert_eq!(tokens[0], Token::Address(dest));
        assert_eq!(tokens[1], Token::Uint(U256::from(7u64)));
        assert_eq!(tokens[2], Token::Bytes(vec![0x01, 0x02]));
    }

    #[test]
    fn approve_encodes_max_allowance() {
        let data = encode_erc20_approve(Address::repeat_byte(0x22), max_allowance()).unwrap();
        // selector + 2 words
        assert_eq!(data.len(), 4 + 32 + 32);
        assert!(data[36..68].iter().all(|b| *b == 0xff));
    }
}
