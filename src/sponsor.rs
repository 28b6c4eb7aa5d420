//! Verifying-paymaster signing service client.
//!
//! The service receives a built UserOperation and answers with the v0.8 split
//! paymaster fields. Its authorization bytes are opaque to this client.

use crate::encoding::{parse_bytes, parse_u256_quantity};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use ethers::types::{Address, Bytes, U256};
use serde_json::Value;
use std::str::FromStr;

/// Paymaster fields as returned by the sponsor service. Gas limits are
/// optional; the resolver substitutes documented defaults when absent.
#[derive(Debug, Clone)]
pub struct SponsorshipData {
    pub paymaster: Address,
    pub paymaster_data: Bytes,
    pub paymaster_verification_gas_limit: Option<U256>,
    pub paymaster_post_op_gas_limit: Option<U256>,
}

#[async_trait]
pub trait SponsorApi: Send + Sync {
    async fn sponsor_user_operation(&self, user_op: Value) -> Result<SponsorshipData>;
}

#[derive(Debug, Clone)]
pub struct SponsorClient {
    url: String,
    http: reqwest::Client,
}

impl SponsorClient {
    pub fn new(url: String) -> Self {
        Self {
            url,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl SponsorApi for SponsorClient {
    async fn sponsor_user_operation(&self, user_op: Value) -> Result<SponsorshipData> {
        let body = serde_json::json!({ "userOp": user_op });

        let resp = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("POST {} failed", self.url))?;

        let status = resp.status();
        let result: Value = resp.json().await.context("failed to decode JSON")?;

        if !status.is_success() {
            return Err(anyhow!("sponsor service HTTP {}: {}", status, result));
        }

        parse_sponsorship(&result)
    }
}

/// Stand-in for deployments with no sponsor endpoint configured. Sponsored
/// payment (including the token approval sub-operation) fails cleanly instead
/// of at the network layer.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredSponsor;

#[async_trait]
impl SponsorApi for UnconfiguredSponsor {
    async fn sponsor_user_operation(&self, _user_op: Value) -> Result<SponsorshipData> {
        Err(anyhow!("no sponsor endpoint configured for this deployment"))
    }
}

fn parse_sponsorship(result: &Value) -> Result<SponsorshipData> {
    let paymaster = result
        .get("paymaster")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("sponsor response missing paymaster address"))?;
    let paymaster =
        Address::from_str(paymaster).context("invalid paymaster address in sponsor response")?;

    let paymaster_data = match result.get("paymasterData").and_then(|v| v.as_str()) {
        Some(s) => parse_bytes(s).context("invalid hex in paymasterData")?,
        None => Bytes::default(),
    };

    let gas_limit = |key: &str| -> Result<Option<U256>> {
        match result.get(key).and_then(|v| v.as_str()) {
            Some(s) => Ok(Some(
                parse_u256_quantity(s).with_context(|| format!("invalid quantity in {key}"))?,
            )),
            None => Ok(None),
        }
    };

    Ok(SponsorshipData {
        paymaster,
        paymaster_data,
        paymaster_verification_gas_limit: gas_limit("paymasterVerificationGasLimit")?,
        paymaster_post_op_gas_limit: gas_limit("paymasterPostOpGasLimit")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const PAYMASTER: &str = "0x2222222222222222222222222222222222222222";

    #[test]
    fn parse_full_sponsorship() {
        let res = json!({
            "paymaster": PAYMASTER,
            "paymasterData": "0xdeadbeef",
            "paymasterVerificationGasLimit": "0x30d40",
            "paymasterPostOpGasLimit": "0xc350",
        });
        let data = parse_sponsorship(&res).unwrap();
        assert_eq!(data.paymaster, Address::repeat_byte(0x22));
        assert_eq!(data.paymaster_data.as_ref(), &[0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(
            data.paymaster_verification_gas_limit,
            Some(U256::from(0x30d40u64))
        );
        assert_eq!(data.paymaster_post_op_gas_limit, Some(U256::from(0xc350u64)));
    }

    #[test]
    fn parse_minimal_sponsorship() {
        let res = json!({ "paymaster": PAYMASTER });
        let data = parse_sponsorship(&res).unwrap();
        assert!(data.paymaster_data.is_empty());
        assert!(data.paymaster_verification_gas_limit.is_none());
    }

    #[test]
    fn parse_rejects_missing_paymaster() {
        assert!(parse_sponsorship(&json!({ "paymasterData": "0x" })).is_err());
    }
}
