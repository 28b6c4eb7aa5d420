//! ERC-4337 bundler relay client (`eth_estimateUserOperationGas`,
//! `eth_sendUserOperation`, `eth_getUserOperationReceipt`).

use crate::encoding::{fmt_address, fmt_h256, parse_h256};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use ethers::types::{Address, H256};
use serde_json::Value;
use std::time::{Duration, Instant};

/// Gas fields exactly as the bundler returned them. Validation (positive
/// integer or fall back to a default) belongs to the estimator, so the raw
/// strings are passed through untouched.
#[derive(Debug, Clone, Default)]
pub struct RawGasEstimates {
    pub call_gas_limit: Option<String>,
    pub verification_gas_limit: Option<String>,
    pub pre_verification_gas: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UserOperationReceipt {
    pub success: bool,
    pub transaction_hash: H256,
    pub block_number: u64,
}

#[async_trait]
pub trait BundlerApi: Send + Sync {
    async fn estimate_user_operation_gas(
        &self,
        user_op: Value,
        entry_point: Address,
    ) -> Result<RawGasEstimates>;

    async fn send_user_operation(&self, user_op: Value, entry_point: Address) -> Result<H256>;

    /// Polls for the receipt. `Ok(None)` means the timeout elapsed without a
    /// receipt; the operation may still land on-chain later.
    async fn wait_user_operation_receipt(
        &self,
        user_op_hash: H256,
        timeout: Duration,
    ) -> Result<Option<UserOperationReceipt>>;
}

#[derive(Debug, Clone)]
pub struct BundlerClient {
    url: String,
    http: reqwest::Client,
    poll_interval: Duration,
}

impl BundlerClient {
    pub fn new(url: String) -> Self {
        Self {
            url,
            http: reqwest::Client::new(),
            poll_interval: Duration::from_millis(1500),
        }
    }

    async fn rpc(&self, method: &str, params: Value) -> Result<Value> {
        let req = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let resp = self
            .http
            .post(&self.url)
            .json(&req)
            .send()
            .await
            .with_context(|| format!("POST {} failed", self.url))?;

        let status = resp.status();
        let body: Value = resp.json().await.context("failed to decode JSON")?;

        if !status.is_success() {
            return Err(anyhow!("HTTP {}: {}", status, body));
        }

        if let Some(err) = body.get("error") {
            return Err(anyhow!("RPC error: {}", err));
        }

        body.get("result")
            .cloned()
            .ok_or_else(|| anyhow!("missing result field"))
    }
}

#[async_trait]
impl BundlerApi for BundlerClient {
    async fn estimate_user_operation_gas(
        &self,
        user_op: Value,
        entry_point: Address,
    ) -> Result<RawGasEstimates> {
        let params = serde_json::json!([user_op, fmt_address(entry_point)]);
        let res = self
            .rpc("eth_estimateUserOperationGas", params)
            .await
            .context("eth_estimateUserOperationGas failed")?;
        Ok(parse_raw_estimates(&res))
    }

    async fn send_user_operation(&self, user_op: Value, entry_point: Address) -> Result<H256> {
        let params = serde_json::json!([user_op, fmt_address(entry_point)]);
        let res = self
            .rpc("eth_sendUserOperation", params)
            .await
            .context("eth_sendUserOperation failed")?;
        parse_userop_hash(&res)
    }

    async fn wait_user_operation_receipt(
        &self,
        user_op_hash: H256,
        timeout: Duration,
    ) -> Result<Option<UserOperationReceipt>> {
        // A zero timeout means poll until a receipt turns up.
        let deadline = (!timeout.is_zero()).then(|| Instant::now() + timeout);
        loop {
            let params = serde_json::json!([fmt_h256(user_op_hash)]);
            match self.rpc("eth_getUserOperationReceipt", params).await {
                Ok(v) if !v.is_null() => return parse_receipt(&v).map(Some),
                Ok(_) => {}
                Err(e) => {
                    // transient errors are common on free-tier bundlers; keep polling
                    tracing::warn!(error = %e, "bundler receipt poll error");
                }
            }

            // The last sleep is clamped to the remaining budget so one final
            // poll lands at the deadline instead of a full interval past it.
            match next_poll_delay(deadline, self.poll_interval) {
                Some(delay) => tokio::time::sleep(delay).await,
                None => return Ok(None),
            }
        }
    }
}

fn next_poll_delay(deadline: Option<Instant>, poll_interval: Duration) -> Option<Duration> {
    let Some(deadline) = deadline else {
        return Some(poll_interval);
    };
    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining.is_zero() {
        None
    } else {
        Some(remaining.min(poll_interval))
    }
}

fn parse_raw_estimates(res: &Value) -> RawGasEstimates {
    let field = |key: &str| res.get(key).and_then(|v| v.as_str()).map(str::to_owned);
    RawGasEstimates {
        call_gas_limit: field("callGasLimit"),
        verification_gas_limit: field("verificationGasLimit"),
        pre_verification_gas: field("preVerificationGas"),
    }
}

fn parse_userop_hash(res: &Value) -> Result<H256> {
    // Most bundlers return the userOpHash directly as a JSON string. Some
    // wrap it in an object; accept both shapes.
    let hash_str = if let Some(s) = res.as_str() {
        s
    } else if let Some(s) = res.get("result").and_then(|v| v.as_str()) {
        s
    } else if let Some(s) = res.get("userOpHash").and_then(|v| v.as_str()) {
        s
    } else {
        return Err(anyhow!(
            "unexpected eth_sendUserOperation result shape (expected string or {{result: ...}}): {}",
            res
        ));
    };

    parse_h256(hash_str)
}

fn parse_quantity_or_number(v: &Value) -> Option<u64> {
    if let Some(n) = v.as_u64() {
        return Some(n);
    }
    let s = v.as_str()?;
    u64::from_str_radix(s.strip_prefix("0x").unwrap_or(s), 16).ok()
}

fn parse_receipt(res: &Value) -> Result<UserOperationReceipt> {
    let success = match res.get("success") {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s == "0x1" || s == "true",
        _ => return Err(anyhow!("receipt missing success flag: {res}")),
    };

    let inner = res
        .get("receipt")
        .ok_or_else(|| anyhow!("receipt missing inner transaction receipt"))?;
    let tx_hash = inner
        .get("transactionHash")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("receipt missing transactionHash"))?;
    let block_number = inner
        .get("blockNumber")
        .and_then(parse_quantity_or_number)
        .unwrap_or(0);

    Ok(UserOperationReceipt {
        success,
        transaction_hash: parse_h256(tx_hash)?,
        block_number,
    })
}
