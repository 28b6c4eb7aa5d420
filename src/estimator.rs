//! Gas estimation with dummy-signature simulation.

use ethers::types::{Address, U256};
use std::sync::Arc;

use crate::bundler::BundlerApi;
use crate::chain::ChainReader;
use crate::encoding::{dummy_signature, gas_value_or, total_gas_cost, user_op_to_json};
use crate::types::{GasEstimationResult, UserOperation};

pub struct GasEstimator {
    chain: Arc<dyn ChainReader>,
    bundler: Arc<dyn BundlerApi>,
    entry_point: Address,
}

impl GasEstimator {
    pub fn new(
        chain: Arc<dyn ChainReader>,
        bundler: Arc<dyn BundlerApi>,
        entry_point: Address,
    ) -> Self {
        Self {
            chain,
            bundler,
            entry_point,
        }
    }

    /// Estimates the three gas fields and current fees for `op`.
    ///
    /// Never fails: any error degrades to the operation's existing
    /// (builder-default) gas values with a zero displayed total. The bundler
    /// still gets the final word at submission time if those defaults are
    /// wrong.
    pub async fn estimate(&self, op: &UserOperation) -> (UserOperation, GasEstimationResult) {
        match self.try_estimate(op).await {
            Ok(done) => done,
            Err(e) => {
                tracing::warn!(error = %e, "gas estimation failed, using default values");
                let fallback = GasEstimationResult {
                    call_gas_limit: op.call_gas_limit,
                    verification_gas_limit: op.verification_gas_limit,
                    pre_verification_gas: op.pre_verification_gas,
                    max_fee_per_gas: op.max_fee_per_gas,
                    max_priority_fee_per_gas: op.max_priority_fee_per_gas,
                    total_gas_wei: U256::zero(),
                    total_gas_eth: "0".to_string(),
                };
                (op.clone(), fallback)
            }
        }
    }

    async fn try_estimate(
        &self,
        op: &UserOperation,
    ) -> anyhow::Result<(UserOperation, GasEstimationResult)> {
        let (max_fee, max_priority) = self.chain.fee_estimates().await;

        // Simulation copy: live fees plus a correctly sized placeholder
        // signature. The placeholder only ever exists on this copy.
        let mut sim = op.clone();
        sim.max_fee_per_gas = max_fee;
        sim.max_priority_fee_per_gas = max_priority;
        sim.signature = dummy_signature();

        let raw = self
            .bundler
            .estimate_user_operation_gas(user_op_to_json(&sim), self.entry_point)
            .await?;

        let mut result = op.clone();
        result.max_fee_per_gas = max_fee;
        result.max_priority_fee_per_gas = max_priority;
        result.call_gas_limit = gas_value_or(raw.call_gas_limit.as_deref(), op.call_gas_limit);
        result.verification_gas_limit = gas_value_or(
            raw.verification_gas_limit.as_deref(),
            op.verification_gas_limit,
        );
        result.pre_verification_gas = gas_value_or(
            raw.pre_verification_gas.as_deref(),
            op.pre_verification_gas,
        );

        // Pure deployment: no call requested, so no execution gas regardless
        // of what the estimator answered.
        if op.call_data.is_empty() {
            result.call_gas_limit = U256::zero();
        }

        let (total_gas_wei, total_gas_eth) = total_gas_cost(
            result.call_gas_limit,
            result.verification_gas_limit,
            result.pre_verification_gas,
            max_fee,
        );

        let gas = GasEstimationResult {
            call_gas_limit: result.call_gas_limit,
            verification_gas_limit: result.verification_gas_limit,
            pre_verification_gas: result.pre_verification_gas,
            max_fee_per_gas: max_fee,
            max_priority_fee_per_gas: max_priority,
            total_gas_wei,
            total_gas_eth,
        };

        Ok((result, gas))
    }
}
