//! Constructs the unsigned UserOperation skeleton.

use ethers::types::{Address, Bytes, U256};
use std::sync::Arc;

use crate::chain::ChainReader;
use crate::error::ExecuteError;
use crate::types::UserOperation;

/// Deployment payload for a counterfactual sender: the account factory and
/// its `createAccount` calldata. Always supplied as a pair.
#[derive(Clone, Debug)]
pub struct DeploymentPayload {
    pub factory: Address,
    pub factory_data: Bytes,
}

/// Caller-supplied gas/fee overrides. Anything left `None` gets the
/// documented conservative default.
#[derive(Clone, Debug, Default)]
pub struct GasOverrides {
    pub call_gas_limit: Option<U256>,
    pub verification_gas_limit: Option<U256>,
    pub pre_verification_gas: Option<U256>,
    pub max_fee_per_gas: Option<U256>,
    pub max_priority_fee_per_gas: Option<U256>,
}

pub struct UserOperationBuilder {
    chain: Arc<dyn ChainReader>,
}

impl UserOperationBuilder {
    pub fn new(chain: Arc<dyn ChainReader>) -> Self {
        Self { chain }
    }

    /// Builds an unsigned, unestimated UserOperation for `sender`.
    ///
    /// The nonce is always read fresh from the entry point; the client never
    /// chooses it. One network read, no shared-state mutation.
    pub async fn build(
        &self,
        sender: Address,
        call_data: Bytes,
        deployment: Option<&DeploymentPayload>,
        overrides: &GasOverrides,
    ) -> Result<UserOperation, ExecuteError> {
        let nonce = self
            .chain
            .entry_point_nonce(sender)
            .await
            .map_err(|e| ExecuteError::NonceUnavailable(e.to_string()))?;

        let mut op = UserOperation::new(sender);
        op.nonce = nonce;
        op.call_data = call_data;

        if let Some(deployment) = deployment {
            op.factory = Some(deployment.factory);
            op.factory_data = Some(deployment.factory_data.clone());
        }

        if let Some(v) = overrides.call_gas_limit {
            op.call_gas_limit = v;
        }
        if let Some(v) = overrides.verification_gas_limit {
            op.verification_gas_limit = v;
        }
        if let Some(v) = overrides.pre_verification_gas {
            op.pre_verification_gas = v;
        }
        if let Some(v) = overrides.max_fee_per_gas {
            op.max_fee_per_gas = v;
        }
        if let Some(v) = overrides.max_priority_fee_per_gas {
            op.max_priority_fee_per_gas = v;
        }

        Ok(op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{DEFAULT_CALL_GAS_LIMIT, DEFAULT_VERIFICATION_GAS_LIMIT};
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;

    struct FixedChain {
        nonce: Option<U256>,
    }

    #[async_trait]
    impl ChainReader for FixedChain {
        async fn entry_point_nonce(&self, _sender: Address) -> Result<U256> {
            self.nonce.ok_or_else(|| anyhow!("getNonce reverted"))
        }
        async fn fee_estimates(&self) -> (U256, U256) {
            (U256::zero(), U256::zero())
        }
        async fn has_code(&self, _addr: Address) -> Result<bool> {
            Ok(true)
        }
        async fn allowance(&self, _t: Address, _o: Address, _s: Address) -> Result<U256> {
            Ok(U256::zero())
        }
    }

    fn builder(nonce: Option<U256>) -> UserOperationBuilder {
        UserOperationBuilder::new(Arc::new(FixedChain { nonce }))
    }

    #[tokio::test]
    async fn builds_skeleton_with_fresh_nonce_and_defaults() {
        let sender = Address::repeat_byte(0x11);
        let op = builder(Some(U256::from(7u64)))
            .build(sender, Bytes::from(vec![0x01]), None, &GasOverrides::default())
            .await
            .unwrap();

        assert_eq!(op.nonce, U256::from(7u64));
        assert_eq!(op.call_gas_limit, U256::from(DEFAULT_CALL_GAS_LIMIT));
        assert_eq!(
            op.verification_gas_limit,
            U256::from(DEFAULT_VERIFICATION_GAS_LIMIT)
        );
        assert!(op.signature.is_empty());
        assert!(op.factory.is_none());
        assert!(op.paymaster.is_none());
    }

    #[tokio::test]
    async fn nonce_read_failure_is_nonce_unavailable() {
        let err = builder(None)
            .build(
                Address::repeat_byte(0x11),
                Bytes::default(),
                None,
                &GasOverrides::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ExecuteError::NonceUnavailable(_)));
    }

    #[tokio::test]
    async fn deployment_pair_is_attached_together() {
        let deployment = DeploymentPayload {
            factory: Address::repeat_byte(0xfa),
            factory_data: Bytes::from(vec![0x0b]),
        };
        let op = builder(Some(U256::zero()))
            .build(
                Address::repeat_byte(0x11),
                Bytes::default(),
                Some(&deployment),
                &GasOverrides::default(),
            )
            .await
            .unwrap();
        assert_eq!(op.factory, Some(Address::repeat_byte(0xfa)));
        assert_eq!(op.factory_data, Some(Bytes::from(vec![0x0b])));
    }

    #[tokio::test]
    async fn overrides_replace_defaults() {
        let overrides = GasOverrides {
            call_gas_limit: Some(U256::from(1u64)),
            max_fee_per_gas: Some(U256::from(2u64)),
            ..Default::default()
        };
        let op = builder(Some(U256::zero()))
            .build(Address::repeat_byte(0x11), Bytes::default(), None, &overrides)
            .await
            .unwrap();
        assert_eq!(op.call_gas_limit, U256::from(1u64));
        assert_eq!(op.max_fee_per_gas, U256::from(2u64));
        assert_eq!(
            op.verification_gas_limit,
            U256::from(DEFAULT_VERIFICATION_GAS_LIMIT)
        );
    }
}
