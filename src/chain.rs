//! Chain read access. The coordinator pipeline only sees the [`ChainReader`]
//! trait; the process entry point owns the concrete ethers provider.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use ethers::abi::AbiParser;
use ethers::prelude::*;
use ethers::providers::Middleware;
use std::sync::Arc;

#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Entry point nonce for `(sender, key 0)`.
    async fn entry_point_nonce(&self, sender: Address) -> Result<U256>;

    /// Current `(maxFeePerGas, maxPriorityFeePerGas)`. Values the node cannot
    /// produce come back as zero rather than as an error; the degradation is
    /// visible in the estimate shown to the user.
    async fn fee_estimates(&self) -> (U256, U256);

    /// Whether `addr` has deployed code.
    async fn has_code(&self, addr: Address) -> Result<bool>;

    /// ERC-20 allowance granted by `owner` to `spender`.
    async fn allowance(&self, token: Address, owner: Address, spender: Address) -> Result<U256>;
}

/// Production [`ChainReader`] over an ethers middleware.
#[derive(Clone, Debug)]
pub struct EthersChain<M> {
    client: Arc<M>,
    entry_point: Address,
}

impl<M: Middleware + 'static> EthersChain<M> {
    pub fn new(client: Arc<M>, entry_point: Address) -> Self {
        Self {
            client,
            entry_point,
        }
    }

    /// Counterfactual account address for `(owner, salt)` plus its current
    /// deployment status.
    pub async fn counterfactual_account(
        &self,
        factory: Address,
        owner: Address,
        salt: U256,
    ) -> Result<(Address, bool)> {
        let abi = AbiParser::default()
            .parse(&["function getAddress(address owner, uint256 salt) view returns (address)"])?;
        let factory_c = Contract::new(factory, abi, self.client.clone());

        let account: Address = factory_c
            .method("getAddress", (owner, salt))?
            .call()
            .await
            .context("factory.getAddress failed")?;

        let deployed = self.has_code(account).await?;
        Ok((account, deployed))
    }

    /// `factoryData` for a not-yet-deployed account: the factory's
    /// `createAccount(owner, salt)` calldata (the factory address itself is
    /// carried separately in the v0.8 layout).
    pub fn deployment_factory_data(&self, owner: Address, salt: U256) -> Result<Bytes> {
        let abi = AbiParser::default()
            .parse(&["function createAccount(address owner, uint256 salt) returns (address)"])?;
        let function = abi.function("createAccount")?;
        let data = function
            .encode_input(&[
                ethers::abi::Token::Address(owner),
                ethers::abi::Token::Uint(salt),
            ])
            .context("failed to build createAccount calldata")?;
        Ok(Bytes::from(data))
    }

    /// Tokens the multi-token paymaster currently accepts, with ERC-20
    /// metadata for display.
    pub async fn supported_paymaster_tokens(
        &self,
        paymaster: Address,
    ) -> Result<Vec<(Address, String, String, u8)>> {
        let pm_abi = AbiParser::default().parse(&[
            "function getSupportedTokens() view returns (address[])",
            "function isTokenSupported(address token) view returns (bool)",
        ])?;
        let erc20_abi = AbiParser::default().parse(&[
            "function name() view returns (string)",
            "function symbol() view returns (string)",
            "function decimals() view returns (uint8)",
        ])?;
        let pm = Contract::new(paymaster, pm_abi, self.client.clone());

        let addresses: Vec<Address> = pm
            .method("getSupportedTokens", ())?
            .call()
            .await
            .context("paymaster.getSupportedTokens failed")?;

        let mut tokens = Vec::with_capacity(addresses.len());
        for address in addresses {
            let active: bool = pm.method("isTokenSupported", address)?.call().await?;
            if !active {
                continue;
            }
            let token = Contract::new(address, erc20_abi.clone(), self.client.clone());
            let name: String = token.method("name", ())?.call().await?;
            let symbol: String = token.method("symbol", ())?.call().await?;
            let decimals: u8 = token.method("decimals", ())?.call().await?;
            tokens.push((address, name, symbol, decimals));
        }
        Ok(tokens)
    }
}

#[async_trait]
impl<M: Middleware + 'static> ChainReader for EthersChain<M> {
    async fn entry_point_nonce(&self, sender: Address) -> Result<U256> {
        let abi = AbiParser::default()
            .parse(&["function getNonce(address sender, uint192 key) view returns (uint256)"])?;
        let entry_point = Contract::new(self.entry_point, abi, self.client.clone());

        let nonce: U256 = entry_point
            .method("getNonce", (sender, U256::zero()))?
            .call()
            .await
            .context("entryPoint.getNonce failed")?;
        Ok(nonce)
    }

    async fn fee_estimates(&self) -> (U256, U256) {
        match self.client.estimate_eip1559_fees(None).await {
            Ok((max_fee, max_priority)) => (max_fee, max_priority),
            Err(e) => {
                // Legacy nodes: reuse the gas price for both values, like a
                // pre-1559 transaction would.
                tracing::warn!(error = %e, "eip1559 fee estimate unavailable, falling back to gas price");
                match self.client.get_gas_price().await {
                    Ok(price) => (price, price),
                    Err(e) => {
                        tracing::warn!(error = %e, "gas price unavailable, using zero fees");
                        (U256::zero(), U256::zero())
                    }
                }
            }
        }
    }

    async fn has_code(&self, addr: Address) -> Result<bool> {
        let code = self
            .client
            .get_code(addr, None)
            .await
            .map_err(|e| anyhow!("eth_getCode failed: {e}"))?;
        Ok(!code.as_ref().is_empty())
    }

    async fn allowance(&self, token: Address, owner: Address, spender: Address) -> Result<U256> {
        let abi = AbiParser::default().parse(&[
            "function allowance(address owner, address spender) view returns (uint256)",
        ])?;
        let token_c = Contract::new(token, abi, self.client.clone());

        let allowance: U256 = token_c
            .method("allowance", (owner, spender))?
            .call()
            .await
            .context("token.allowance failed")?;
        Ok(allowance)
    }
}
