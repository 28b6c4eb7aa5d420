//! Attaches the payment method chosen at the confirmation gate.

use ethers::types::{Address, Bytes, U256};
use std::sync::Arc;
use std::time::Duration;

use crate::builder::{GasOverrides, UserOperationBuilder};
use crate::bundler::BundlerApi;
use crate::calls::{encode_erc20_approve, encode_execute, max_allowance};
use crate::chain::ChainReader;
use crate::encoding::{
    fmt_h256, user_op_to_json, DEFAULT_PAYMASTER_POST_OP_GAS_LIMIT,
    DEFAULT_PAYMASTER_VERIFICATION_GAS_LIMIT,
};
use crate::error::ExecuteError;
use crate::estimator::GasEstimator;
use crate::packing::UserOpSigner;
use crate::sponsor::SponsorApi;
use crate::types::{PaymentSelection, UserOperation};

/// How long the nested approval sub-operation may wait for its receipt.
const APPROVAL_RECEIPT_TIMEOUT: Duration = Duration::from_secs(60);

pub struct PaymentResolver {
    chain: Arc<dyn ChainReader>,
    bundler: Arc<dyn BundlerApi>,
    sponsor: Arc<dyn SponsorApi>,
    signer: UserOpSigner,
    entry_point: Address,
    token_paymaster: Address,
    /// Token used when a `Token` selection names none explicitly.
    default_token: Option<Address>,
}

impl PaymentResolver {
    pub fn new(
        chain: Arc<dyn ChainReader>,
        bundler: Arc<dyn BundlerApi>,
        sponsor: Arc<dyn SponsorApi>,
        signer: UserOpSigner,
        entry_point: Address,
        token_paymaster: Address,
        default_token: Option<Address>,
    ) -> Self {
        Self {
            chain,
            bundler,
            sponsor,
            signer,
            entry_point,
            token_paymaster,
            default_token,
        }
    }

    /// Finalizes the payment fields of `op` per `selection`. For token
    /// payment this may first run a nested, blocking approval sub-operation;
    /// in that case the outer nonce is re-read afterwards so the two
    /// operations carry strictly increasing nonces.
    pub async fn resolve(
        &self,
        mut op: UserOperation,
        selection: &PaymentSelection,
    ) -> Result<UserOperation, ExecuteError> {
        match selection {
            PaymentSelection::Native => Ok(op),
            PaymentSelection::Sponsored => {
                self.attach_sponsorship(&mut op).await?;
                Ok(op)
            }
            PaymentSelection::Token { token } => {
                let token = token
                    .or(self.default_token)
                    .ok_or(ExecuteError::NoTokenSelected)?;

                let allowance = self
                    .chain
                    .allowance(token, op.sender, self.token_paymaster)
                    .await
                    .map_err(ExecuteError::Rpc)?;

                if allowance.is_zero() {
                    self.approve_token_for_paymaster(op.sender, token).await?;

                    // The approval consumed the nonce the outer operation was
                    // built with; take a fresh one.
                    op.nonce = self
                        .chain
                        .entry_point_nonce(op.sender)
                        .await
                        .map_err(|e| ExecuteError::NonceUnavailable(e.to_string()))?;
                }

                self.attach_token_paymaster(&mut op, token);
                Ok(op)
            }
        }
    }

    async fn attach_sponsorship(&self, op: &mut UserOperation) -> Result<(), ExecuteError> {
        let sponsorship = self
            .sponsor
            .sponsor_user_operation(user_op_to_json(op))
            .await
            .map_err(ExecuteError::Rpc)?;

        op.paymaster = Some(sponsorship.paymaster);
        op.paymaster_data = Some(sponsorship.paymaster_data);
        op.paymaster_verification_gas_limit = Some(
            sponsorship
                .paymaster_verification_gas_limit
                .unwrap_or_else(|| U256::from(DEFAULT_PAYMASTER_VERIFICATION_GAS_LIMIT)),
        );
        op.paymaster_post_op_gas_limit = Some(
            sponsorship
                .paymaster_post_op_gas_limit
                .unwrap_or_else(|| U256::from(DEFAULT_PAYMASTER_POST_OP_GAS_LIMIT)),
        );
        Ok(())
    }

    /// Multi-token paymaster encoding: the paymaster address plus the 20-byte
    /// token address as its data.
    fn attach_token_paymaster(&self, op: &mut UserOperation, token: Address) {
        op.paymaster = Some(self.token_paymaster);
        op.paymaster_data = Some(Bytes::from(token.as_bytes().to_vec()));
        op.paymaster_verification_gas_limit =
            Some(U256::from(DEFAULT_PAYMASTER_VERIFICATION_GAS_LIMIT));
        op.paymaster_post_op_gas_limit = Some(U256::from(DEFAULT_PAYMASTER_POST_OP_GAS_LIMIT));
    }

    /// Builds, sponsors, signs and submits the max-allowance approval and
    /// blocks on its receipt. This is a full nested submission with its own
    /// nonce and gas estimate; its failure aborts the outer operation.
    async fn approve_token_for_paymaster(
        &self,
        sender: Address,
        token: Address,
    ) -> Result<(), ExecuteError> {
        let approval = async {
            let approve = encode_erc20_approve(self.token_paymaster, max_allowance())
                .map_err(ExecuteError::Rpc)?;
            let call_data = encode_execute(token, U256::zero(), approve).map_err(ExecuteError::Rpc)?;

            let builder = UserOperationBuilder::new(self.chain.clone());
            let mut op = builder
                .build(sender, call_data, None, &GasOverrides::default())
                .await?;

            let estimator = GasEstimator::new(
                self.chain.clone(),
                self.bundler.clone(),
                self.entry_point,
            );
            (op, _) = estimator.estimate(&op).await;

            self.attach_sponsorship(&mut op).await?;
            self.signer.sign(&mut op)?;

            let hash = self
                .bundler
                .send_user_operation(user_op_to_json(&op), self.entry_point)
                .await
                .map_err(|e| ExecuteError::SubmissionRejected(e.to_string()))?;

            tracing::info!(user_op_hash = %fmt_h256(hash), "approval sub-operation submitted");

            let receipt = self
                .bundler
                .wait_user_operation_receipt(hash, APPROVAL_RECEIPT_TIMEOUT)
                .await
                .map_err(ExecuteError::Rpc)?
                .ok_or(ExecuteError::ReceiptTimeout(hash))?;

            if !receipt.success {
                return Err(ExecuteError::SubmissionRejected(format!(
                    "approval reverted in {}",
                    fmt_h256(receipt.transaction_hash)
                )));
            }
            Ok(())
        };

        approval
            .await
            .map_err(|e: ExecuteError| ExecuteError::ApprovalFailed(e.to_string()))
    }
}
