//! End-to-end submission pipeline for one smart account:
//! build -> estimate -> confirm -> resolve payment -> pack + sign ->
//! re-estimate / re-sign -> submit -> receipt -> outcome.

use ethers::types::{Address, Bytes, H256};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::builder::{DeploymentPayload, GasOverrides, UserOperationBuilder};
use crate::bundler::{BundlerApi, UserOperationReceipt};
use crate::chain::ChainReader;
use crate::decode::{decode_call_data, DecodedCallData};
use crate::encoding::{dummy_signature, fmt_bytes, fmt_h256, fmt_u256, gas_value_or, user_op_to_json};
use crate::error::ExecuteError;
use crate::estimator::GasEstimator;
use crate::gate::{ConfirmationGate, OperationIntent};
use crate::history::{HistoryStore, UserOpRecord};
use crate::packing::UserOpSigner;
use crate::payment::PaymentResolver;
use crate::sponsor::SponsorApi;
use crate::types::{ExecuteOutcome, PaymentSelection, UserOperation};

/// Everything one coordinator needs, injected by the process entry point.
/// One coordinator serves exactly one sender account.
pub struct CoordinatorDeps {
    pub chain: Arc<dyn ChainReader>,
    pub bundler: Arc<dyn BundlerApi>,
    pub sponsor: Arc<dyn SponsorApi>,
    pub history: Arc<dyn HistoryStore>,
    pub gate: Arc<ConfirmationGate>,
    pub signer: UserOpSigner,
    pub sender: Address,
    pub entry_point: Address,
    pub token_paymaster: Address,
    pub default_token: Option<Address>,
}

#[derive(Clone, Debug)]
pub struct ExecuteOptions {
    pub deployment: Option<DeploymentPayload>,
    pub overrides: GasOverrides,
    /// Stop after the final signature instead of submitting.
    pub dry_run: bool,
    pub wait_for_receipt: bool,
    pub receipt_timeout: Duration,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            deployment: None,
            overrides: GasOverrides::default(),
            dry_run: false,
            wait_for_receipt: true,
            receipt_timeout: Duration::from_secs(60),
        }
    }
}

struct Submission {
    op: UserOperation,
    selection: PaymentSelection,
    user_op_hash: Option<H256>,
    receipt: Option<UserOperationReceipt>,
}

pub struct ExecutionCoordinator {
    bundler: Arc<dyn BundlerApi>,
    history: Arc<dyn HistoryStore>,
    gate: Arc<ConfirmationGate>,
    signer: UserOpSigner,
    sender: Address,
    entry_point: Address,
    builder: UserOperationBuilder,
    estimator: GasEstimator,
    resolver: PaymentResolver,
    /// Serializes whole runs for this sender so two in-flight submissions can
    /// never race on the same nonce.
    submission_lock: tokio::sync::Mutex<()>,
}

impl ExecutionCoordinator {
    pub fn new(deps: CoordinatorDeps) -> Self {
        let builder = UserOperationBuilder::new(deps.chain.clone());
        let estimator = GasEstimator::new(
            deps.chain.clone(),
            deps.bundler.clone(),
            deps.entry_point,
        );
        let resolver = PaymentResolver::new(
            deps.chain.clone(),
            deps.bundler.clone(),
            deps.sponsor,
            deps.signer.clone(),
            deps.entry_point,
            deps.token_paymaster,
            deps.default_token,
        );
        Self {
            bundler: deps.bundler,
            history: deps.history,
            gate: deps.gate,
            signer: deps.signer,
            sender: deps.sender,
            entry_point: deps.entry_point,
            builder,
            estimator,
            resolver,
            submission_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Runs one complete submission attempt for `call_data`.
    ///
    /// This is the coordinator's only public entry point and it never returns
    /// an error: every failure mode is folded into the outcome's success flag
    /// and error string.
    pub async fn execute_call_data(
        &self,
        call_data: Bytes,
        options: &ExecuteOptions,
    ) -> ExecuteOutcome {
        let _serial = self.submission_lock.lock().await;
        let decoded = decode_call_data(&call_data);

        match self.run(call_data, options).await {
            Ok(submission) => {
                let outcome = self.outcome_of(&submission, options);
                if outcome.success && submission.user_op_hash.is_some() {
                    self.persist_history(&submission, &decoded).await;
                }
                outcome
            }
            Err(e) => {
                if e.is_user_cancelled() {
                    tracing::info!("user cancelled the operation");
                } else {
                    tracing::error!(error = %e, "user operation execution failed");
                }
                let mut outcome = ExecuteOutcome::failure(e.to_string());
                if let ExecuteError::ReceiptTimeout(hash) = e {
                    // The operation was submitted; its status is unknown, not
                    // failed. Keep the hash so the caller can check later.
                    outcome.user_op_hash = Some(hash);
                }
                outcome
            }
        }
    }

    async fn run(
        &self,
        call_data: Bytes,
        options: &ExecuteOptions,
    ) -> Result<Submission, ExecuteError> {
        // Built -> Estimated
        let op = self
            .builder
            .build(
                self.sender,
                call_data,
                options.deployment.as_ref(),
                &options.overrides,
            )
            .await?;
        let (op, gas) = self.estimator.estimate(&op).await;

        // AwaitingConfirmation
        let intent = OperationIntent {
            decoded: decode_call_data(&op.call_data),
            gas,
        };
        let selection = self.gate.request(intent).await?;

        // PaymentResolved -> Signed
        let mut op = self.resolver.resolve(op, &selection).await?;
        let mut signed_digest = self.signer.sign(&mut op)?;

        // Best-effort re-estimate with the fully formed operation. Any gas
        // change invalidates the signature, so re-pack and re-sign.
        if self.reestimate(&mut op).await {
            signed_digest = self.signer.sign(&mut op)?;
        }

        // A signature over anything but the exact packed bytes below is a
        // programming error and must never reach the network.
        if self.signer.digest(&op) != signed_digest {
            return Err(ExecuteError::SignatureStale);
        }

        if options.dry_run {
            return Ok(Submission {
                op,
                selection,
                user_op_hash: None,
                receipt: None,
            });
        }

        // Submitted
        let user_op_hash = self
            .bundler
            .send_user_operation(user_op_to_json(&op), self.entry_point)
            .await
            .map_err(|e| ExecuteError::SubmissionRejected(e.to_string()))?;
        tracing::info!(user_op_hash = %fmt_h256(user_op_hash), "user operation submitted");

        // AwaitingReceipt
        let receipt = if options.wait_for_receipt {
            Some(
                self.bundler
                    .wait_user_operation_receipt(user_op_hash, options.receipt_timeout)
                    .await
                    .map_err(ExecuteError::Rpc)?
                    .ok_or(ExecuteError::ReceiptTimeout(user_op_hash))?,
            )
        } else {
            None
        };

        Ok(Submission {
            op,
            selection,
            user_op_hash: Some(user_op_hash),
            receipt,
        })
    }

    /// Returns true when any of the three gas fields changed. The comparison
    /// is numeric, so formatting differences can never count as a change.
    async fn reestimate(&self, op: &mut UserOperation) -> bool {
        let mut sim = op.clone();
        sim.signature = dummy_signature();

        let raw = match self
            .bundler
            .estimate_user_operation_gas(user_op_to_json(&sim), self.entry_point)
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(error = %e, "re-estimation failed, keeping signed gas values");
                return false;
            }
        };

        let call = if op.call_data.is_empty() {
            ethers::types::U256::zero()
        } else {
            gas_value_or(raw.call_gas_limit.as_deref(), op.call_gas_limit)
        };
        let verification = gas_value_or(
            raw.verification_gas_limit.as_deref(),
            op.verification_gas_limit,
        );
        let pre = gas_value_or(raw.pre_verification_gas.as_deref(), op.pre_verification_gas);

        let changed = call != op.call_gas_limit
            || verification != op.verification_gas_limit
            || pre != op.pre_verification_gas;
        if changed {
            tracing::info!("gas changed after signing, re-signing the operation");
            op.call_gas_limit = call;
            op.verification_gas_limit = verification;
            op.pre_verification_gas = pre;
        }
        changed
    }

    fn outcome_of(&self, submission: &Submission, options: &ExecuteOptions) -> ExecuteOutcome {
        if options.dry_run {
            return ExecuteOutcome {
                success: true,
                ..ExecuteOutcome::default()
            };
        }
        match submission.receipt.as_ref() {
            Some(receipt) => ExecuteOutcome {
                success: receipt.success,
                user_op_hash: submission.user_op_hash,
                transaction_hash: Some(receipt.transaction_hash),
                block_number: Some(receipt.block_number),
                error: if receipt.success {
                    None
                } else {
                    Some("operation reverted on-chain".to_string())
                },
            },
            // Submitted without waiting: reported as accepted.
            None => ExecuteOutcome {
                success: true,
                user_op_hash: submission.user_op_hash,
                transaction_hash: None,
                block_number: None,
                error: None,
            },
        }
    }

    async fn persist_history(&self, submission: &Submission, decoded: &DecodedCallData) {
        let Some(hash) = submission.user_op_hash else {
            return;
        };

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let record = UserOpRecord {
            user_op_hash: fmt_h256(hash),
            sender: crate::encoding::fmt_address(self.sender),
            nonce: fmt_u256(submission.op.nonce),
            success: true,
            transaction_hash: submission
                .receipt
                .as_ref()
                .map(|r| fmt_h256(r.transaction_hash))
                .unwrap_or_else(|| "0x".to_string()),
            block_number: submission
                .receipt
                .as_ref()
                .map(|r| r.block_number.to_string())
                .unwrap_or_else(|| "0".to_string()),
            block_timestamp: timestamp.to_string(),
            calldata: fmt_bytes(&submission.op.call_data),
            payment_method: submission.selection.label().to_string(),
            action_type: decoded.action_type(),
        };

        // The chain-level effect already happened; a store failure must never
        // change the user-visible outcome.
        match self.history.append(record).await {
            Ok(true) => {}
            Ok(false) => tracing::warn!(user_op_hash = %fmt_h256(hash), "history row already exists"),
            Err(e) => tracing::warn!(error = %e, "failed to persist user operation history"),
        }
    }

}
