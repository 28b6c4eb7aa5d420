//! Human-in-the-loop confirmation between estimation and payment resolution.
//!
//! A single-slot rendezvous: the coordinator suspends on [`ConfirmationGate::request`]
//! with the operation's decoded intent until the UI side answers with exactly
//! one [`PaymentSelection`] or a cancellation. An unresolved gate is a
//! resource leak, so every abandonment path rejects the waiter instead of
//! leaving it hanging: a second request rejects the first (`Superseded`), and
//! a torn-down UI (dropped intent stream or dropped gate) rejects with
//! `Abandoned`.

use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};

use crate::decode::DecodedCallData;
use crate::error::ExecuteError;
use crate::types::{GasEstimationResult, PaymentSelection};

/// What the user is asked to confirm.
#[derive(Clone, Debug)]
pub struct OperationIntent {
    pub decoded: DecodedCallData,
    pub gas: GasEstimationResult,
}

type Decision = Result<PaymentSelection, ExecuteError>;

pub struct ConfirmationGate {
    inner: Mutex<GateInner>,
}

struct GateInner {
    pending: Option<oneshot::Sender<Decision>>,
    intents: mpsc::UnboundedSender<OperationIntent>,
}

impl ConfirmationGate {
    /// Creates a gate plus the intent stream the UI side consumes. Dropping
    /// the stream counts as UI teardown: subsequent requests reject
    /// immediately.
    pub fn channel() -> (Arc<Self>, mpsc::UnboundedReceiver<OperationIntent>) {
        let (intents, rx) = mpsc::unbounded_channel();
        let gate = Arc::new(Self {
            inner: Mutex::new(GateInner {
                pending: None,
                intents,
            }),
        });
        (gate, rx)
    }

    /// Coordinator side: publish the intent and suspend until a decision.
    pub async fn request(&self, intent: OperationIntent) -> Decision {
        let rx = {
            let mut inner = self.inner.lock().expect("gate lock poisoned");

            if let Some(previous) = inner.pending.take() {
                let _ = previous.send(Err(ExecuteError::ConfirmationSuperseded));
            }

            if inner.intents.send(intent).is_err() {
                // Nobody is listening anymore; fail fast instead of parking
                // the coordinator forever.
                return Err(ExecuteError::ConfirmationAbandoned);
            }

            let (tx, rx) = oneshot::channel();
            inner.pending = Some(tx);
            rx
        };

        match rx.await {
            Ok(decision) => decision,
            // Sender dropped without a decision: gate teardown.
            Err(_) => Err(ExecuteError::ConfirmationAbandoned),
        }
    }

    /// UI side: resume the waiter with a payment selection. Returns `false`
    /// when nothing was pending.
    pub fn confirm(&self, selection: PaymentSelection) -> bool {
        self.resolve(Ok(selection))
    }

    /// UI side: abort the waiter with `UserCancelled`.
    pub fn cancel(&self) -> bool {
        self.resolve(Err(ExecuteError::UserCancelled))
    }

    /// Explicit teardown (component unmount). The waiter, if any, is rejected.
    pub fn abandon(&self) -> bool {
        self.resolve(Err(ExecuteError::ConfirmationAbandoned))
    }

    fn resolve(&self, decision: Decision) -> bool {
        let pending = self.inner.lock().expect("gate lock poisoned").pending.take();
        match pending {
            Some(tx) => tx.send(decision).is_ok(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::decode_call_data;
    use ethers::types::{Bytes, U256};

    fn intent() -> OperationIntent {
        OperationIntent {
            decoded: decode_call_data(&Bytes::default()),
            gas: GasEstimationResult {
                call_gas_limit: U256::zero(),
                verification_gas_limit: U256::zero(),
                pre_verification_gas: U256::zero(),
                max_fee_per_gas: U256::zero(),
                max_priority_fee_per_gas: U256::zero(),
                total_gas_wei: U256::zero(),
                total_gas_eth: "0".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn confirm_resumes_with_the_selection() {
        let (gate, mut intents) = ConfirmationGate::channel();
        let waiter = tokio::spawn({
            let gate = gate.clone();
            async move { gate.request(intent()).await }
        });

        intents.recv().await.expect("intent published");
        assert!(gate.confirm(PaymentSelection::Sponsored));
        assert_eq!(waiter.await.unwrap().unwrap(), PaymentSelection::Sponsored);
    }

    #[tokio::test]
    async fn cancel_rejects_with_user_cancelled() {
        let (gate, mut intents) = ConfirmationGate::channel();
        let waiter = tokio::spawn({
            let gate = gate.clone();
            async move { gate.request(intent()).await }
        });

        intents.recv().await.expect("intent published");
        assert!(gate.cancel());
        assert!(matches!(
            waiter.await.unwrap().unwrap_err(),
            ExecuteError::UserCancelled
        ));
    }

    #[tokio::test]
    async fn second_request_supersedes_the_first() {
        let (gate, mut intents) = ConfirmationGate::channel();
        let first = tokio::spawn({
            let gate = gate.clone();
            async move { gate.request(intent()).await }
        });
        intents.recv().await.expect("first intent");

        let second = tokio::spawn({
            let gate = gate.clone();
            async move { gate.request(intent()).await }
        });
        intents.recv().await.expect("second intent");

        assert!(matches!(
            first.await.unwrap().unwrap_err(),
            ExecuteError::ConfirmationSuperseded
        ));

        gate.confirm(PaymentSelection::Native);
        assert_eq!(second.await.unwrap().unwrap(), PaymentSelection::Native);
    }

    #[tokio::test]
    async fn dropped_intent_stream_rejects_instead_of_hanging() {
        let (gate, intents) = ConfirmationGate::channel();
        drop(intents);
        assert!(matches!(
            gate.request(intent()).await.unwrap_err(),
            ExecuteError::ConfirmationAbandoned
        ));
    }

    #[tokio::test]
    async fn explicit_abandon_rejects_the_waiter() {
        let (gate, mut intents) = ConfirmationGate::channel();
        let waiter = tokio::spawn({
            let gate = gate.clone();
            async move { gate.request(intent()).await }
        });
        intents.recv().await.expect("intent published");

        assert!(gate.abandon());
        assert!(matches!(
            waiter.await.unwrap().unwrap_err(),
            ExecuteError::ConfirmationAbandoned
        ));
        // Nothing left pending afterwards.
        assert!(!gate.cancel());
    }
}
