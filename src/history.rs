//! Append-only history of executed user operations.
//!
//! The store is an external collaborator; the coordinator only appends
//! best-effort after a successful submission. Duplicate `userOpHash` inserts
//! are rejected quietly, never surfaced as a crash.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use ethers::types::Address;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

use crate::encoding::fmt_address;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserOpRecord {
    pub user_op_hash: String,
    pub sender: String,
    pub nonce: String,
    pub success: bool,
    pub transaction_hash: String,
    pub block_number: String,
    pub block_timestamp: String,
    pub calldata: String,
    pub payment_method: String,
    pub action_type: String,
}

#[derive(Clone, Debug, Default)]
pub struct HistoryQuery {
    pub limit: usize,
    pub offset: usize,
    /// Free-text substring filter on `actionType`.
    pub action_type: Option<String>,
}

#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Appends a record. Returns `false` when the store rejected it as a
    /// duplicate `userOpHash`.
    async fn append(&self, record: UserOpRecord) -> Result<bool>;

    /// Records for `sender`, newest first.
    async fn query(&self, sender: Address, query: &HistoryQuery) -> Result<Vec<UserOpRecord>>;
}

/// HTTP client for the companion history API.
#[derive(Debug, Clone)]
pub struct HistoryClient {
    base_url: String,
    http: reqwest::Client,
}

impl HistoryClient {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl HistoryStore for HistoryClient {
    async fn append(&self, record: UserOpRecord) -> Result<bool> {
        let url = format!("{}/userOp", self.base_url);
        let resp = self
            .http
            .post(&url)
            .json(&record)
            .send()
            .await
            .with_context(|| format!("POST {url} failed"))?;

        // The API answers 409 for a userOpHash it has already seen.
        if resp.status() == reqwest::StatusCode::CONFLICT {
            return Ok(false);
        }
        if !resp.status().is_success() {
            return Err(anyhow!("history API HTTP {}", resp.status()));
        }
        Ok(true)
    }

    async fn query(&self, sender: Address, query: &HistoryQuery) -> Result<Vec<UserOpRecord>> {
        let url = format!("{}/userOp", self.base_url);
        let mut req = self.http.get(&url).query(&[
            ("sender", fmt_address(sender)),
            ("limit", query.limit.to_string()),
            ("offset", query.offset.to_string()),
        ]);
        if let Some(action) = query.action_type.as_ref() {
            req = req.query(&[("actionType", action)]);
        }

        let resp = req.send().await.with_context(|| format!("GET {url} failed"))?;
        if !resp.status().is_success() {
            return Err(anyhow!("history API HTTP {}", resp.status()));
        }
        resp.json().await.context("failed to decode history rows")
    }
}

/// In-process store, used when no history API is configured and by tests.
#[derive(Debug, Default)]
pub struct MemoryHistory {
    rows: Mutex<Vec<UserOpRecord>>,
}

#[async_trait]
impl HistoryStore for MemoryHistory {
    async fn append(&self, record: UserOpRecord) -> Result<bool> {
        let mut rows = self.rows.lock().expect("history lock poisoned");
        if rows.iter().any(|r| r.user_op_hash == record.user_op_hash) {
            return Ok(false);
        }
        rows.push(record);
        Ok(true)
    }

    async fn query(&self, sender: Address, query: &HistoryQuery) -> Result<Vec<UserOpRecord>> {
        let sender = fmt_address(sender);
        let rows = self.rows.lock().expect("history lock poisoned");
        let limit = if query.limit == 0 { usize::MAX } else { query.limit };
        Ok(rows
            .iter()
            .rev()
            .filter(|r| r.sender == sender)
            .filter(|r| match query.action_type.as_ref() {
                Some(action) => r.action_type.contains(action.as_str()),
                None => true,
            })
            .skip(query.offset)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(hash: &str, sender: Address, action: &str) -> UserOpRecord {
        UserOpRecord {
            user_op_hash: hash.to_string(),
            sender: fmt_address(sender),
            nonce: "0x0".to_string(),
            success: true,
            transaction_hash: "0xabc".to_string(),
            block_number: "1".to_string(),
            block_timestamp: "1700000000".to_string(),
            calldata: "0x".to_string(),
            payment_method: "native".to_string(),
            action_type: action.to_string(),
        }
    }

    #[tokio::test]
    async fn duplicate_hash_is_rejected_without_error() {
        let store = MemoryHistory::default();
        let sender = Address::repeat_byte(0x11);
        assert!(store.append(record("0x1", sender, "execute")).await.unwrap());
        assert!(!store.append(record("0x1", sender, "execute")).await.unwrap());

        let rows = store.query(sender, &HistoryQuery::default()).await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn query_filters_by_sender_action_and_pages() {
        let store = MemoryHistory::default();
        let a = Address::repeat_byte(0x11);
        let b = Address::repeat_byte(0x22);
        store.append(record("0x1", a, "transfer")).await.unwrap();
        store.append(record("0x2", a, "approve")).await.unwrap();
        store.append(record("0x3", a, "transfer")).await.unwrap();
        store.append(record("0x4", b, "transfer")).await.unwrap();

        let transfers = store
            .query(
                a,
                &HistoryQuery {
                    action_type: Some("transfer".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(transfers.len(), 2);
        // Newest first.
        assert_eq!(transfers[0].user_op_hash, "0x3");

        let paged = store
            .query(
                a,
                &HistoryQuery {
                    limit: 1,
                    offset: 1,
                    action_type: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(paged.len(), 1);
        assert_eq!(paged[0].user_op_hash, "0x2");
    }
}
