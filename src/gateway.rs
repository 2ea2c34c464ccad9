//! Balance gateway — client for the remote card balance service.
//!
//! One operation: fetch the balance and transaction history for a card code.
//! Any failure (network, non-2xx, malformed body) surfaces as a
//! [`GatewayError`]; the controller shows a single generic message and logs
//! the cause.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::error::GatewayError;

/// How many history entries to request from the service.
const HISTORY_REQUEST_LIMIT: usize = 100;

/// One transaction as reported by the gateway. Immutable snapshot data.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub time: DateTime<Utc>,
    /// Signed amount; negative means a debit.
    pub amount: f64,
    /// Merchant location names, ordered as received.
    #[serde(default)]
    pub location_name: Vec<String>,
    #[serde(default)]
    pub location_city: String,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub mcc: String,
    #[serde(default)]
    pub merchant_id: String,
    #[serde(default)]
    pub credit: bool,
    #[serde(default)]
    pub reversal: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Balance {
    pub available_amount: f64,
}

/// One point-in-time balance snapshot. Never cached across requests.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceSnapshot {
    pub phone: String,
    pub balance: Balance,
    /// Transaction history, newest first as received.
    #[serde(default)]
    pub history: Vec<Transaction>,
}

/// Service response envelope.
#[derive(Debug, Deserialize)]
struct BalanceResponse {
    #[allow(dead_code)]
    status: String,
    data: BalanceSnapshot,
}

/// Fetches balance and history for a card code.
#[async_trait]
pub trait BalanceGateway: Send + Sync {
    async fn fetch_balance(&self, code: &str) -> Result<BalanceSnapshot, GatewayError>;
}

/// HTTP client for the meal-card balance service.
pub struct MealCardGateway {
    base_url: String,
    client: reqwest::Client,
}

impl MealCardGateway {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl BalanceGateway for MealCardGateway {
    async fn fetch_balance(&self, code: &str) -> Result<BalanceSnapshot, GatewayError> {
        let url = format!(
            "{}/{code}?limit={HISTORY_REQUEST_LIMIT}",
            self.base_url.trim_end_matches('/')
        );

        // The service only answers browser-looking requests.
        let resp = self
            .client
            .get(&url)
            .header("accept", "application/json;text/html;*/*")
            .header("referer", "https://meal.gift-cards.ru/balance")
            .header("x-requested-with", "XMLHttpRequest")
            .header(
                "user-agent",
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
                 (KHTML, like Gecko) Chrome/142.0.0.0 Safari/537.36",
            )
            .send()
            .await
            .map_err(|e| GatewayError::Http(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(GatewayError::Status {
                code: resp.status().as_u16(),
            });
        }

        let body: BalanceResponse = resp
            .json()
            .await
            .map_err(|e| GatewayError::MalformedBody(e.to_string()))?;

        debug!(
            history_len = body.data.history.len(),
            "Balance fetched from gateway"
        );
        Ok(body.data)
    }
}
