use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::traits::{RemoteApi, RemoteOutcome};
use crate::config::CoreConfig;
use crate::errors::CoreError;
use crate::models::calorie::CalorieEntry;
use crate::models::transaction::Transaction;

/// Maximum length for error response bodies kept in outcomes and logs.
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// HTTP/JSON transport for the budget and calorie endpoints.
///
/// - `POST /budget/transactions/{add,update,delete}`
/// - `POST /calories/entries/{add,update,delete}`
///
/// Token acquisition and refresh happen elsewhere; this client only attaches
/// the bearer token it was given.
pub struct HttpRemoteApi {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpRemoteApi {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, CoreError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
        })
    }

    pub fn from_config(config: &CoreConfig) -> Result<Self, CoreError> {
        let base_url = config
            .api_base_url
            .clone()
            .ok_or_else(|| CoreError::Config("api_base_url is not set".into()))?;
        Self::new(base_url, config.remote_timeout())
    }

    /// New client with the given token, sharing the connection pool.
    pub fn with_token(&self, token: impl Into<String>) -> Self {
        Self {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            token: Some(token.into()),
        }
    }

    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            return body.to_string();
        }
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
    }

    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> RemoteOutcome {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.client.post(&url).json(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                let err = CoreError::from(e);
                warn!(path, error = %err, "Remote call failed before a response");
                return RemoteOutcome::Retryable(err.to_string());
            }
        };

        let status = response.status().as_u16();
        let text = match response.text().await {
            Ok(text) => text,
            Err(e) => {
                return if (200..300).contains(&status) {
                    // The mutation went through; only the body was lost.
                    RemoteOutcome::success()
                } else {
                    RemoteOutcome::Retryable(CoreError::from(e).to_string())
                };
            }
        };

        if !(200..300).contains(&status) {
            let outcome = RemoteOutcome::from_status(status, &Self::truncate_body(&text));
            debug!(path, status, ?outcome, "Remote call rejected");
            return outcome;
        }

        let server_id = serde_json::from_str::<MutationResponse>(&text)
            .ok()
            .and_then(MutationResponse::server_id);
        RemoteOutcome::Success { server_id }
    }
}

// ── Request / response bodies ───────────────────────────────────────

#[derive(Serialize)]
struct TransactionBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    transaction_id: Option<&'a str>,
    client_id: &'a str,
    amount: f64,
    category: &'a str,
    description: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    merchant: Option<&'a str>,
    timestamp: String,
    source: &'a str,
}

impl<'a> TransactionBody<'a> {
    fn new(t: &'a Transaction, include_id: bool) -> Self {
        Self {
            transaction_id: include_id.then_some(t.id.as_str()),
            client_id: &t.id,
            amount: t.amount.to_f64().unwrap_or_default(),
            category: t.category.as_key(),
            description: &t.description,
            merchant: t.merchant.as_deref(),
            timestamp: t.timestamp.to_rfc3339(),
            source: t.source.as_key(),
        }
    }
}

#[derive(Serialize)]
struct CalorieBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    entry_id: Option<&'a str>,
    client_id: &'a str,
    food_item: &'a str,
    calories: i64,
    protein: Option<i64>,
    carbs: Option<i64>,
    fat: Option<i64>,
    quantity: f64,
    unit: &'a str,
    timestamp: String,
}

impl<'a> CalorieBody<'a> {
    fn new(e: &'a CalorieEntry, include_id: bool) -> Self {
        Self {
            entry_id: include_id.then_some(e.remote_id()),
            client_id: &e.id,
            food_item: &e.food_item,
            calories: e.calories,
            protein: e.protein,
            carbs: e.carbs,
            fat: e.fat,
            quantity: e.quantity.to_f64().unwrap_or(1.0),
            unit: &e.unit,
            timestamp: e.timestamp.to_rfc3339(),
        }
    }
}

#[derive(Serialize)]
struct DeleteTransactionBody<'a> {
    transaction_id: &'a str,
}

#[derive(Serialize)]
struct DeleteEntryBody<'a> {
    entry_id: &'a str,
}

#[derive(Deserialize)]
struct MutationResponse {
    id: Option<serde_json::Value>,
    entry_id: Option<serde_json::Value>,
    transaction_id: Option<serde_json::Value>,
}

impl MutationResponse {
    fn server_id(self) -> Option<String> {
        [self.id, self.entry_id, self.transaction_id]
            .into_iter()
            .flatten()
            .find_map(|v| match v {
                serde_json::Value::String(s) => Some(s),
                serde_json::Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
    }
}

#[async_trait]
impl RemoteApi for HttpRemoteApi {
    async fn create_transaction(&self, transaction: &Transaction) -> RemoteOutcome {
        self.post("/budget/transactions/add", &TransactionBody::new(transaction, false))
            .await
    }

    async fn update_transaction(&self, transaction: &Transaction) -> RemoteOutcome {
        self.post("/budget/transactions/update", &TransactionBody::new(transaction, true))
            .await
    }

    async fn delete_transaction(&self, id: &str) -> RemoteOutcome {
        self.post(
            "/budget/transactions/delete",
            &DeleteTransactionBody { transaction_id: id },
        )
        .await
    }

    async fn create_calorie_entry(&self, entry: &CalorieEntry) -> RemoteOutcome {
        self.post("/calories/entries/add", &CalorieBody::new(entry, false))
            .await
    }

    async fn update_calorie_entry(&self, entry: &CalorieEntry) -> RemoteOutcome {
        self.post("/calories/entries/update", &CalorieBody::new(entry, true))
            .await
    }

    async fn delete_calorie_entry(&self, id: &str) -> RemoteOutcome {
        self.post("/calories/entries/delete", &DeleteEntryBody { entry_id: id })
            .await
    }
}
