use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use uuid::Uuid;

use super::category::Category;
use crate::errors::CoreError;

/// Where a transaction was logged from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionSource {
    Chat,
    #[default]
    Manual,
    Voice,
    Import,
}

impl TransactionSource {
    pub fn as_key(&self) -> &'static str {
        match self {
            TransactionSource::Chat => "chat",
            TransactionSource::Manual => "manual",
            TransactionSource::Voice => "voice",
            TransactionSource::Import => "import",
        }
    }
}

impl FromStr for TransactionSource {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chat" => Ok(TransactionSource::Chat),
            "manual" => Ok(TransactionSource::Manual),
            "voice" => Ok(TransactionSource::Voice),
            "import" => Ok(TransactionSource::Import),
            _ => Err(CoreError::Deserialization(format!(
                "unknown transaction source '{s}'"
            ))),
        }
    }
}

/// A single money movement logged on the device.
///
/// The id is generated on the client so the row can exist locally long before
/// the remote service has seen it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: String,
    pub user_id: String,
    /// Signed amount; spending is positive, refunds negative.
    pub amount: Decimal,
    pub category: Category,
    pub description: String,
    #[serde(default)]
    pub merchant: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub source: TransactionSource,
    #[serde(default)]
    pub metadata: Option<BTreeMap<String, serde_json::Value>>,
}

impl Transaction {
    pub fn new(
        user_id: impl Into<String>,
        amount: Decimal,
        category: Category,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            amount,
            category,
            description: description.into(),
            merchant: None,
            timestamp: Utc::now(),
            source: TransactionSource::Manual,
            metadata: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_merchant(mut self, merchant: impl Into<String>) -> Self {
        self.merchant = Some(merchant.into());
        self
    }

    pub fn with_source(mut self, source: TransactionSource) -> Self {
        self.source = source;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value);
        self
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.id.trim().is_empty() {
            return Err(CoreError::ValidationError(
                "transaction id must not be empty".into(),
            ));
        }
        if self.user_id.trim().is_empty() {
            return Err(CoreError::ValidationError(format!(
                "transaction {} has no user id",
                self.id
            )));
        }
        Ok(())
    }
}
