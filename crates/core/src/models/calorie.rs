use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::CoreError;

/// One logged food item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalorieEntry {
    pub id: String,
    pub food_item: String,
    pub calories: i64,
    #[serde(default)]
    pub protein: Option<i64>,
    #[serde(default)]
    pub carbs: Option<i64>,
    #[serde(default)]
    pub fat: Option<i64>,
    pub quantity: Decimal,
    pub unit: String,
    pub timestamp: DateTime<Utc>,
    /// True once the remote service has acknowledged the latest local state.
    #[serde(default)]
    pub synced: bool,
    #[serde(default)]
    pub server_id: Option<String>,
}

impl CalorieEntry {
    pub fn new(food_item: impl Into<String>, calories: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            food_item: food_item.into(),
            calories,
            protein: None,
            carbs: None,
            fat: None,
            quantity: Decimal::ONE,
            unit: "serving".to_string(),
            timestamp: Utc::now(),
            synced: false,
            server_id: None,
        }
    }

    pub fn with_macros(mut self, protein: i64, carbs: i64, fat: i64) -> Self {
        self.protein = Some(protein);
        self.carbs = Some(carbs);
        self.fat = Some(fat);
        self
    }

    pub fn with_quantity(mut self, quantity: Decimal, unit: impl Into<String>) -> Self {
        self.quantity = quantity;
        self.unit = unit.into();
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// The id the remote service knows this entry by: its server id once
    /// assigned, the client id before that.
    pub fn remote_id(&self) -> &str {
        self.server_id.as_deref().unwrap_or(&self.id)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.id.trim().is_empty() {
            return Err(CoreError::ValidationError(
                "calorie entry id must not be empty".into(),
            ));
        }
        if self.food_item.trim().is_empty() {
            return Err(CoreError::ValidationError(format!(
                "calorie entry {} has no food item",
                self.id
            )));
        }
        if self.calories < 0 {
            return Err(CoreError::ValidationError(format!(
                "calories must be non-negative, got {}",
                self.calories
            )));
        }
        for (name, value) in [("protein", self.protein), ("carbs", self.carbs), ("fat", self.fat)] {
            if let Some(v) = value {
                if v < 0 {
                    return Err(CoreError::ValidationError(format!(
                        "{name} must be non-negative, got {v}"
                    )));
                }
            }
        }
        if self.quantity <= Decimal::ZERO {
            return Err(CoreError::ValidationError(format!(
                "quantity must be positive, got {}",
                self.quantity
            )));
        }
        Ok(())
    }
}
