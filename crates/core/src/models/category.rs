use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::errors::CoreError;

/// Spending category of a transaction.
///
/// Persisted by its stable string key (see [`Category::as_key`]), never by
/// declaration order, so variants can be reordered or added safely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Category {
    Groceries,
    Dining,
    Transport,
    Entertainment,
    Shopping,
    Housing,
    SavingsAndInvestments,
    Other,
}

/// 50/30/20 budget bucket a category rolls up into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetBucket {
    Needs,
    Wants,
    Savings,
}

impl Category {
    pub const ALL: [Category; 8] = [
        Category::Groceries,
        Category::Dining,
        Category::Transport,
        Category::Entertainment,
        Category::Shopping,
        Category::Housing,
        Category::SavingsAndInvestments,
        Category::Other,
    ];

    /// Stable storage / wire key.
    pub fn as_key(&self) -> &'static str {
        match self {
            Category::Groceries => "groceries",
            Category::Dining => "dining",
            Category::Transport => "transport",
            Category::Entertainment => "entertainment",
            Category::Shopping => "shopping",
            Category::Housing => "housing",
            Category::SavingsAndInvestments => "savingsAndInvestments",
            Category::Other => "other",
        }
    }

    pub fn bucket(&self) -> BudgetBucket {
        match self {
            Category::Groceries | Category::Housing | Category::Transport => BudgetBucket::Needs,
            Category::Dining | Category::Entertainment | Category::Shopping | Category::Other => {
                BudgetBucket::Wants
            }
            Category::SavingsAndInvestments => BudgetBucket::Savings,
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_key())
    }
}

impl FromStr for Category {
    type Err = CoreError;

    /// Accepts the stable keys case-insensitively, plus the older labels the
    /// chat backend still emits (`savings`, `investment`, `food`, `rent`, `utilities`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        let category = match lower.as_str() {
            "groceries" => Category::Groceries,
            "dining" | "food" => Category::Dining,
            "transport" => Category::Transport,
            "entertainment" => Category::Entertainment,
            "shopping" => Category::Shopping,
            "housing" | "rent" | "utilities" => Category::Housing,
            "savingsandinvestments" | "savings" | "investment" => Category::SavingsAndInvestments,
            "other" => Category::Other,
            _ => {
                return Err(CoreError::Deserialization(format!(
                    "unknown category key '{s}'"
                )))
            }
        };
        Ok(category)
    }
}
