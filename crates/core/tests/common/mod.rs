// ═══════════════════════════════════════════════════════════════════
// Shared fixtures: scripted remote API, fixed clock, sample entities
// ═══════════════════════════════════════════════════════════════════

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pocketlog_core::clock::ManualClock;
use pocketlog_core::models::calorie::CalorieEntry;
use pocketlog_core::models::category::Category;
use pocketlog_core::models::period::local_to_utc;
use pocketlog_core::models::transaction::Transaction;
use pocketlog_core::remote::{RemoteApi, RemoteOutcome};
use pocketlog_core::storage::LocalStore;

/// Remote API that answers from a script, then falls back to a default outcome.
pub struct ScriptedRemote {
    script: Mutex<VecDeque<RemoteOutcome>>,
    fallback: Mutex<RemoteOutcome>,
    calls: Mutex<Vec<String>>,
    delay: Option<Duration>,
}

impl ScriptedRemote {
    pub fn new(fallback: RemoteOutcome) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(fallback),
            calls: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    pub fn succeeding() -> Self {
        Self::new(RemoteOutcome::success())
    }

    pub fn offline() -> Self {
        Self::new(RemoteOutcome::Retryable("network unreachable".into()))
    }

    pub fn rejecting(status: u16) -> Self {
        Self::new(RemoteOutcome::Terminal {
            status: Some(status),
            message: "invalid payload".into(),
        })
    }

    /// Every call waits this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Answer the next call with `outcome`, ahead of the fallback.
    pub fn push(&self, outcome: RemoteOutcome) {
        self.script.lock().unwrap().push_back(outcome);
    }

    pub fn set_fallback(&self, outcome: RemoteOutcome) {
        *self.fallback.lock().unwrap() = outcome;
    }

    /// Calls in order, formatted as `"<op> <entity> <id>"`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    async fn respond(&self, call: String) -> RemoteOutcome {
        self.calls.lock().unwrap().push(call);
        match self.delay {
            Some(delay) => tokio::time::sleep(delay).await,
            None => tokio::task::yield_now().await,
        }
        let scripted = self.script.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| self.fallback.lock().unwrap().clone())
    }
}

#[async_trait]
impl RemoteApi for ScriptedRemote {
    async fn create_transaction(&self, transaction: &Transaction) -> RemoteOutcome {
        self.respond(format!("create transaction {}", transaction.id)).await
    }

    async fn update_transaction(&self, transaction: &Transaction) -> RemoteOutcome {
        self.respond(format!("update transaction {}", transaction.id)).await
    }

    async fn delete_transaction(&self, id: &str) -> RemoteOutcome {
        self.respond(format!("delete transaction {id}")).await
    }

    async fn create_calorie_entry(&self, entry: &CalorieEntry) -> RemoteOutcome {
        self.respond(format!("create calorie_entry {}", entry.id)).await
    }

    async fn update_calorie_entry(&self, entry: &CalorieEntry) -> RemoteOutcome {
        self.respond(format!("update calorie_entry {}", entry.remote_id())).await
    }

    async fn delete_calorie_entry(&self, id: &str) -> RemoteOutcome {
        self.respond(format!("delete calorie_entry {id}")).await
    }
}

/// Local wall-clock time as an instant, so tests hold in any timezone.
pub fn local(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    local_to_utc(
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap(),
    )
}

/// 2024-03-15 (a Friday) 10:00 local.
pub fn reference_now() -> DateTime<Utc> {
    local(2024, 3, 15, 10, 0)
}

pub fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(reference_now()))
}

pub fn memory_store() -> Arc<LocalStore> {
    Arc::new(LocalStore::open_in_memory().unwrap())
}

pub fn dec(s: &str) -> Decimal {
    s.parse().unwrap()
}

pub fn txn(id: &str, amount: &str, category: Category, at: DateTime<Utc>) -> Transaction {
    let mut t = Transaction::new("user-1", dec(amount), category, format!("{category} spend"))
        .with_timestamp(at);
    t.id = id.to_string();
    t
}

pub fn meal(id: &str, food: &str, calories: i64, at: DateTime<Utc>) -> CalorieEntry {
    let mut e = CalorieEntry::new(food, calories).with_timestamp(at);
    e.id = id.to_string();
    e
}
