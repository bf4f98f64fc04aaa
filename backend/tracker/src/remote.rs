//! Remote persistence seam.
//!
//! The tracker treats its backend as an async document store keyed by
//! `(collection, id)`. Three implementations exist:
//!
//! * [`crate::db::SqliteRemote`] — sqlx-backed, the default.
//! * [`crate::rest::RestRemote`] — PostgREST-style HTTP API.
//! * [`MemoryRemote`] — in-process, with an injectable failure switch.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{Result, TrackerError};

/// Named record collections exposed by the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Journeys,
    Donations,
    SmsLogs,
    DonorProfiles,
    Governorates,
    Programs,
    Villages,
    Families,
}

impl Collection {
    /// Collections cleared by an admin reset.
    pub const RESETTABLE: [Collection; 3] = [Self::Journeys, Self::Donations, Self::SmsLogs];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Journeys => "journeys",
            Self::Donations => "donations",
            Self::SmsLogs => "sms_logs",
            Self::DonorProfiles => "donor_profiles",
            Self::Governorates => "governorates",
            Self::Programs => "programs",
            Self::Villages => "villages",
            Self::Families => "families",
        }
    }
}

/// Equality filter over top-level document fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub equals: Vec<(String, Value)>,
}

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn where_eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::all().and_eq(field, value)
    }

    pub fn and_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.equals.push((field.into(), value.into()));
        self
    }

    pub fn matches(&self, doc: &Value) -> bool {
        self.equals
            .iter()
            .all(|(field, expected)| doc.get(field) == Some(expected))
    }
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Short backend name for log lines.
    fn name(&self) -> &'static str;

    async fn upsert(&self, collection: Collection, id: &str, record: &Value) -> Result<()>;

    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Value>>;

    async fn list(&self, collection: Collection, filter: &Filter) -> Result<Vec<Value>>;

    /// Returns whether a record was removed.
    async fn delete(&self, collection: Collection, id: &str) -> Result<bool>;

    /// Remove every record of a collection; returns how many were removed.
    async fn clear(&self, collection: Collection) -> Result<u64>;
}

// ─────────────────────────────────────────────────────────
// In-process backend
// ─────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MemoryRemote {
    records: Mutex<BTreeMap<(Collection, String), Value>>,
    failing: AtomicBool,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every call fails as if the service were unreachable.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn count(&self, collection: Collection) -> usize {
        self.records
            .lock()
            .keys()
            .filter(|(c, _)| *c == collection)
            .count()
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(TrackerError::Remote("memory remote is unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn upsert(&self, collection: Collection, id: &str, record: &Value) -> Result<()> {
        self.check()?;
        self.records
            .lock()
            .insert((collection, id.to_string()), record.clone());
        Ok(())
    }

    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Value>> {
        self.check()?;
        Ok(self.records.lock().get(&(collection, id.to_string())).cloned())
    }

    async fn list(&self, collection: Collection, filter: &Filter) -> Result<Vec<Value>> {
        self.check()?;
        Ok(self
            .records
            .lock()
            .iter()
            .filter(|((c, _), doc)| *c == collection && filter.matches(doc))
            .map(|(_, doc)| doc.clone())
            .collect())
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<bool> {
        self.check()?;
        Ok(self
            .records
            .lock()
            .remove(&(collection, id.to_string()))
            .is_some())
    }

    async fn clear(&self, collection: Collection) -> Result<u64> {
        self.check()?;
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|(c, _), _| *c != collection);
        Ok((before - records.len()) as u64)
    }
}
