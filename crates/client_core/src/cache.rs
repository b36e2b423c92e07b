use std::{
    collections::HashMap,
    sync::Mutex,
};

use shared::domain::CommissionId;

/// Key-value store for in-progress drafts so a half-filled form survives
/// navigating away. Keys are stable strings so a disk-backed
/// implementation can reuse them verbatim.
pub trait DraftCache: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn put(&self, key: &str, value: String);
    fn remove(&self, key: &str);
}

pub fn draft_key(id: Option<CommissionId>) -> String {
    match id {
        Some(id) => format!("commission-draft-{}", id.0),
        None => "commission-draft-new".to_string(),
    }
}

pub fn draft_step_key(id: Option<CommissionId>) -> String {
    match id {
        Some(id) => format!("commission-draft-step-{}", id.0),
        None => "commission-draft-step-new".to_string(),
    }
}

#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DraftCache for MemoryCache {
    fn get(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .ok()
            .and_then(|entries| entries.get(key).cloned())
    }

    fn put(&self, key: &str, value: String) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key.to_string(), value);
        }
    }

    fn remove(&self, key: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(key);
        }
    }
}
