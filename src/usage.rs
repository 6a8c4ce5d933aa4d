use log::debug;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{ AtomicU64, Ordering };

/// Fire-and-forget usage accounting.
pub trait UsageRecorder: Send + Sync {
    fn record_call(&self, model_id: &str);
    fn record_model_usage(&self, model_id: &str);
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsageSnapshot {
    pub total_calls: u64,
    pub per_model: HashMap<String, u64>,
}

#[derive(Default)]
pub struct UsageCounter {
    total_calls: AtomicU64,
    per_model: Mutex<HashMap<String, u64>>,
}

impl UsageCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> UsageSnapshot {
        let per_model = match self.per_model.lock() {
            Ok(counts) => counts.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        UsageSnapshot {
            total_calls: self.total_calls.load(Ordering::Relaxed),
            per_model,
        }
    }
}

impl UsageRecorder for UsageCounter {
    fn record_call(&self, model_id: &str) {
        let total = self.total_calls.fetch_add(1, Ordering::Relaxed) + 1;
        debug!("Model call #{} ({})", total, model_id);
    }

    fn record_model_usage(&self, model_id: &str) {
        let mut counts = match self.per_model.lock() {
            Ok(counts) => counts,
            Err(poisoned) => poisoned.into_inner(),
        };
        *counts.entry(model_id.to_string()).or_insert(0) += 1;
    }
}
