use super::{SqnStore, SqnStoreError, SubscriberState};
use std::collections::HashMap;

/// In-memory SQN store for a single process run.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: HashMap<String, SubscriberState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }
}

impl SqnStore for MemoryStore {
    fn load(&self, imsi: &str) -> Result<Option<SubscriberState>, SqnStoreError> {
        if imsi.is_empty() {
            return Err(SqnStoreError::EmptyImsi);
        }
        Ok(self.data.get(imsi).cloned())
    }

    fn save(&mut self, imsi: &str, state: &SubscriberState) -> Result<(), SqnStoreError> {
        if imsi.is_empty() {
            return Err(SqnStoreError::EmptyImsi);
        }
        self.data.insert(imsi.to_string(), state.clone());
        Ok(())
    }

    fn reset(&mut self, imsi: &str) -> Result<(), SqnStoreError> {
        if imsi.is_empty() {
            return Err(SqnStoreError::EmptyImsi);
        }
        self.data.remove(imsi);
        Ok(())
    }
}
