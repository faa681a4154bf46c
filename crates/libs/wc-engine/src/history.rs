//! Correlates JSON-RPC requests with their responses, per topic.

use crate::error::EngineError;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use wc_core::storage::{get_json, set_json};
use wc_core::{
    JsonRpcRecord, JsonRpcRequest, JsonRpcResponse, KeyValueStorage, ProtocolError, StorageError,
};

pub const HISTORY_KEY: &str = "wc.jsonrpc.history";

pub struct JsonRpcHistory {
    storage: Arc<dyn KeyValueStorage>,
    lock: Mutex<()>,
}

impl JsonRpcHistory {
    pub fn new(storage: Arc<dyn KeyValueStorage>) -> Self {
        Self { storage, lock: Mutex::new(()) }
    }

    pub fn set(&self, topic: &str, request: &JsonRpcRequest) -> Result<(), EngineError> {
        let _guard = self.lock.lock().expect("history mutex poisoned");
        let mut records = self.load()?;
        if records.contains_key(&request.id) {
            return Err(ProtocolError::RequestDuplicate(request.id).into());
        }
        records.insert(
            request.id,
            JsonRpcRecord {
                id: request.id,
                topic: topic.to_string(),
                request: request.clone(),
                response: None,
            },
        );
        self.save(&records)?;
        Ok(())
    }

    pub fn get(&self, id: i64) -> Result<Option<JsonRpcRecord>, StorageError> {
        let _guard = self.lock.lock().expect("history mutex poisoned");
        Ok(self.load()?.remove(&id))
    }

    pub fn exist(&self, id: i64) -> Result<bool, StorageError> {
        let _guard = self.lock.lock().expect("history mutex poisoned");
        Ok(self.load()?.contains_key(&id))
    }

    /// Attaches `response` to its request. Each record resolves once.
    pub fn resolve(&self, response: &JsonRpcResponse) -> Result<JsonRpcRecord, EngineError> {
        let _guard = self.lock.lock().expect("history mutex poisoned");
        let mut records = self.load()?;
        let record =
            records.get_mut(&response.id).ok_or(ProtocolError::NoRecordForId(response.id))?;
        if record.response.is_some() {
            return Err(ProtocolError::ResponseDuplicate(response.id).into());
        }
        record.response = Some(response.clone());
        let resolved = record.clone();
        self.save(&records)?;
        Ok(resolved)
    }

    pub fn get_pending(&self) -> Result<Vec<JsonRpcRecord>, StorageError> {
        let _guard = self.lock.lock().expect("history mutex poisoned");
        Ok(self.load()?.into_values().filter(|record| record.response.is_none()).collect())
    }

    pub fn delete(&self, topic: &str) -> Result<usize, StorageError> {
        let _guard = self.lock.lock().expect("history mutex poisoned");
        let mut records = self.load()?;
        let before = records.len();
        records.retain(|_, record| record.topic != topic);
        let removed = before - records.len();
        if removed > 0 {
            self.save(&records)?;
        }
        Ok(removed)
    }

    fn load(&self) -> Result<BTreeMap<i64, JsonRpcRecord>, StorageError> {
        Ok(get_json(self.storage.as_ref(), HISTORY_KEY)?.unwrap_or_default())
    }

    fn save(&self, records: &BTreeMap<i64, JsonRpcRecord>) -> Result<(), StorageError> {
        set_json(self.storage.as_ref(), HISTORY_KEY, records)
    }
}
