//! Persisted, expirable sequences keyed by topic.
//!
//! Expiry is evaluated on every read. Reads that find an expired sequence
//! delete it, notify the [`ExpirationObserver`] once the store lock is
//! released, and then behave as if the topic were unknown. The periodic sweep
//! goes through the same purge routine.

use crate::error::EngineError;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use wc_core::storage::{get_json, set_json};
use wc_core::{Clock, ExpirableSequence, KeyValueStorage, ProtocolError, StorageError};

pub trait ExpirationObserver<T>: Send + Sync {
    fn sequence_expired(&self, sequence: &T);
}

pub struct SequenceStore<T: ExpirableSequence> {
    storage: Arc<dyn KeyValueStorage>,
    key: String,
    clock: Arc<dyn Clock>,
    lock: Mutex<()>,
    observer: Option<Arc<dyn ExpirationObserver<T>>>,
}

impl<T: ExpirableSequence> SequenceStore<T> {
    pub fn new(
        storage: Arc<dyn KeyValueStorage>,
        key: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { storage, key: key.into(), clock, lock: Mutex::new(()), observer: None }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ExpirationObserver<T>>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn set_sequence(&self, sequence: T) -> Result<(), StorageError> {
        let _guard = self.lock.lock().expect("sequence store mutex poisoned");
        let mut entries = self.load()?;
        entries.insert(sequence.topic().to_string(), sequence);
        self.save(&entries)
    }

    pub fn get_sequence(&self, topic: &str) -> Result<T, EngineError> {
        let (found, expired) = {
            let _guard = self.lock.lock().expect("sequence store mutex poisoned");
            let mut entries = self.load()?;
            match entries.get(topic) {
                Some(sequence) if sequence.is_expired(self.clock.now_secs()) => {
                    let expired = entries.remove(topic);
                    self.save(&entries)?;
                    (None, expired)
                }
                Some(sequence) => (Some(sequence.clone()), None),
                None => (None, None),
            }
        };
        if let Some(sequence) = expired {
            self.notify_expired(std::slice::from_ref(&sequence));
        }
        found.ok_or_else(|| ProtocolError::NoSequenceForTopic(topic.to_string()).into())
    }

    pub fn has_sequence(&self, topic: &str) -> Result<bool, EngineError> {
        match self.get_sequence(topic) {
            Ok(_) => Ok(true),
            Err(EngineError::Protocol(ProtocolError::NoSequenceForTopic(_))) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Live sequences. Expired ones are purged and reported on the way.
    pub fn get_all(&self) -> Result<Vec<T>, StorageError> {
        let (live, expired) = {
            let _guard = self.lock.lock().expect("sequence store mutex poisoned");
            let mut entries = self.load()?;
            let expired = self.purge_expired(&mut entries)?;
            (entries.into_values().collect::<Vec<_>>(), expired)
        };
        self.notify_expired(&expired);
        Ok(live)
    }

    /// Removes a sequence without firing the expiration callback.
    pub fn delete(&self, topic: &str) -> Result<Option<T>, StorageError> {
        let _guard = self.lock.lock().expect("sequence store mutex poisoned");
        let mut entries = self.load()?;
        let removed = entries.remove(topic);
        if removed.is_some() {
            self.save(&entries)?;
        }
        Ok(removed)
    }

    pub fn sweep_expired(&self) -> Result<Vec<T>, StorageError> {
        let expired = {
            let _guard = self.lock.lock().expect("sequence store mutex poisoned");
            let mut entries = self.load()?;
            self.purge_expired(&mut entries)?
        };
        self.notify_expired(&expired);
        Ok(expired)
    }

    /// Read-modify-write of one live sequence.
    pub fn update<F>(&self, topic: &str, apply: F) -> Result<T, EngineError>
    where
        F: FnOnce(&mut T) -> Result<(), EngineError>,
    {
        let mut sequence = self.get_sequence(topic)?;
        apply(&mut sequence)?;
        self.set_sequence(sequence.clone())?;
        Ok(sequence)
    }

    fn purge_expired(&self, entries: &mut BTreeMap<String, T>) -> Result<Vec<T>, StorageError> {
        let now = self.clock.now_secs();
        let expired_topics: Vec<String> = entries
            .iter()
            .filter(|(_, sequence)| sequence.is_expired(now))
            .map(|(topic, _)| topic.clone())
            .collect();
        if expired_topics.is_empty() {
            return Ok(Vec::new());
        }
        let expired =
            expired_topics.iter().filter_map(|topic| entries.remove(topic)).collect::<Vec<_>>();
        self.save(entries)?;
        Ok(expired)
    }

    fn notify_expired(&self, expired: &[T]) {
        for sequence in expired {
            log::info!("{} on topic {} expired", T::KIND, sequence.topic());
            if let Some(observer) = &self.observer {
                observer.sequence_expired(sequence);
            }
        }
    }

    fn load(&self) -> Result<BTreeMap<String, T>, StorageError> {
        Ok(get_json(self.storage.as_ref(), &self.key)?.unwrap_or_default())
    }

    fn save(&self, entries: &BTreeMap<String, T>) -> Result<(), StorageError> {
        set_json(self.storage.as_ref(), &self.key, entries)
    }
}
