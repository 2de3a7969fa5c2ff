//! In-memory stores for development and tests.

use std::sync::Mutex;

use crate::ports::{InteractionLog, LogEvent, SnapshotStore, StoreError};

/// MemorySnapshotStore は最後に保存された値を保持するだけ
#[derive(Debug)]
pub struct MemorySnapshotStore<T> {
    value: Mutex<Option<T>>,
}

impl<T> MemorySnapshotStore<T> {
    pub fn new() -> Self {
        Self {
            value: Mutex::new(None),
        }
    }

    pub fn with_value(value: T) -> Self {
        Self {
            value: Mutex::new(Some(value)),
        }
    }
}

impl<T> Default for MemorySnapshotStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send> SnapshotStore<T> for MemorySnapshotStore<T> {
    fn load(&self) -> Result<Option<T>, StoreError> {
        Ok(self.value.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    fn save(&self, value: &T) -> Result<(), StoreError> {
        *self.value.lock().unwrap_or_else(|e| e.into_inner()) = Some(value.clone());
        Ok(())
    }

    fn quarantine(&self) -> Result<Option<String>, StoreError> {
        self.value.lock().unwrap_or_else(|e| e.into_inner()).take();
        Ok(None)
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

/// MemoryInteractionLog は LogEvent を Vec に積む
#[derive(Debug, Default)]
pub struct MemoryInteractionLog {
    events: Mutex<Vec<LogEvent>>,
}

impl MemoryInteractionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_events(events: Vec<LogEvent>) -> Self {
        Self {
            events: Mutex::new(events),
        }
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl InteractionLog for MemoryInteractionLog {
    fn append(&self, event: &LogEvent) -> Result<(), StoreError> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
        Ok(())
    }

    fn load(&self) -> Result<Vec<LogEvent>, StoreError> {
        Ok(self.events.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    fn quarantine(&self) -> Result<Option<String>, StoreError> {
        self.clear()?;
        Ok(None)
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clear();
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
