//! Stores that fail on demand, for write-through and rollback tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::impls::{MemoryInteractionLog, MemorySnapshotStore};
use crate::ports::{InteractionLog, LogEvent, SnapshotStore, StoreError};

/// Shared switch flipped by the test while the store is owned by a component.
#[derive(Debug, Default)]
pub struct FailSwitch {
    fail_writes: AtomicBool,
    corrupt_reads: AtomicBool,
    unreadable: AtomicBool,
    write_attempts: AtomicU32,
    quarantines: AtomicU32,
}

impl FailSwitch {
    pub fn fail_saves(&self, on: bool) {
        self.fail_writes.store(on, Ordering::SeqCst);
    }

    pub fn fail_appends(&self, on: bool) {
        self.fail_saves(on);
    }

    pub fn corrupt_reads(&self, on: bool) {
        self.corrupt_reads.store(on, Ordering::SeqCst);
    }

    /// Reads fail with an I/O error; the data itself is intact.
    pub fn fail_reads(&self, on: bool) {
        self.unreadable.store(on, Ordering::SeqCst);
    }

    pub fn quarantines(&self) -> u32 {
        self.quarantines.load(Ordering::SeqCst)
    }

    pub fn save_attempts(&self) -> u32 {
        self.write_attempts.load(Ordering::SeqCst)
    }

    fn check_write(&self) -> Result<(), StoreError> {
        self.write_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("injected write failure".into()))
        } else {
            Ok(())
        }
    }

    fn check_read(&self) -> Result<(), StoreError> {
        if self.unreadable.load(Ordering::SeqCst) {
            return Err(StoreError::io(
                "test store",
                std::io::Error::from(std::io::ErrorKind::PermissionDenied),
            ));
        }
        if self.corrupt_reads.load(Ordering::SeqCst) {
            Err(StoreError::corrupt("test store", "injected corruption"))
        } else {
            Ok(())
        }
    }
}

pub struct FailingSnapshotStore<T> {
    inner: MemorySnapshotStore<T>,
    switch: Arc<FailSwitch>,
}

impl<T> FailingSnapshotStore<T> {
    pub fn new() -> Self {
        Self {
            inner: MemorySnapshotStore::new(),
            switch: Arc::default(),
        }
    }

    pub fn handle(&self) -> Arc<FailSwitch> {
        Arc::clone(&self.switch)
    }
}

impl<T: Clone + Send> SnapshotStore<T> for FailingSnapshotStore<T> {
    fn load(&self) -> Result<Option<T>, StoreError> {
        self.switch.check_read()?;
        self.inner.load()
    }

    fn save(&self, value: &T) -> Result<(), StoreError> {
        self.switch.check_write()?;
        self.inner.save(value)
    }

    fn quarantine(&self) -> Result<Option<String>, StoreError> {
        self.switch.quarantines.fetch_add(1, Ordering::SeqCst);
        self.switch.corrupt_reads(false);
        self.inner.quarantine()
    }

    fn describe(&self) -> String {
        "failing memory store".to_string()
    }
}

#[derive(Default)]
pub struct FailingInteractionLog {
    inner: MemoryInteractionLog,
    switch: Arc<FailSwitch>,
}

impl FailingInteractionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> Arc<FailSwitch> {
        Arc::clone(&self.switch)
    }
}

impl InteractionLog for FailingInteractionLog {
    fn append(&self, event: &LogEvent) -> Result<(), StoreError> {
        self.switch.check_write()?;
        self.inner.append(event)
    }

    fn load(&self) -> Result<Vec<LogEvent>, StoreError> {
        self.switch.check_read()?;
        self.inner.load()
    }

    fn quarantine(&self) -> Result<Option<String>, StoreError> {
        self.switch.quarantines.fetch_add(1, Ordering::SeqCst);
        self.switch.corrupt_reads(false);
        self.inner.quarantine()
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.inner.clear()
    }

    fn describe(&self) -> String {
        "failing memory log".to_string()
    }
}
