//! DeviceRegistry - デバイス状態の正本
//!
//! # 責務
//! - 静的カタログから Device を生成し、スナップショットの状態を重ねる
//! - `apply_operation` で検証 → 変更 → flush（write-through）
//! - バッチ（カテゴリ指定）は各デバイス独立に適用し、結果をデバイスごとに返す
//!
//! # 不変条件
//! - flush が確認できるまで成功を返さない
//! - flush に失敗したら変更前の状態に戻す（部分的な状態は見えない）

mod effects;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::DeviceSpec;
use crate::domain::{
    ApplyReport, Arguments, Device, DeviceId, DeviceKind, HomeError, OperationSpec, Target,
    TargetOutcome,
};
use crate::ports::{Clock, SnapshotStore};
use crate::retry::RetryPolicy;

pub const STORE_NAME: &str = "device snapshot";

/// Persisted form of the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub saved_at: DateTime<Utc>,
    pub devices: Vec<Device>,
}

/// In-memory copy of every device, taken before a mutation.
#[derive(Debug, Clone)]
pub struct RegistryCheckpoint(Vec<Device>);

pub struct DeviceRegistry {
    /// Catalog order.
    devices: Vec<Device>,
    store: Box<dyn SnapshotStore<DeviceSnapshot>>,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field("devices", &self.devices.len())
            .field("store", &self.store.describe())
            .finish()
    }
}

impl DeviceRegistry {
    /// Build the registry from the catalog and overlay the persisted snapshot.
    ///
    /// An unreadable snapshot is quarantined and every device starts from its
    /// initial state; the recovered error is returned next to the registry.
    pub fn load(
        catalog: &[DeviceSpec],
        store: Box<dyn SnapshotStore<DeviceSnapshot>>,
        retry: RetryPolicy,
        clock: Arc<dyn Clock>,
    ) -> (Self, Option<HomeError>) {
        let mut registry = Self {
            devices: Vec::new(),
            store,
            retry,
            clock,
        };
        let recovered = registry.reload_from(catalog);
        (registry, recovered)
    }

    /// Re-read the persisted snapshot, discarding in-memory state.
    pub fn reload(&mut self) -> Option<HomeError> {
        let catalog: Vec<DeviceSpec> = self
            .devices
            .iter()
            .map(|d| DeviceSpec {
                id: d.id.clone(),
                kind: d.kind,
                name: d.name.clone(),
                room: d.room.clone(),
            })
            .collect();
        self.reload_from(&catalog)
    }

    fn reload_from(&mut self, catalog: &[DeviceSpec]) -> Option<HomeError> {
        let now = self.clock.now();
        let mut devices: Vec<Device> = catalog
            .iter()
            .map(|spec| Device::new(spec.id.clone(), spec.kind, spec.name.clone(), spec.room.clone(), now))
            .collect();

        let mut recovered = None;
        match self.store.load() {
            Ok(Some(snapshot)) => {
                let restored = overlay(&mut devices, snapshot);
                info!(store = %self.store.describe(), restored, "loaded device snapshot");
            }
            Ok(None) => debug!(store = %self.store.describe(), "no device snapshot yet"),
            Err(source) => {
                let corrupt = source.is_corrupt();
                let err = HomeError::PersistenceReadCorruption {
                    store: STORE_NAME,
                    source,
                };
                warn!(error = %err, "resetting devices to their initial state");
                // an unreadable file may be fine once the I/O problem clears
                if corrupt {
                    match self.store.quarantine() {
                        Ok(Some(aside)) => warn!(moved_to = %aside, "quarantined device snapshot"),
                        Ok(None) => {}
                        Err(e) => warn!(error = %e, "could not quarantine device snapshot"),
                    }
                }
                recovered = Some(err);
            }
        }
        self.devices = devices;
        recovered
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn device(&self, id: &DeviceId) -> Option<&Device> {
        self.devices.iter().find(|d| &d.id == id)
    }

    pub fn by_kind(&self, kind: DeviceKind) -> impl Iterator<Item = &Device> {
        self.devices.iter().filter(move |d| d.kind == kind)
    }

    pub fn by_room<'a>(&'a self, room: &'a str) -> impl Iterator<Item = &'a Device> {
        self.devices
            .iter()
            .filter(move |d| d.room.as_deref() == Some(room))
    }

    pub fn rooms(&self) -> Vec<&str> {
        let mut rooms: Vec<&str> = self.devices.iter().filter_map(|d| d.room.as_deref()).collect();
        rooms.sort_unstable();
        rooms.dedup();
        rooms
    }

    /// Device kind addressed by `target`.
    pub fn resolve_kind(&self, target: &Target) -> Result<DeviceKind, HomeError> {
        match target {
            Target::Device(id) => self
                .device(id)
                .map(|d| d.kind)
                .ok_or_else(|| HomeError::DeviceNotFound(id.to_string())),
            Target::Category(kind) => {
                if self.by_kind(*kind).next().is_some() {
                    Ok(*kind)
                } else {
                    Err(HomeError::DeviceNotFound(format!("no {kind} devices in the catalog")))
                }
            }
        }
    }

    /// Look up the operation for `target`, failing before any side effect.
    pub fn operation_spec(
        &self,
        target: &Target,
        operation: &str,
    ) -> Result<&'static OperationSpec, HomeError> {
        let kind = self.resolve_kind(target)?;
        kind.operation(operation).ok_or_else(|| HomeError::InvalidOperation {
            target: target.to_string(),
            operation: operation.to_string(),
            reason: format!("{kind} does not support it"),
        })
    }

    /// Current state of the targeted devices. No side effects.
    pub fn get_state(&self, target: &Target) -> Result<Vec<Device>, HomeError> {
        self.resolve_kind(target)?;
        Ok(self.targets(target).cloned().collect())
    }

    fn targets<'a>(&'a self, target: &'a Target) -> impl Iterator<Item = &'a Device> {
        self.devices.iter().filter(move |d| match target {
            Target::Device(id) => &d.id == id,
            Target::Category(kind) => d.kind == *kind,
        })
    }

    /// Validate and apply `operation` to every targeted device, then flush.
    ///
    /// Devices that refuse the operation show up as failed outcomes; they do
    /// not block the others. `Err` means nothing changed.
    pub async fn apply_operation(
        &mut self,
        target: &Target,
        operation: &str,
        args: &Arguments,
    ) -> Result<ApplyReport, HomeError> {
        let spec = self.operation_spec(target, operation)?;
        spec.validate(args)?;

        let checkpoint = self.checkpoint();
        let now = self.clock.now();
        let mut outcomes = Vec::new();
        for device in self.devices.iter_mut().filter(|d| match target {
            Target::Device(id) => &d.id == id,
            Target::Category(kind) => d.kind == *kind,
        }) {
            let outcome = match effects::apply(device.kind, operation, args, &device.state) {
                Ok(next) if next == device.state => {
                    TargetOutcome::unchanged(device.id.clone(), next)
                }
                Ok(next) => {
                    device.state = next.clone();
                    device.updated_at = now;
                    TargetOutcome::changed(device.id.clone(), next)
                }
                Err(reason) => {
                    debug!(device = %device.id, operation, %reason, "device refused operation");
                    TargetOutcome::failed(device.id.clone(), reason)
                }
            };
            outcomes.push(outcome);
        }

        let report = ApplyReport {
            batch: target.is_batch(),
            outcomes,
        };
        if report.any_changed()
            && let Err(err) = self.flush().await
        {
            error!(%target, operation, error = %err, "device state not persisted, rolling back");
            self.restore(checkpoint);
            return Err(err);
        }
        Ok(report)
    }

    /// Restore every device to its initial state (write-through).
    ///
    /// Returns how many devices changed.
    pub async fn reset_all(&mut self) -> Result<usize, HomeError> {
        let checkpoint = self.checkpoint();
        let now = self.clock.now();
        let mut changed = 0;
        for device in &mut self.devices {
            let initial = device.kind.initial_state();
            if device.state != initial {
                device.state = initial;
                device.updated_at = now;
                changed += 1;
            }
        }
        if let Err(err) = self.flush().await {
            self.restore(checkpoint);
            return Err(err);
        }
        info!(changed, "reset all devices");
        Ok(changed)
    }

    pub fn checkpoint(&self) -> RegistryCheckpoint {
        RegistryCheckpoint(self.devices.clone())
    }

    /// Put the in-memory state back. Call `flush` to persist it.
    pub fn restore(&mut self, checkpoint: RegistryCheckpoint) {
        self.devices = checkpoint.0;
    }

    /// Write the snapshot with bounded retry.
    pub async fn flush(&self) -> Result<(), HomeError> {
        let snapshot = DeviceSnapshot {
            saved_at: self.clock.now(),
            devices: self.devices.clone(),
        };
        self.retry
            .run(STORE_NAME, || self.store.save(&snapshot))
            .await
    }
}

/// Copy persisted state onto catalog devices. Returns how many were restored.
///
/// Devices no longer in the catalog are dropped; a device whose kind changed
/// keeps its initial state. Unknown state keys are ignored.
fn overlay(devices: &mut [Device], snapshot: DeviceSnapshot) -> usize {
    let mut restored = 0;
    for saved in snapshot.devices {
        let Some(device) = devices.iter_mut().find(|d| d.id == saved.id) else {
            debug!(device = %saved.id, "snapshot device not in catalog, dropping");
            continue;
        };
        if device.kind != saved.kind {
            warn!(device = %saved.id, saved = %saved.kind, catalog = %device.kind, "device kind changed, using initial state");
            continue;
        }
        for (key, value) in saved.state {
            if let Some(slot) = device.state.get_mut(&key) {
                *slot = value;
            }
        }
        device.updated_at = saved.updated_at;
        restored += 1;
    }
    restored
}
