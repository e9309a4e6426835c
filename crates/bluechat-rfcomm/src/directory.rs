//! Device directory: bonded and discovered device listings

use std::sync::Arc;

use bluechat_core::{Device, PermissionGate};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::adapter::BluetoothAdapter;

// ----------------------------------------------------------------------------
// Device Directory
// ----------------------------------------------------------------------------

/// Keeps the bonded and discovered-but-unbonded listings
///
/// Both listings are last-value channels written whole by this directory and
/// read by any number of observers.
pub struct DeviceDirectory {
    adapter: Arc<dyn BluetoothAdapter>,
    permissions: Arc<dyn PermissionGate>,
    scanned: watch::Sender<Vec<Device>>,
    paired: watch::Sender<Vec<Device>>,
}

impl DeviceDirectory {
    pub fn new(adapter: Arc<dyn BluetoothAdapter>, permissions: Arc<dyn PermissionGate>) -> Self {
        let (scanned, _) = watch::channel(Vec::new());
        let (paired, _) = watch::channel(Vec::new());
        Self {
            adapter,
            permissions,
            scanned,
            paired,
        }
    }

    /// Query the adapter's bonded set; empty when not permitted
    pub async fn list_bonded(&self) -> Vec<Device> {
        self.query_bonded().await.unwrap_or_default()
    }

    /// Replace the bonded listing with a fresh query
    pub async fn refresh_paired(&self) {
        if let Some(devices) = self.query_bonded().await {
            debug!("Bonded device listing refreshed ({} devices)", devices.len());
            self.paired.send_replace(devices);
        }
    }

    /// Record a device reported by discovery, ignoring duplicates
    pub fn on_device_found(&self, device: Device) {
        self.scanned.send_if_modified(|devices| {
            if devices.contains(&device) {
                return false;
            }
            debug!("Discovered {}", device);
            let mut updated = Vec::with_capacity(devices.len() + 1);
            updated.extend(devices.iter().cloned());
            updated.push(device);
            *devices = updated;
            true
        });
    }

    /// Whether the adapter currently lists `device` as bonded
    pub async fn is_bonded(&self, device: &Device) -> bool {
        self.list_bonded()
            .await
            .iter()
            .any(|bonded| bonded.same_address(device))
    }

    pub fn scanned_devices(&self) -> watch::Receiver<Vec<Device>> {
        self.scanned.subscribe()
    }

    pub fn paired_devices(&self) -> watch::Receiver<Vec<Device>> {
        self.paired.subscribe()
    }

    async fn query_bonded(&self) -> Option<Vec<Device>> {
        if !self.permissions.can_connect() {
            debug!("Connect permission missing, skipping bonded query");
            return None;
        }
        match self.adapter.bonded_devices().await {
            Ok(devices) => Some(devices),
            Err(e) => {
                warn!("Failed to query bonded devices: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryRadio;
    use bluechat_core::{CapabilityTier, RuntimePermissions};

    fn directory_with(permissions: RuntimePermissions) -> (DeviceDirectory, crate::memory::MemoryAdapter) {
        let radio = MemoryRadio::new();
        let adapter = radio.adapter("Local", "00:00:00:00:00:01");
        adapter.bond(Device::named("Buddy", "00:00:00:00:00:02"));
        let directory = DeviceDirectory::new(Arc::new(adapter.clone()), Arc::new(permissions));
        (directory, adapter)
    }

    #[test]
    fn test_found_devices_are_deduplicated_in_order() {
        let (directory, _adapter) = directory_with(RuntimePermissions::legacy());
        let first = Device::named("One", "AA:01");
        let second = Device::new(None, "AA:02");

        directory.on_device_found(first.clone());
        directory.on_device_found(second.clone());
        directory.on_device_found(first.clone());

        assert_eq!(*directory.scanned_devices().borrow(), vec![first, second]);
    }

    #[tokio::test]
    async fn test_refresh_paired_publishes_bonded_set() {
        let (directory, _adapter) = directory_with(RuntimePermissions::legacy());
        let mut paired = directory.paired_devices();

        directory.refresh_paired().await;

        assert!(paired.has_changed().unwrap());
        assert_eq!(
            *paired.borrow_and_update(),
            vec![Device::named("Buddy", "00:00:00:00:00:02")]
        );
        assert!(directory.is_bonded(&Device::new(None, "00:00:00:00:00:02")).await);
        assert!(!directory.is_bonded(&Device::new(None, "00:00:00:00:00:09")).await);
    }

    #[tokio::test]
    async fn test_denied_permission_yields_empty_listing() {
        let (directory, _adapter) =
            directory_with(RuntimePermissions::new(CapabilityTier::RuntimeGranted));
        let paired = directory.paired_devices();

        assert!(directory.list_bonded().await.is_empty());
        directory.refresh_paired().await;
        assert!(!paired.has_changed().unwrap());
    }
}
