//! Adapter backend selection

use std::sync::Arc;

use bluechat_rfcomm::{BluetoothAdapter, MemoryRadio, SessionController};
use tracing::info;

use crate::config::{AppConfig, Backend};
use crate::error::Result;

/// Open the adapter selected by the configuration
pub async fn open_adapter(config: &AppConfig) -> Result<Arc<dyn BluetoothAdapter>> {
    match config.cli.backend {
        Backend::Memory => {
            let radio = MemoryRadio::new();
            let adapter = radio.adapter(
                config.cli.adapter_name.clone(),
                config.cli.adapter_address.clone(),
            );
            info!("Using in-memory adapter {}", adapter.device());
            Ok(Arc::new(adapter))
        }
        Backend::Bluez => open_bluez().await,
    }
}

#[cfg(all(target_os = "linux", feature = "bluez"))]
async fn open_bluez() -> Result<Arc<dyn BluetoothAdapter>> {
    let adapter = bluechat_rfcomm::BluezAdapter::open().await?;
    Ok(Arc::new(adapter))
}

#[cfg(not(all(target_os = "linux", feature = "bluez")))]
async fn open_bluez() -> Result<Arc<dyn BluetoothAdapter>> {
    Err(crate::error::CliError::FeatureNotAvailable(
        "BlueZ backend requires Linux and the `bluez` feature".to_string(),
    ))
}

/// Build a session controller on the configured backend
pub async fn controller(config: &AppConfig) -> Result<SessionController> {
    let adapter = open_adapter(config).await?;
    let permissions = Arc::new(config.permissions.gate());
    Ok(SessionController::new(adapter, permissions, config.rfcomm.clone())?)
}
