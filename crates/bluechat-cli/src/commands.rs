//! Command handlers for the BlueChat CLI

use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use bluechat_core::{BluechatError, Capability, Device, PermissionGate};
use bluechat_rfcomm::SessionController;

use crate::backend;
use crate::chat::run_chat;
use crate::cli::Commands;
use crate::config::{AppConfig, Backend};
use crate::demo::run_demo;
use crate::error::{CliError, Result};

/// Adapter summary printed by `status`
#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub backend: Backend,
    pub enabled: bool,
    pub name: Option<String>,
    pub service: String,
    pub bonded: Vec<Device>,
}

impl StatusReport {
    pub async fn collect(config: &AppConfig, controller: &SessionController) -> Self {
        Self {
            backend: config.cli.backend,
            enabled: controller.is_enabled().await,
            name: controller.adapter_name().await,
            service: controller.config().service().to_string(),
            bonded: controller.bonded_devices().await,
        }
    }
}

fn print_devices(title: &str, devices: &[Device]) {
    println!("{} ({}):", title, devices.len());
    if devices.is_empty() {
        println!("  (none)");
    }
    for device in devices {
        println!("  {:<24} {}", device.display_name(), device.address);
    }
}

/// Chat sessions need a radio shared with the peer, which the in-memory
/// backend never has across processes
fn require_shared_radio(config: &AppConfig, command: &str) -> Result<()> {
    if config.cli.backend == Backend::Memory {
        return Err(CliError::FeatureNotAvailable(format!(
            "`{}` needs a real adapter; run `demo` for an in-process session or pass `--backend bluez`",
            command
        )));
    }
    Ok(())
}

/// Command dispatcher for handling CLI commands
pub struct CommandDispatcher;

impl CommandDispatcher {
    /// Execute a CLI command
    pub async fn execute(command: Commands, config: AppConfig) -> Result<()> {
        match command {
            Commands::Status { json } => Self::handle_status_command(&config, json).await,
            Commands::Devices { scan } => Self::handle_devices_command(&config, scan).await,
            Commands::Listen => Self::handle_listen_command(&config).await,
            Commands::Connect { address } => Self::handle_connect_command(&config, &address).await,
            Commands::Demo { messages } => Self::handle_demo_command(&config, messages).await,
            Commands::Config => {
                println!("{}", AppConfig::example_config());
                Ok(())
            }
        }
    }

    /// Handle the status command
    async fn handle_status_command(config: &AppConfig, json: bool) -> Result<()> {
        let controller = backend::controller(config).await?;
        let report = StatusReport::collect(config, &controller).await;

        if json {
            println!("{}", serde_json::to_string_pretty(&report)?);
            return Ok(());
        }

        println!("Backend: {}", report.backend);
        println!("Adapter: {}", report.name.as_deref().unwrap_or("(unnamed)"));
        println!("Enabled: {}", if report.enabled { "yes" } else { "no" });
        println!("Service: {}", report.service);
        print_devices("Bonded devices", &report.bonded);
        Ok(())
    }

    /// Handle the devices command
    async fn handle_devices_command(config: &AppConfig, scan: Option<u64>) -> Result<()> {
        if scan.is_some() && !config.permissions.gate().can_scan() {
            return Err(BluechatError::PermissionDenied {
                capability: Capability::Scan,
            }
            .into());
        }

        let controller = backend::controller(config).await?;
        print_devices("Bonded devices", &controller.bonded_devices().await);

        if let Some(seconds) = scan {
            info!("Discovering for {} seconds...", seconds);
            controller.start_discovery();
            tokio::time::sleep(Duration::from_secs(seconds)).await;
            controller.stop_discovery().await;

            let scanned = controller.scanned_devices().borrow().clone();
            print_devices("Discovered devices", &scanned);
        }
        Ok(())
    }

    /// Handle the listen command
    async fn handle_listen_command(config: &AppConfig) -> Result<()> {
        require_shared_radio(config, "listen")?;
        let controller = backend::controller(config).await?;
        let results = controller.start_server();
        println!("Waiting for a peer on {}...", controller.config().service());
        run_chat(&controller, results, &config.cli.prompt).await
    }

    /// Handle the connect command
    async fn handle_connect_command(config: &AppConfig, address: &str) -> Result<()> {
        require_shared_radio(config, "connect")?;
        let controller = backend::controller(config).await?;
        let target = Device::new(None, address);

        let device = match controller
            .bonded_devices()
            .await
            .into_iter()
            .find(|bonded| bonded.same_address(&target))
        {
            Some(device) => device,
            None => {
                warn!("{} is not a bonded device; the link may be refused", address);
                target
            }
        };

        println!("Connecting to {}...", device);
        let results = controller.connect(&device);
        run_chat(&controller, results, &config.cli.prompt).await
    }

    /// Handle the demo command
    async fn handle_demo_command(config: &AppConfig, messages: usize) -> Result<()> {
        let delivered = run_demo(config.rfcomm.clone(), messages).await?;
        println!("Demo finished, {} messages delivered", delivered);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bluechat_core::CapabilityTier;

    fn memory_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.cli.backend = Backend::Memory;
        config
    }

    #[tokio::test]
    async fn test_chat_commands_refuse_memory_backend() {
        let result = CommandDispatcher::execute(Commands::Listen, memory_config()).await;
        assert!(matches!(result, Err(CliError::FeatureNotAvailable(_))));

        let connect = Commands::Connect {
            address: "00:00:00:00:00:02".to_string(),
        };
        let result = CommandDispatcher::execute(connect, memory_config()).await;
        match result {
            Err(CliError::FeatureNotAvailable(reason)) => {
                assert!(reason.contains("demo"));
                assert!(reason.contains("--backend bluez"));
            }
            other => panic!("expected FeatureNotAvailable, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_scan_without_permission_is_denied() {
        let mut config = memory_config();
        config.permissions.tier = CapabilityTier::RuntimeGranted;
        config.permissions.granted = vec![Capability::Connect];

        let devices = Commands::Devices { scan: Some(1) };
        let result = CommandDispatcher::execute(devices, config).await;
        assert!(matches!(
            result,
            Err(CliError::BluechatCore(BluechatError::PermissionDenied {
                capability: Capability::Scan
            }))
        ));
    }

    #[tokio::test]
    async fn test_devices_lists_memory_adapter_bonds() {
        let devices = Commands::Devices { scan: None };
        assert!(CommandDispatcher::execute(devices, memory_config()).await.is_ok());
    }
}
