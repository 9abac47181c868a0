//! Queries answered by timelockd on behalf of the device

use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use timelock_api::{Command, ResponsePayload};
use timelock_config::EngineConfig;
use timelock_ipc::IpcClient;

use super::print_json;

/// Settings panel that grants one of the enforcement permissions
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Panel {
    Accessibility,
    Overlay,
}

impl Panel {
    fn command(self) -> Command {
        match self {
            Panel::Accessibility => Command::OpenAccessibilitySettings,
            Panel::Overlay => Command::OpenOverlaySettings,
        }
    }
}

async fn connect(config: &EngineConfig) -> Result<IpcClient> {
    IpcClient::connect(&config.service.socket_path)
        .await
        .with_context(|| {
            format!(
                "Failed to connect to timelockd at {:?}",
                config.service.socket_path
            )
        })
}

pub async fn apps(config: EngineConfig, json: bool) -> Result<()> {
    let mut client = connect(&config).await?;
    let apps = match client.request(Command::ListInstalledApps).await? {
        ResponsePayload::InstalledApps { apps } => apps,
        other => bail!("Unexpected response: {:?}", other),
    };

    if json {
        return print_json(&apps);
    }
    if apps.is_empty() {
        println!("No apps reported yet");
    }
    for app in &apps {
        println!("{:<32} {}", app.package_id.as_str(), app.display_name);
    }
    Ok(())
}

pub async fn permissions(config: EngineConfig, open: Option<Panel>, json: bool) -> Result<()> {
    let mut client = connect(&config).await?;

    if let Some(panel) = open {
        match client.request(panel.command()).await? {
            ResponsePayload::SettingsRequested => {}
            other => bail!("Unexpected response: {:?}", other),
        }
    }

    let status = match client.request(Command::CheckPermissions).await? {
        ResponsePayload::Permissions(status) => status,
        other => bail!("Unexpected response: {:?}", other),
    };

    if json {
        return print_json(&status);
    }
    println!("accessibility: {}", granted(status.accessibility_granted));
    println!("overlay:       {}", granted(status.overlay_granted));
    if let Some(panel) = open {
        println!("Requested the {:?} settings panel", panel);
    }
    Ok(())
}

pub async fn health(config: EngineConfig, json: bool) -> Result<()> {
    let mut client = connect(&config).await?;
    let status = match client.request(Command::GetHealth).await? {
        ResponsePayload::Health(status) => status,
        other => bail!("Unexpected response: {:?}", other),
    };

    if json {
        return print_json(&status);
    }
    println!("live:       {}", status.live);
    println!("store:      {}", if status.store_ok { "ok" } else { "failing" });
    println!("monitoring: {}", status.monitoring_active);
    println!("revision:   {}", status.revision);
    for reason in &status.degraded {
        println!("degraded:   {:?}", reason);
    }
    Ok(())
}

fn granted(value: bool) -> &'static str {
    if value { "granted" } else { "missing" }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panels_map_to_settings_commands() {
        assert!(matches!(
            Panel::Accessibility.command(),
            Command::OpenAccessibilitySettings
        ));
        assert!(matches!(Panel::Overlay.command(), Command::OpenOverlaySettings));
        assert_eq!(Panel::from_str("overlay", true), Ok(Panel::Overlay));
    }

    #[tokio::test]
    async fn missing_daemon_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = EngineConfig::default();
        config.service.socket_path = dir.path().join("absent.sock");

        assert!(health(config, false).await.is_err());
    }
}
