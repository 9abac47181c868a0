//! Session commands: each runs one engine operation and publishes the result

use anyhow::Result;
use std::path::Path;
use timelock_api::{AppEntry, AppMetadata, Command, ResponsePayload};
use timelock_config::EngineConfig;
use timelock_ipc::IpcClient;
use timelock_util::PackageId;
use tracing::debug;

use super::{describe, print_json};
use crate::context::ForegroundContext;

pub async fn select(
    config: EngineConfig,
    package_id: String,
    name: Option<String>,
    icon: Option<String>,
    json: bool,
) -> Result<()> {
    let mut ctx = ForegroundContext::open(config).await?;
    let metadata = resolve_metadata(ctx.socket_path(), PackageId::new(package_id), name, icon).await;

    let entry = ctx.engine().select_app(metadata, timelock_util::now())?;
    ctx.finish().await?;
    report(&entry, json)
}

pub async fn deselect(config: EngineConfig, package_id: String, json: bool) -> Result<()> {
    let mut ctx = ForegroundContext::open(config).await?;
    let removed = ctx
        .engine()
        .deselect_app(&PackageId::new(&package_id), timelock_util::now())?;
    ctx.finish().await?;

    match (removed, json) {
        (Some(entry), true) => print_json(&entry),
        (Some(entry), false) => {
            println!("Removed {}", entry.display_name);
            Ok(())
        }
        (None, true) => print_json(&serde_json::Value::Null),
        (None, false) => {
            println!("{} was not selected", package_id);
            Ok(())
        }
    }
}

pub async fn activate(
    config: EngineConfig,
    package_id: String,
    access: u64,
    lock: u64,
    json: bool,
) -> Result<()> {
    let mut ctx = ForegroundContext::open(config).await?;
    let entry = ctx
        .engine()
        .activate(&PackageId::new(package_id), access, lock, timelock_util::now())?;
    ctx.finish().await?;
    report(&entry, json)
}

pub async fn force_end(config: EngineConfig, package_id: String, json: bool) -> Result<()> {
    let mut ctx = ForegroundContext::open(config).await?;
    let entry = ctx
        .engine()
        .force_end(&PackageId::new(package_id), timelock_util::now())?;
    ctx.finish().await?;
    report(&entry, json)
}

pub async fn status(config: EngineConfig, json: bool) -> Result<()> {
    let mut ctx = ForegroundContext::open(config).await?;
    let snapshot = ctx.engine().snapshot(timelock_util::now());
    ctx.finish().await?;

    if json {
        return print_json(&snapshot);
    }

    if snapshot.document.is_empty() {
        println!("No apps selected");
    }
    for entry in snapshot.document.iter() {
        println!("{}", describe(entry));
    }
    for reason in &snapshot.degraded {
        println!("degraded: {:?}", reason);
    }
    Ok(())
}

fn report(entry: &AppEntry, json: bool) -> Result<()> {
    if json {
        return print_json(entry);
    }
    println!("{}", describe(entry));
    Ok(())
}

/// Explicit values win; otherwise use the name the device reported
async fn resolve_metadata(
    socket_path: &Path,
    package_id: PackageId,
    name: Option<String>,
    icon: Option<String>,
) -> AppMetadata {
    let installed = match name {
        Some(_) => None,
        None => installed_app(socket_path, &package_id).await,
    };

    let mut metadata = match (name, installed) {
        (Some(name), _) => AppMetadata::new(package_id.clone(), name),
        (None, Some(app)) => app,
        (None, None) => AppMetadata::new(package_id.clone(), package_id.as_str()),
    };
    if icon.is_some() {
        metadata.icon = icon;
    }
    metadata
}

async fn installed_app(socket_path: &Path, package_id: &PackageId) -> Option<AppMetadata> {
    let mut client = IpcClient::connect(socket_path).await.ok()?;
    match client.request(Command::ListInstalledApps).await {
        Ok(ResponsePayload::InstalledApps { apps }) => {
            apps.into_iter().find(|app| &app.package_id == package_id)
        }
        Ok(_) => None,
        Err(e) => {
            debug!(error = %e, "Installed apps unavailable");
            None
        }
    }
}
