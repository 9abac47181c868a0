//! timelockd - the timelock background context
//!
//! Wires together:
//! - Configuration loading
//! - The shared session store
//! - A session engine in the background role (expiry and launch verdicts)
//! - The monitor adapter fed by the device shim
//! - The IPC server carrying documents, reports and events

mod monitor;
mod transport;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use monitor::RemoteMonitor;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use timelock_api::{
    ClientRole, Command, ContextRole, ErrorCode, ErrorInfo, Event, EventPayload, HealthStatus,
    LaunchVerdict, Response, ResponsePayload,
};
use timelock_config::{load_config_or_default, EngineConfig};
use timelock_core::{
    Countdown, CoreEvent, ListenerError, PermissionGate, RepublishSchedule, SessionEngine,
    SyncOutbox, SyncPublisher,
};
use timelock_ipc::{IpcServer, ServerMessage};
use timelock_monitor_api::{filter_user_apps, MonitorAdapter, MonitorEvent, PermissionProbe};
use timelock_store::{KvStore, SessionStore, SqliteStore};
use timelock_util::{default_config_path, ClientId, RateLimiter};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use transport::IpcBroadcastTransport;

/// timelockd - app time limit enforcement service
#[derive(Parser, Debug)]
#[command(name = "timelockd")]
#[command(about = "Background context of timelock: enforces access and lock windows", long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/timelock/config.toml)
    #[arg(short, long, default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Socket path override (or set TIMELOCK_SOCKET env var)
    #[arg(short, long, env = "TIMELOCK_SOCKET")]
    socket: Option<PathBuf>,

    /// Data directory override (or set TIMELOCK_DATA_DIR env var)
    #[arg(short, long, env = "TIMELOCK_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

type SharedEngine = Arc<Mutex<SessionEngine>>;

/// Run engine work on the blocking pool.
///
/// Store access retries with `std::thread::sleep`, which must not stall the
/// service loop's worker.
async fn with_engine<T, F>(engine: &SharedEngine, f: F) -> Result<T>
where
    F: FnOnce(&mut SessionEngine) -> T + Send + 'static,
    T: Send + 'static,
{
    let engine = engine.clone();
    tokio::task::spawn_blocking(move || f(&mut engine.blocking_lock()))
        .await
        .context("Engine task failed")
}

/// Main service state
struct Service {
    config: EngineConfig,
    engine: SessionEngine,
    monitor: Arc<RemoteMonitor>,
    monitor_requests: mpsc::UnboundedReceiver<EventPayload>,
    core_events: mpsc::UnboundedReceiver<CoreEvent>,
    publisher: SyncPublisher,
    sync_rx: mpsc::UnboundedReceiver<timelock_api::SyncPayload>,
    ipc: Arc<IpcServer>,
    rate_limiter: RateLimiter,
}

impl Service {
    async fn new(args: &Args) -> Result<Self> {
        let mut config = load_config_or_default(&args.config)
            .with_context(|| format!("Failed to load config from {:?}", args.config))?;

        if let Some(socket) = &args.socket {
            config.service.socket_path = socket.clone();
        }
        if let Some(data_dir) = &args.data_dir {
            config.service.data_dir = data_dir.clone();
        }

        info!(
            config_path = %args.config.display(),
            max_controlled_apps = config.session.max_controlled_apps,
            enforcement_tick_ms = config.countdown.enforcement_tick.as_millis() as u64,
            "Configuration loaded"
        );

        std::fs::create_dir_all(&config.service.data_dir).with_context(|| {
            format!("Failed to create data directory {:?}", config.service.data_dir)
        })?;

        let db_path = config.service.db_path();
        let kv: Arc<dyn KvStore> = Arc::new(
            SqliteStore::open(&db_path)
                .with_context(|| format!("Failed to open database {:?}", db_path))?,
        );

        info!(db_path = %db_path.display(), "Store initialized");

        let (requests_tx, monitor_requests) = mpsc::unbounded_channel();
        let monitor = Arc::new(RemoteMonitor::new(requests_tx));

        let mut ipc = IpcServer::new(&config.service.socket_path);
        ipc.start().await?;
        let ipc = Arc::new(ipc);

        info!(socket_path = %config.service.socket_path.display(), "IPC server started");

        let (outbox, sync_rx) = SyncOutbox::channel();
        let engine = SessionEngine::new(
            config.clone(),
            ContextRole::Background,
            SessionStore::new(kv),
            PermissionGate::new(monitor.clone()),
            outbox.clone(),
        );

        let (core_tx, core_events) = mpsc::unbounded_channel();
        engine.dispatcher().register(move |event| {
            core_tx
                .send(event.clone())
                .map_err(|_| ListenerError("service loop stopped".into()))
        });

        let publisher = SyncPublisher::new(
            Arc::new(IpcBroadcastTransport::new(ipc.clone())),
            config.retry,
            &outbox,
        )
        .with_dispatcher(engine.dispatcher().clone());

        // 30 requests per second per client
        let rate_limiter = RateLimiter::new(30, Duration::from_secs(1));

        Ok(Self {
            config,
            engine,
            monitor,
            monitor_requests,
            core_events,
            publisher,
            sync_rx,
            ipc,
            rate_limiter,
        })
    }

    async fn run(self) -> Result<()> {
        let Service {
            config,
            mut engine,
            monitor,
            mut monitor_requests,
            mut core_events,
            publisher,
            sync_rx,
            ipc,
            rate_limiter,
        } = self;

        let mut ipc_messages = ipc
            .take_message_receiver()
            .await
            .context("IPC message receiver already taken")?;
        let mut monitor_events = monitor
            .subscribe()
            .context("Monitor event stream already taken")?;

        tokio::spawn(publisher.run(sync_rx));

        let ipc_accept = ipc.clone();
        tokio::spawn(async move {
            if let Err(e) = ipc_accept.run().await {
                error!(error = %e, "IPC server error");
            }
        });

        let engine: SharedEngine = Arc::new(Mutex::new(engine));

        // Catch up on anything that expired while we were down
        with_engine(&engine, |eng| eng.recover(timelock_util::now())).await?;
        let rate_limiter = Arc::new(Mutex::new(rate_limiter));

        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to create SIGTERM handler")?;
        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to create SIGINT handler")?;
        let mut sighup = signal(SignalKind::hangup()).context("Failed to create SIGHUP handler")?;

        let mut countdown = Countdown::new(config.countdown.enforcement_tick);
        let mut republish = RepublishSchedule::new(config.countdown.republish_every_ticks);

        info!("Service running");

        loop {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down gracefully");
                    break;
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, shutting down gracefully");
                    break;
                }
                _ = sighup.recv() => {
                    info!("Received SIGHUP, shutting down gracefully");
                    break;
                }

                now = countdown.tick() => {
                    let republish_due = republish.on_tick();
                    let changed = with_engine(&engine, move |eng| {
                        let events = eng.tick_all(now);
                        let changed = events
                            .iter()
                            .any(|e| matches!(e, CoreEvent::DocumentChanged { .. }));
                        if !changed && republish_due {
                            debug!(revision = eng.revision(), "Periodic republish");
                            eng.republish(now);
                        }
                        changed
                    })
                    .await;
                    match changed {
                        Ok(true) => republish.reset(),
                        Ok(false) => {}
                        Err(e) => error!(error = %e, "Enforcement tick failed"),
                    }
                }

                Some(event) = core_events.recv() => {
                    Self::handle_core_event(&monitor, &ipc, event).await;
                }

                Some(payload) = monitor_requests.recv() => {
                    ipc.broadcast_event(Event::new(payload));
                }

                Some(event) = monitor_events.recv() => {
                    Self::handle_monitor_event(event);
                }

                Some(msg) = ipc_messages.recv() => {
                    Self::handle_ipc_message(&engine, &monitor, &ipc, &rate_limiter, msg).await;
                }
            }
        }

        info!("Shutting down timelockd");

        ipc.broadcast_event(Event::new(EventPayload::Shutdown));

        match with_engine(&engine, |eng| eng.flush()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Final document write failed"),
            Err(e) => error!(error = %e, "Final document write did not run"),
        }

        if monitor.is_monitoring()
            && let Err(e) = monitor.stop_monitoring().await
        {
            warn!(error = %e, "Failed to stop monitoring");
        }

        info!("Shutdown complete");
        Ok(())
    }

    async fn handle_core_event(monitor: &Arc<RemoteMonitor>, ipc: &Arc<IpcServer>, event: CoreEvent) {
        match event {
            CoreEvent::MonitoringRequired => {
                // The adapter tells the shim itself
                if let Err(e) = monitor.start_monitoring().await {
                    warn!(error = %e, "Monitoring not started");
                }
            }
            CoreEvent::MonitoringIdle => {
                if let Err(e) = monitor.stop_monitoring().await {
                    warn!(error = %e, "Failed to stop monitoring");
                }
            }
            other => {
                if let Some(payload) = other.to_payload() {
                    ipc.broadcast_event(Event::new(payload));
                }
            }
        }
    }

    fn handle_monitor_event(event: MonitorEvent) {
        match event {
            MonitorEvent::AppForeground { package_id } => {
                debug!(package_id = %package_id, "Foreground app reported");
            }
            MonitorEvent::LaunchBlocked {
                package_id,
                display_name,
            } => {
                info!(package_id = %package_id, display_name = %display_name, "Overlay requested");
            }
        }
    }

    async fn handle_ipc_message(
        engine: &SharedEngine,
        monitor: &Arc<RemoteMonitor>,
        ipc: &Arc<IpcServer>,
        rate_limiter: &Arc<Mutex<RateLimiter>>,
        msg: ServerMessage,
    ) {
        match msg {
            ServerMessage::Request { client_id, request } => {
                {
                    let mut limiter = rate_limiter.lock().await;
                    if !limiter.check(&client_id) {
                        let response = Response::error(
                            request.request_id,
                            ErrorInfo::new(ErrorCode::RateLimited, "Too many requests"),
                        );
                        let _ = ipc.send_response(&client_id, response).await;
                        return;
                    }
                }

                let response = Self::handle_command(
                    engine,
                    monitor,
                    ipc,
                    &client_id,
                    request.request_id,
                    request.command,
                )
                .await;

                let _ = ipc.send_response(&client_id, response).await;
            }

            ServerMessage::ClientConnected { client_id, info } => {
                debug!(client_id = %client_id, role = ?info.role, uid = ?info.uid, "Client registered");
            }

            ServerMessage::ClientDisconnected { client_id } => {
                debug!(client_id = %client_id, "Client disconnected");
                rate_limiter.lock().await.remove_client(&client_id);
            }
        }
    }

    async fn handle_command(
        engine: &SharedEngine,
        monitor: &Arc<RemoteMonitor>,
        ipc: &Arc<IpcServer>,
        client_id: &ClientId,
        request_id: u64,
        command: Command,
    ) -> Response {
        let now = timelock_util::now();

        let role = ipc
            .get_client_info(client_id)
            .await
            .map(|info| info.role)
            .unwrap_or(ClientRole::Observer);
        if let Err(e) = authorize(role, &command) {
            return Response::error(request_id, e);
        }

        match command {
            Command::GetSnapshot => {
                let snapshot = engine.lock().await.snapshot(now);
                Response::success(request_id, ResponsePayload::Snapshot(snapshot))
            }

            Command::PublishDocument { payload } => {
                let offered = payload.clone();
                let applied = with_engine(engine, move |eng| {
                    let accepted = eng.apply_remote(offered);
                    (accepted, eng.revision())
                })
                .await;
                let (accepted, revision) = match applied {
                    Ok(applied) => applied,
                    Err(e) => return engine_failure(request_id, e),
                };

                if accepted {
                    // Other subscribers (overlay, observers) follow the same document
                    ipc.broadcast_event(Event::new(EventPayload::DocumentPublished(payload)));
                }
                Response::success(request_id, ResponsePayload::Published { accepted, revision })
            }

            Command::SubscribeEvents => Response::success(
                request_id,
                ResponsePayload::Subscribed {
                    client_id: client_id.clone(),
                },
            ),

            Command::UnsubscribeEvents => Response::success(request_id, ResponsePayload::Unsubscribed),

            Command::CheckPermissions => {
                Response::success(request_id, ResponsePayload::Permissions(monitor.check_permissions()))
            }

            Command::ListInstalledApps => match monitor.get_installed_apps().await {
                Ok(apps) => Response::success(
                    request_id,
                    ResponsePayload::InstalledApps {
                        apps: filter_user_apps(apps),
                    },
                ),
                Err(e) => Response::error(request_id, ErrorInfo::new(ErrorCode::MonitorError, e.to_string())),
            },

            Command::OpenAccessibilitySettings => {
                settings_response(request_id, monitor.open_accessibility_settings().await)
            }

            Command::OpenOverlaySettings => {
                settings_response(request_id, monitor.open_overlay_settings().await)
            }

            Command::ReportAppLaunch { package_id } => {
                monitor.record_foreground(package_id.clone());
                let launched = package_id.clone();
                let verdict =
                    match with_engine(engine, move |eng| eng.evaluate_launch(&launched, now)).await {
                        Ok(verdict) => verdict,
                        Err(e) => return engine_failure(request_id, e),
                    };
                if let LaunchVerdict::Block {
                    package_id,
                    display_name,
                    ..
                } = &verdict
                {
                    monitor.record_blocked(package_id.clone(), display_name.clone());
                }
                Response::success(request_id, ResponsePayload::LaunchVerdict { verdict })
            }

            Command::ReportPermissions { status } => {
                monitor.record_permissions(status);

                let required = engine.lock().await.monitoring_required();
                if required && status.is_enforceable() && !monitor.is_monitoring() {
                    if let Err(e) = monitor.start_monitoring().await {
                        warn!(error = %e, "Monitoring not started after permission report");
                    }
                } else if required && !status.is_enforceable() {
                    warn!(missing = ?status.missing(), "Permissions revoked while apps are controlled");
                }
                Response::success(request_id, ResponsePayload::Reported)
            }

            Command::ReportInstalledApps { apps } => {
                monitor.record_installed_apps(apps);
                Response::success(request_id, ResponsePayload::Reported)
            }

            Command::GetHealth => {
                let eng = engine.lock().await;
                let health = HealthStatus {
                    live: true,
                    store_ok: eng.store_healthy(),
                    monitoring_active: monitor.is_monitoring(),
                    revision: eng.revision(),
                    degraded: eng.degraded_reasons(),
                };
                Response::success(request_id, ResponsePayload::Health(health))
            }

            Command::Ping => Response::success(request_id, ResponsePayload::Pong),
        }
    }
}

/// Role check for commands that change state or reach the device
fn authorize(role: ClientRole, command: &Command) -> Result<(), ErrorInfo> {
    let allowed = match command {
        Command::PublishDocument { .. } => role.can_publish(),
        Command::OpenAccessibilitySettings | Command::OpenOverlaySettings => {
            role.can_request_settings()
        }
        c if c.requires_observation_rights() => role.can_report_observations(),
        _ => true,
    };

    if allowed {
        Ok(())
    } else {
        Err(ErrorInfo::new(
            ErrorCode::PermissionDenied,
            format!("{:?} clients may not send this command", role),
        ))
    }
}

fn engine_failure(request_id: u64, e: anyhow::Error) -> Response {
    error!(error = %e, "Engine call failed");
    Response::error(request_id, ErrorInfo::new(ErrorCode::InternalError, e.to_string()))
}

fn settings_response(request_id: u64, result: timelock_monitor_api::MonitorResult<()>) -> Response {
    match result {
        Ok(()) => Response::success(request_id, ResponsePayload::SettingsRequested),
        Err(e) => Response::error(request_id, ErrorInfo::new(ErrorCode::MonitorError, e.to_string())),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    match args.log_format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init(),
    }

    info!(version = env!("CARGO_PKG_VERSION"), "timelockd starting");

    let service = Service::new(&args).await?;
    service.run().await
}
