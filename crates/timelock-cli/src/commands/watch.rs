//! Live countdowns.
//!
//! The engine recomputes every entry from the wall clock once per UI tick
//! and adopts documents timelockd broadcasts. Expiries observed both here and
//! in timelockd are printed once.

use anyhow::Result;
use timelock_api::{EventPayload, SessionDocument};
use timelock_config::EngineConfig;
use timelock_core::{Countdown, CoreEvent, EventDeduplicator};
use timelock_ipc::{EventStream, IpcClient, IpcResult};
use tracing::{info, warn};

use super::describe;
use crate::context::ForegroundContext;

const DEDUP_CAPACITY: usize = 256;

pub async fn run(config: EngineConfig) -> Result<()> {
    let ui_tick = config.countdown.ui_tick;
    let mut ctx = ForegroundContext::open(config).await?;

    let mut events = match subscribe(ctx.socket_path()).await {
        Ok(stream) => Some(stream),
        Err(e) => {
            warn!(error = %e, "Not subscribed to timelockd, showing local countdowns only");
            None
        }
    };

    let mut dedup = EventDeduplicator::new(DEDUP_CAPACITY);
    let mut countdown = Countdown::new(ui_tick);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            now = countdown.tick() => {
                for event in ctx.engine().tick_all(now) {
                    print_core_event(&event, &mut dedup);
                }
                render(ctx.engine().document());
            }
            event = next_event(&mut events) => {
                match event {
                    Ok(EventPayload::Shutdown) => {
                        warn!("timelockd is shutting down");
                        events = None;
                    }
                    Ok(payload) => handle_remote(&mut ctx, payload, &mut dedup),
                    Err(e) => {
                        warn!(error = %e, "Lost connection to timelockd");
                        events = None;
                    }
                }
            }
        }
    }

    ctx.finish().await
}

async fn subscribe(socket_path: &std::path::Path) -> IpcResult<EventStream> {
    IpcClient::connect(socket_path).await?.subscribe().await
}

/// Next event, or never when not subscribed
async fn next_event(events: &mut Option<EventStream>) -> IpcResult<EventPayload> {
    match events {
        Some(stream) => stream.next().await.map(|event| event.payload),
        None => std::future::pending().await,
    }
}

fn handle_remote(ctx: &mut ForegroundContext, payload: EventPayload, dedup: &mut EventDeduplicator) {
    match payload {
        EventPayload::DocumentPublished(sync) => {
            if ctx.engine().apply_remote(sync) {
                render(ctx.engine().document());
            }
        }
        EventPayload::TimeExpired {
            package_id,
            from_state,
            to_state,
            at,
        } => print_core_event(
            &CoreEvent::TimeExpired {
                package_id,
                from_state,
                to_state,
                at,
            },
            dedup,
        ),
        EventPayload::AppLaunchBlocked {
            display_name,
            remaining_seconds,
            ..
        } => println!(
            "Blocked {}: locked for {}",
            display_name,
            timelock_util::format_countdown(remaining_seconds)
        ),
        EventPayload::Degraded { reason } => println!("timelockd degraded: {:?}", reason),
        EventPayload::Recovered => println!("timelockd recovered"),
        _ => {}
    }
}

fn print_core_event(event: &CoreEvent, dedup: &mut EventDeduplicator) {
    if let CoreEvent::TimeExpired {
        package_id,
        from_state,
        to_state,
        ..
    } = event
        && dedup.first_delivery(event)
    {
        println!("{}: {} -> {}", package_id, from_state, to_state);
    }
}

fn render(document: &SessionDocument) {
    println!("-- revision {}", document.revision);
    for entry in document.iter() {
        println!("{}", describe(entry));
    }
}
