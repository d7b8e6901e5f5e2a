use std::{
    env,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::Path,
    str::FromStr,
    sync::Arc,
    thread,
    time::Duration,
};

use axum::{body::Body, http::Request, ServiceExt};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use color_eyre::{
    eyre::{eyre, Context},
    Result,
};
use config::Config;
use rand::{thread_rng, RngCore};
use tokio::{select, sync::broadcast, time::sleep};
use tower_http::normalize_path::NormalizePathLayer;
use tower_layer::Layer;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;

use crate::{
    board::Site,
    context::{now, RequestContext},
    database::{DbExecutor, Engine, ExecutorConnection},
    moderation::StaffAction,
};

mod abbrev;
mod archive;
mod board;
mod cache;
mod config;
mod context;
mod database;
mod error;
mod format;
mod imghdr;
mod moderation;
mod pipeline;
mod router;
mod templates;
mod thumbnail;
mod tripcode;

#[cfg(unix)]
async fn terminate_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let (Ok(mut sigterm), Ok(mut sigint)) = (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) else {
        tracing::error!("Failed to install the signal handlers");
        return std::future::pending().await;
    };
    tracing::debug!("Installed ctrl+c handler");
    select! {
        _ = sigterm.recv() => (),
        _ = sigint.recv() => ()
    }
}

#[cfg(windows)]
async fn terminate_signal() {
    use tokio::signal::windows::ctrl_c;
    let Ok(mut ctrlc) = ctrl_c() else {
        tracing::error!("Failed to install the ctrl+c handler");
        return std::future::pending().await;
    };
    tracing::debug!("Installed ctrl+c handler");
    let _ = ctrlc.recv().await;
}

fn init_tracing(cfg: &Config) -> Result<Option<WorkerGuard>> {
    let level = Level::from_str(&cfg.log_level)?;
    let Some(log_file) = &cfg.log_file else {
        tracing_subscriber::fmt::fmt().with_max_level(level).init();
        return Ok(None);
    };
    let dir = log_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let name = log_file
        .file_name()
        .ok_or_else(|| eyre!("log_file {} has no file name", log_file.display()))?;
    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, name));
    tracing_subscriber::fmt::fmt()
        .with_max_level(level)
        .with_ansi(false)
        .with_writer(writer)
        .init();
    Ok(Some(guard))
}

fn arg<T: FromStr>(args: &[String], index: usize, what: &str) -> Result<T> {
    args.get(index)
        .ok_or_else(|| eyre!("missing {what}"))?
        .parse()
        .map_err(|_| eyre!("invalid {what}"))
}

/// Runs a staff action against the configured database without the server.
fn run_offline(subcommand: &str, args: &[String]) -> Result<()> {
    let action = match subcommand {
        "purge" => None,
        "rebuild" => Some(StaffAction::Rebuild),
        "lock" => Some(StaffAction::Lock { thread: arg(args, 1, "thread number")? }),
        "unlock" => Some(StaffAction::Unlock { thread: arg(args, 1, "thread number")? }),
        "sticky" => Some(StaffAction::Sticky { thread: arg(args, 1, "thread number")? }),
        "unsticky" => Some(StaffAction::Unsticky { thread: arg(args, 1, "thread number")? }),
        "restore" => Some(StaffAction::RestoreBackup { id: arg(args, 1, "backup id")? }),
        _ => return Err(eyre!("Invalid subcommand '{subcommand}'")),
    };

    let cfg = Config::load().wrap_err("Failed to load the configuration file")?;
    let _guard = init_tracing(&cfg)?;
    let site = Arc::new(Site::new(cfg)?);
    let mut engine = Engine::open(site).wrap_err("Failed to open the database")?;

    let Some(action) = action else {
        let purged = engine.purge_backups(now())?;
        eprintln!("Purged {purged} backup(s)");
        return Ok(());
    };
    let board: String = arg(args, 0, "board name")?;
    let ctx = RequestContext::new(IpAddr::V4(Ipv4Addr::LOCALHOST), now()).staff("cli");
    engine.with_board(&board, |bc| bc.moderate(&ctx, action))?;
    eprintln!("Done");
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    color_eyre::config::HookBuilder::default()
        .display_env_section(false)
        .install()?;
    let args: Vec<String> = env::args().skip(1).collect();
    if let Some((subcommand, rest)) = args.split_first() {
        if subcommand == "gensecret" {
            let mut bytes = [0u8; 48];
            thread_rng().fill_bytes(&mut bytes);
            println!("{}", STANDARD.encode(bytes));
            return Ok(());
        }
        return run_offline(subcommand, rest);
    }

    let cfg = Config::load().wrap_err("Failed to load the configuration file")?;
    let _guard = init_tracing(&cfg)?;

    tracing::info!(concat!("Initializing - wakaboard v", env!("CARGO_PKG_VERSION")));

    let site = Arc::new(Site::new(cfg)?);
    let (db_exec, db_conn) = DbExecutor::create(site.clone()).wrap_err("Failed to open the database")?;
    let exec_thread = thread::spawn(move || db_exec.run());

    let (ctx, _) = broadcast::channel(1);
    let maintenance_task = tokio::spawn(maintenance(
        ctx.subscribe(),
        db_conn.clone(),
        site.cfg.maintenance_interval,
    ));

    let app = NormalizePathLayer::trim_trailing_slash().layer(router::build(db_conn, site.clone()));

    tracing::info!("Listening on {}", site.cfg.listen);
    if let Err(e) = axum::Server::bind(&site.cfg.listen)
        .serve(ServiceExt::<Request<Body>>::into_make_service_with_connect_info::<SocketAddr>(app))
        .with_graceful_shutdown(terminate_signal())
        .await
    {
        tracing::error!("An error has occurred: {e}, shutting down");
    }

    tracing::info!("Waiting for the maintenance task to shut down");
    let _ = ctx.send(());
    if let Err(e) = maintenance_task.await {
        tracing::error!("Maintenance task failed: {e}");
    }
    tracing::info!("Waiting for the database to shut down");
    if exec_thread.join().is_err() {
        tracing::error!("The database executor panicked");
    }
    tracing::info!("Shutdown complete!");
    Ok(())
}

async fn maintenance(mut shutdown: broadcast::Receiver<()>, db: ExecutorConnection, interval_secs: u64) {
    let interval = Duration::from_secs(interval_secs.max(1));
    loop {
        match db.purge_backups(now()).await {
            Ok(0) => tracing::debug!("No backups to purge"),
            Ok(n) => tracing::info!("Purged {n} expired backup(s)"),
            Err(e) => tracing::error!("Failed to purge backups: {e}"),
        }
        select! {
            _ = sleep(interval) => {}
            _ = shutdown.recv() => return,
        }
    }
}
