use actix_web::{web, App, HttpServer};
use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;

mod api;
mod cli;
mod error;
mod models;
mod registry;
mod services;
mod state;

use cli::CommandArgs;
use registry::InstanceRegistry;
use services::{LogDirectory, StateStore};
use state::new_state;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = CommandArgs::parse();
    let bind_address = format!("{}:{}", args.address, args.port);

    let registry = InstanceRegistry::load(&args.config_dir)
        .with_context(|| format!("loading configuration from {}", args.config_dir.display()))?;
    let registry = Arc::new(registry);

    let store = StateStore::open(&args.data_dir)
        .with_context(|| format!("preparing data directory {}", args.data_dir.display()))?;
    log::info!("State markers kept in {}", store.dir().display());
    let logs = LogDirectory::open(&args.logs_dir)
        .with_context(|| format!("preparing logs directory {}", args.logs_dir.display()))?;

    let state = new_state(
        registry.clone(),
        Arc::new(store),
        logs,
        Duration::from_secs(args.adopt_poll_secs.max(1)),
        Duration::from_secs(args.rcon_timeout_secs.max(1)),
    );

    log::info!("Resuming processes left running by a previous run...");
    let resumed = state
        .supervisor
        .resume()
        .context("resuming process monitors")?;
    let scheduled = state
        .backups
        .start_or_resume_backups()
        .context("resuming backup schedules")?;
    log::info!(
        "{} process monitors and {} backup schedules resumed",
        resumed.len(),
        scheduled.len()
    );

    print_banner(&args, &registry);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .configure(api::configure)
    })
    .bind(&bind_address)
    .with_context(|| format!("binding {}", bind_address))?
    .run()
    .await?;

    Ok(())
}

fn print_banner(args: &CommandArgs, registry: &InstanceRegistry) {
    println!("╔═══════════════════════════════════════════════════════════╗");
    println!("║      Server Manager v{:<37}║", env!("CARGO_PKG_VERSION"));
    println!("╚═══════════════════════════════════════════════════════════╝");
    println!();
    println!("🚀 Server starting on http://{}:{}", args.address, args.port);
    println!(
        "📁 config: {}  data: {}  logs: {}",
        args.config_dir.display(),
        args.data_dir.display(),
        args.logs_dir.display()
    );
    println!(
        "🗺  {} process instances, {} backup instances",
        registry.process_names().len(),
        registry.backup_names().len()
    );
    println!();
    println!("📋 Available endpoints:");
    println!("  GET    /api/maps                        - List instances");
    println!("  POST   /api/maps/{{name}}/start           - Enable and start an instance");
    println!("  POST   /api/maps/{{name}}/stop            - Disable and shut down an instance");
    println!("  GET    /api/maps/{{name}}/logs            - Latest launch log");
    println!("  POST   /api/maps/{{name}}/backup/schedule - Start periodic backups");
    println!("  DELETE /api/maps/{{name}}/backup/schedule - Stop periodic backups");
    println!("  POST   /api/maps/{{name}}/backup          - Back up now");
    println!("  GET    /api/maps/{{name}}/backups         - List archives");
    println!("  POST   /api/maps/{{name}}/restore         - Restore a file from an archive");
    println!("  POST   /api/maps/{{name}}/rcon            - Send a console command");
    println!("  GET    /health                          - Health check");
    println!("═══════════════════════════════════════════════════════════");
}
