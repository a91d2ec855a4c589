use anyhow::{Result, bail};
use clap::Parser;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use audio_priority_sync::audio::DeviceType;
use audio_priority_sync::cli::{
    self, ClassArg, ClassStatus, Cli, Commands, ListedDevice, StatusView,
};
use audio_priority_sync::config::{Config, ConfigLoader, default_config_path};
use audio_priority_sync::engine::{EngineSettings, SyncEngine};
use audio_priority_sync::logging::{LoggingConfig, cleanup_old_logs, initialize_logging};
use audio_priority_sync::priority::PriorityStore;
use audio_priority_sync::service::PriorityService;
use audio_priority_sync::system::StandardFileSystem;

#[cfg(target_os = "macos")]
type PlatformAudioSystem = audio_priority_sync::system::CoreAudioSystem;
#[cfg(not(target_os = "macos"))]
type PlatformAudioSystem = audio_priority_sync::system::UnsupportedAudioSystem;

type Engine = SyncEngine<PlatformAudioSystem, StandardFileSystem>;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let command = args.command.unwrap_or(Commands::Daemon);
    let is_daemon = command == Commands::Daemon;

    let config_path = match args.config {
        Some(path) => path,
        None => default_config_path()?,
    };
    let config_loader = ConfigLoader::new(StandardFileSystem, config_path);
    let config = config_loader.load_config()?;

    let logging = if is_daemon {
        LoggingConfig::for_daemon(&config, args.verbose)?
    } else {
        LoggingConfig::for_command(args.verbose)
    };
    let (_guard, log_dir) = initialize_logging(logging)?;
    if let Some(log_dir) = log_dir {
        info!("Logging to {}", log_dir.display());
        if let Err(e) = cleanup_old_logs(&log_dir, config.logging.keep_days) {
            warn!("Failed to clean up old logs: {:#}", e);
        }
    }

    let engine = build_engine(&config)?;

    match command {
        Commands::Daemon => {
            let mut service = PriorityService::new(engine, config_loader, config);
            service.run().await?;
        }
        Commands::Status => show_status(&engine, args.json)?,
        Commands::List => list_devices(&engine, args.json)?,
        Commands::SetPriority { class, ids } => set_priority(&engine, class, &ids, args.json)?,
        Commands::Apply { class } => {
            let report = engine.apply_highest_priority(class.map(DeviceType::from), true);
            if args.json {
                print_json(&report)?;
            } else {
                print!("{}", cli::render_report(&report));
            }
        }
        Commands::Mode { mode } => {
            let report = engine.set_mode(mode.is_auto())?;
            if args.json {
                print_json(&json!({ "auto_mode": mode.is_auto(), "report": report }))?;
            } else {
                println!("Mode: {}", if mode.is_auto() { "auto" } else { "manual" });
                if !report.switches.is_empty() || report.has_warnings() {
                    print!("{}", cli::render_report(&report));
                }
            }
        }
        Commands::Forget { id, class } => forget_device(&engine, &id, class, args.json)?,
    }

    Ok(())
}

fn build_engine(config: &Config) -> Result<Engine> {
    let state_dir = match config.general.state_dir.clone() {
        Some(dir) => dir,
        None => PriorityStore::<StandardFileSystem>::default_state_dir()?,
    };
    let store = PriorityStore::open(StandardFileSystem, state_dir)?;
    let audio = PlatformAudioSystem::new()?;
    SyncEngine::new(audio, store, EngineSettings::from(&config.engine))
}

fn show_status(engine: &Engine, as_json: bool) -> Result<()> {
    let mut report = engine.refresh(false);
    report.warnings.extend(engine.take_warnings());

    let status = StatusView {
        auto_mode: engine.is_auto_mode(),
        classes: [DeviceType::Output, DeviceType::Input]
            .into_iter()
            .map(|device_type| ClassStatus {
                device_type,
                default_device: engine.default_device(device_type),
                priority_order: engine.priority_order(device_type),
                connected: engine.connected_devices(device_type),
            })
            .collect(),
        warnings: report.warnings.iter().map(ToString::to_string).collect(),
    };

    if as_json {
        print_json(&status)
    } else {
        print!("{}", cli::render_status(&status));
        Ok(())
    }
}

fn listing(engine: &Engine, device_type: DeviceType) -> Vec<ListedDevice> {
    cli::device_listing(
        device_type,
        &engine.known_devices(),
        &engine.connected_devices(device_type),
    )
}

fn list_devices(engine: &Engine, as_json: bool) -> Result<()> {
    let report = engine.refresh(false);
    let rows: Vec<ListedDevice> = [DeviceType::Output, DeviceType::Input]
        .into_iter()
        .flat_map(|device_type| listing(engine, device_type))
        .collect();

    let mut warnings: Vec<String> = report.warnings.iter().map(ToString::to_string).collect();
    warnings.extend(engine.take_warnings().iter().map(ToString::to_string));

    if as_json {
        return print_json(&json!({ "devices": rows, "warnings": warnings }));
    }
    print!("{}", cli::render_listing(&rows));
    for warning in warnings {
        eprintln!("warning: {}", warning);
    }
    Ok(())
}

fn set_priority(engine: &Engine, class: ClassArg, ids: &[String], as_json: bool) -> Result<()> {
    let device_type = DeviceType::from(class);
    engine.refresh(false);
    let uids = cli::resolve_device_ids(ids, &listing(engine, device_type))?;

    let update = engine.set_priorities(device_type, &uids)?;
    if as_json {
        print_json(&update)
    } else {
        print!("{}", cli::render_priority_update(&update));
        Ok(())
    }
}

fn forget_device(engine: &Engine, id: &str, class: Option<ClassArg>, as_json: bool) -> Result<()> {
    let device_type = class.map(DeviceType::from);
    engine.refresh(false);
    let candidates: Vec<ListedDevice> = DeviceType::selected(device_type)
        .into_iter()
        .flat_map(|device_type| listing(engine, device_type))
        .collect();

    let is_index = id.trim().parse::<usize>().is_ok();
    if device_type.is_none() && is_index && !candidates.iter().any(|row| row.uid == id) {
        bail!("Pass --class when forgetting a device by index");
    }
    let uid = cli::resolve_device_ids(&[id.to_string()], &candidates)?.remove(0);

    let removed = engine.forget(&uid, device_type)?;
    if as_json {
        print_json(&json!({ "uid": uid, "removed": removed }))
    } else {
        if removed == 0 {
            println!("{} was not remembered", uid);
        } else {
            println!("Forgot {} ({} record(s))", uid, removed);
        }
        Ok(())
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
