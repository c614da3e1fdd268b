#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]

mod cli;
mod scenario;

use clap::Parser;
use cli::{Cli, Commands, FILE_GUARD, JSON_MODE};
use eyre::{Result, WrapErr};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

fn init_logging(console_level: &str, json: bool, logging: &ams_config::Logging) -> Result<()> {
    let level = logging.level.as_deref().unwrap_or(console_level);
    let filter = EnvFilter::try_new(level).wrap_err_with(|| format!("bad log level {level:?}"))?;

    let file_layer = match logging.file.as_deref() {
        Some(path) => {
            let p = Path::new(path);
            let dir = p.parent().filter(|d| !d.as_os_str().is_empty());
            let name = p
                .file_name()
                .ok_or_else(|| eyre::eyre!("logging.file has no file name: {path:?}"))?;
            let dir = dir.unwrap_or_else(|| Path::new("."));
            let appender = match logging.rotation.as_deref() {
                Some("daily") => tracing_appender::rolling::daily(dir, name),
                Some("hourly") => tracing_appender::rolling::hourly(dir, name),
                _ => tracing_appender::rolling::never(dir, name),
            };
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = FILE_GUARD.set(guard);
            Some(fmt::layer().json().with_writer(writer).with_ansi(false))
        }
        None => None,
    };

    let pretty = (!json).then(|| fmt::layer().with_writer(std::io::stderr));
    let jsonl = json.then(|| fmt::layer().json().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(pretty)
        .with(jsonl)
        .init();
    Ok(())
}

fn load_config(path: &Path) -> Result<ams_config::Config> {
    let text = fs::read_to_string(path)
        .wrap_err_with(|| format!("failed to read config {}", path.display()))?;
    let cfg = ams_config::load_toml(&text)
        .wrap_err_with(|| format!("failed to parse config {}", path.display()))?;
    cfg.validate()
        .wrap_err_with(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

fn print_check(cfg: &ams_config::Config, json: bool) {
    if json {
        let hubs: Vec<_> = cfg
            .hubs
            .iter()
            .map(|h| {
                serde_json::json!({
                    "name": h.name,
                    "fps": h.fps,
                    "band": [h.lower_threshold, h.upper_threshold],
                    "path_length_mm": h.path_length_mm,
                })
            })
            .collect();
        let groups: Vec<_> = cfg
            .groups
            .iter()
            .map(|g| serde_json::json!({ "name": g.name, "lanes": g.lanes.len() }))
            .collect();
        let out = serde_json::json!({
            "ok": true,
            "hubs": hubs,
            "fps": cfg.fps.iter().map(|f| f.name.clone()).collect::<Vec<_>>(),
            "groups": groups,
            "tick_ms": cfg.engine.tick_ms,
        });
        println!("{out}");
    } else {
        println!(
            "config OK: {} hub(s), {} fps, {} group(s), tick {}ms",
            cfg.hubs.len(),
            cfg.fps.len(),
            cfg.groups.len(),
            cfg.engine.tick_ms
        );
        for h in &cfg.hubs {
            println!(
                "  hub {:<12} fps={} band=[{:.2}, {:.2}] path={:.0}mm",
                h.name, h.fps, h.lower_threshold, h.upper_threshold, h.path_length_mm
            );
        }
        for g in &cfg.groups {
            println!("  group {:<10} {} lane(s)", g.name, g.lanes.len());
        }
    }
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);

    let cfg = load_config(&cli.config);

    // logging config comes from the file when it parsed; flags still work
    // when it did not, so the failure itself gets reported properly
    let logging = cfg
        .as_ref()
        .map(|c| c.logging.clone())
        .unwrap_or_default();
    init_logging(&cli.log_level, cli.json, &logging)?;

    match cli.cmd {
        Commands::Check => {
            match cfg {
                Ok(cfg) => {
                    print_check(&cfg, cli.json);
                    Ok(())
                }
                Err(e) => {
                    if cli.json {
                        let out = serde_json::json!({ "ok": false, "error": format!("{e:#}") });
                        println!("{out}");
                    }
                    Err(e)
                }
            }
        }
        Commands::Run { scenario, ticks } => {
            let cfg = cfg?;
            let shutdown = Arc::new(AtomicBool::new(false));
            {
                let shutdown = shutdown.clone();
                ctrlc::set_handler(move || shutdown.store(true, Ordering::SeqCst))
                    .wrap_err("failed to install signal handler")?;
            }
            let report = scenario::run_scenario(&cfg, scenario, ticks, &shutdown)?;
            if cli.json {
                println!("{report}");
            } else {
                print_run(&report);
            }
            Ok(())
        }
    }
}

fn print_run(report: &serde_json::Value) {
    println!(
        "scenario {} finished after {} tick(s)",
        report["scenario"].as_str().unwrap_or("?"),
        report["ticks"]
    );
    if let Some(hubs) = report["hubs"].as_array() {
        for h in hubs {
            let fault = h["fault"]
                .as_object()
                .and_then(|f| f["kind"].as_str())
                .unwrap_or("none");
            println!(
                "  hub {} fps={} follower={} fault={}",
                h["name"].as_str().unwrap_or("?"),
                h["fps"].as_str().unwrap_or("?"),
                h["follower_engaged"],
                fault
            );
            if let Some(lanes) = h["lanes"].as_array() {
                for l in lanes {
                    println!(
                        "    lane {:<10} {}",
                        l["name"].as_str().unwrap_or("?"),
                        l["status"].as_str().unwrap_or("?")
                    );
                }
            }
        }
    }
    match report["events"].as_array() {
        Some(events) if !events.is_empty() => {
            println!("  {} active pause event(s):", events.len());
            for e in events {
                println!(
                    "    #{} [{}] {}",
                    e["event_id"],
                    e["reason"].as_str().unwrap_or("?"),
                    e["message"].as_str().unwrap_or("")
                );
            }
        }
        _ => println!("  no pause events"),
    }
}
