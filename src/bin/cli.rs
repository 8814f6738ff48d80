use picamstream::backend::backends_from_ids;
use picamstream::{init_logging, CameraSession, StreamConfig};
use serde::Serialize;
use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: picamstream-cli <probe|stream|snapshot> [args]");
        std::process::exit(1);
    }

    let command = &args[1];
    match command.as_str() {
        "probe" => cmd_probe(&args),
        "stream" => cmd_stream(&args),
        "snapshot" => cmd_snapshot(&args),
        _ => {
            eprintln!("Unknown command: {}", command);
            std::process::exit(1);
        }
    }
}

fn flag_value<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a str, String> {
    args.get(i + 1)
        .map(String::as_str)
        .ok_or_else(|| format!("{} needs a value", flag))
}

fn load_config(path: Option<PathBuf>) -> Result<StreamConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => Ok(StreamConfig::load_from_file(path)?),
        None => Ok(StreamConfig::load_or_default()),
    }
}

#[derive(Serialize)]
struct ProbeReport {
    id: &'static str,
    priority: u8,
    supports_still_mode: bool,
    supports_transform: bool,
    available: bool,
}

fn cmd_probe(args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    // Parse args: probe [--json] [--config <path>]
    let mut json = false;
    let mut config_path = None;

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--json" => json = true,
            "--config" => {
                config_path = Some(PathBuf::from(flag_value(args, i, "--config")?));
                i += 1;
            }
            other => return Err(format!("Unexpected argument: {}", other).into()),
        }
        i += 1;
    }

    let config = load_config(config_path)?;
    let reports: Vec<ProbeReport> =
        backends_from_ids(&config.backends.enabled, config.camera.device_index)
            .iter()
            .map(|backend| {
                let descriptor = backend.descriptor();
                ProbeReport {
                    id: descriptor.id,
                    priority: descriptor.priority,
                    supports_still_mode: descriptor.supports_still_mode,
                    supports_transform: descriptor.supports_transform,
                    available: backend.probe_available(),
                }
            })
            .collect();

    if json {
        println!("{}", serde_json::to_string(&reports)?);
    } else {
        for r in reports {
            println!(
                "{} (priority {}): {}",
                r.id,
                r.priority,
                if r.available { "available" } else { "not available" }
            );
        }
    }
    Ok(())
}

fn cmd_stream(args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    // Parse args: stream [--seconds <n>] [--config <path>]
    let mut seconds: Option<u64> = None;
    let mut config_path = None;

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--seconds" => {
                seconds = Some(flag_value(args, i, "--seconds")?.parse()?);
                i += 1;
            }
            "--config" => {
                config_path = Some(PathBuf::from(flag_value(args, i, "--config")?));
                i += 1;
            }
            other => return Err(format!("Unexpected argument: {}", other).into()),
        }
        i += 1;
    }

    let config = load_config(config_path)?;
    let session = CameraSession::from_config(&config);
    session.open(config.capture_config())?;

    if let (Some(backend), Some(mode)) = (session.active_backend(), session.negotiated_mode()) {
        println!(
            "Streaming via {} at {} ({}) @ {} fps",
            backend.id, mode.resolution, mode.label, mode.framerate
        );
    }

    let running = Arc::new(AtomicBool::new(true));
    let flag = running.clone();
    ctrlc::set_handler(move || flag.store(false, Ordering::SeqCst))?;

    let started = Instant::now();
    let deadline = seconds.map(|s| started + Duration::from_secs(s));
    let mut last_report = Instant::now();

    while running.load(Ordering::SeqCst) {
        if deadline.map(|d| Instant::now() >= d).unwrap_or(false) {
            break;
        }
        std::thread::sleep(Duration::from_millis(100));

        if last_report.elapsed() >= Duration::from_secs(1) {
            last_report = Instant::now();
            let stats = session.stats();
            log::info!(
                "{:?}: {} frames, {} read errors, {} reconnects, latest frame {} bytes",
                session.state(),
                stats.frames_produced,
                stats.read_errors,
                stats.reconnects,
                session.get_frame().map(|f| f.len()).unwrap_or(0)
            );
        }
    }

    let outcome = session.stop();
    let stats = session.stats();
    println!(
        "Stopped ({:?}) after {:.1}s: {} frames, {} reconnects",
        outcome,
        started.elapsed().as_secs_f64(),
        stats.frames_produced,
        stats.reconnects
    );
    Ok(())
}

fn cmd_snapshot(args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    // Parse args: snapshot <path> [--config <path>]
    let mut output = None;
    let mut config_path = None;

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                config_path = Some(PathBuf::from(flag_value(args, i, "--config")?));
                i += 1;
            }
            _ => {
                if output.is_none() {
                    output = Some(PathBuf::from(&args[i]));
                }
            }
        }
        i += 1;
    }

    let output = output.ok_or("output path required")?;
    let config = load_config(config_path)?;
    let session = CameraSession::from_config(&config);
    session.open(config.capture_config())?;
    if session.wait_for_frame(0, session.timing().capture_timeout).is_none() {
        log::warn!("No frame within {:?}", session.timing().capture_timeout);
    }

    let source = session.capture_photo(&output);
    session.stop();
    println!("Saved {} ({:?})", output.display(), source?);
    Ok(())
}
