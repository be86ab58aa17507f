use anyhow::Result;
use clap::Parser;
use offline_pupil::timeline::cache_timeline_data;
use offline_pupil::{
    published_slot, DataChangedAnnouncer, EventBus, EyeId, FileSystemResolver,
    OfflinePupilDetection, PupilConfig, PupilFromRecording, PupilPublisher,
    FORCED_DETECTION_METHOD,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Parser, Debug)]
#[command(name = "offline-pupil")]
#[command(about = "Offline pupil detection over a recording's eye videos")]
#[command(version)]
#[command(long_about = "Requests one eye process per eye video of a recording, collects the \
detected pupil positions from the message bus into a timestamp-sorted store, and caches the \
merged result next to the recording so later runs can resume instead of detecting again.\n\n\
Eye processes are not part of this binary. They have to be attached to the bus and act on \
eye_process.should_start; without them a detection run only ends on Ctrl-C, and the partial \
result is saved on the way out. Recordings whose eyes are all complete, or that have no eye \
videos, finish immediately.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "offline-pupil.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Recording directory, overrides `recording.path`
    #[arg(short, long, value_name = "DIR", help = "Recording directory holding the eye videos")]
    rec_dir: Option<PathBuf>,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit without starting detection")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Throw away cached results and detect again
    #[arg(long, help = "Discard cached results and run detection from the first frame")]
    redetect: bool,

    /// Use the pupil data captured during the recording
    #[arg(long, help = "Load pupil data recorded live instead of detecting it offline")]
    from_recording: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Also write JSON logs to this file
    #[arg(long, value_name = "FILE", help = "Additionally write JSON logs to a file")]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    let _log_guard = init_logging(&args)?;

    info!("Starting offline pupil detection v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let mut config = match PupilConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };
    if let Some(rec_dir) = &args.rec_dir {
        config.recording.path = rec_dir.clone();
    }

    if args.validate_config {
        match config.validate() {
            Ok(()) => {
                info!("Configuration validation successful");
                println!("✓ Configuration is valid");
                return Ok(());
            }
            Err(e) => {
                error!("Configuration validation failed: {}", e);
                eprintln!("✗ Configuration validation failed: {}", e);
                std::process::exit(1);
            }
        }
    }
    config.validate()?;

    let event_bus = Arc::new(if config.bus.debug_logging {
        EventBus::with_debug_logging(config.bus.capacity)
    } else {
        EventBus::new(config.bus.capacity)
    });

    let (writer, _reader) = published_slot();
    let announcer = Arc::new(DataChangedAnnouncer::new(&config.recording.path));
    announcer.add_listener(|change| {
        debug!(
            "{} changed ({:?}, {} records, token {})",
            change.topic,
            change.kind,
            change.snapshot.len(),
            change.token
        );
    });
    let publisher = PupilPublisher::new(writer, announcer);

    if args.from_recording {
        return summarize_recorded(&config, publisher);
    }

    let resolver = Arc::new(FileSystemResolver::new(config.video.extensions.clone()));
    let mut detection =
        OfflinePupilDetection::new(&config, Arc::clone(&event_bus), resolver, publisher).map_err(
            |e| {
                error!("Failed to start offline pupil detection: {}", e);
                e
            },
        )?;

    let prepared = if args.redetect {
        detection.redetect()
    } else {
        Ok(())
    };

    // with no eye running the result has already been published
    let outcome = match prepared {
        Err(e) => Err(e),
        Ok(()) if detection.all_eyes_idle() => {
            log_idle_start(&detection);
            Ok(())
        }
        Ok(()) => run(&mut detection, config.runtime.tick_hz).await,
    };

    // the detection has to let go of the bus before the bus goes away
    let cleanup = detection.cleanup();
    drop(detection);
    drop(event_bus);

    outcome?;
    cleanup?;
    info!("Offline pupil detection finished");
    Ok(())
}

fn log_idle_start(detection: &OfflinePupilDetection) {
    for eye_id in EyeId::ALL {
        info!("Eye {}: {}", eye_id, detection.detection_status(eye_id));
    }
    if EyeId::ALL
        .iter()
        .any(|eye_id| detection.detection_status(*eye_id).is_complete())
    {
        info!("Cached pupil data is complete, nothing to detect");
    } else {
        warn!("No eye videos found, published an empty result");
    }
}

/// Tick until the results are published or the user interrupts
async fn run(detection: &mut OfflinePupilDetection, tick_hz: u32) -> offline_pupil::Result<()> {
    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received interrupt, stopping");
                shutdown.cancel();
            }
        });
    }

    let mut ticker = tokio::time::interval(Duration::from_secs_f64(1.0 / f64::from(tick_hz)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_percent = None;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            _ = ticker.tick() => {
                let report = detection.recent_events()?;
                if report.data_received > 0 {
                    debug!("Received {} pupil positions", report.data_received);
                }
                for eye_id in &report.completed {
                    info!("Eye {}: {}", eye_id, detection.detection_status(*eye_id));
                }

                let percent = (report.progress * 100.0).floor() as u32;
                if last_percent != Some(percent) {
                    info!("Detection progress: {}%", percent);
                    last_percent = Some(percent);
                }

                if report.published {
                    info!("Pupil positions published");
                    return Ok(());
                }
            }
        }
    }
}

fn summarize_recorded(config: &PupilConfig, publisher: PupilPublisher) -> Result<()> {
    let producer = PupilFromRecording::new(&config.recording.path, publisher)?;
    let snapshot = producer.current();
    if snapshot.is_empty() {
        warn!("No recorded pupil data in {}", producer.source().display());
        return Ok(());
    }

    for (eye_id, tag) in snapshot.keys() {
        println!(
            "eye {} {}: {} positions",
            eye_id,
            tag,
            snapshot.count(*eye_id, tag)
        );
    }

    let timeline = cache_timeline_data(&snapshot, "diameter", &FORCED_DETECTION_METHOD, &[], None);
    println!(
        "diameter ({}): {} right / {} left samples, range {:.2}..{:.2}",
        FORCED_DETECTION_METHOD,
        timeline.right.len(),
        timeline.left.len(),
        timeline.ylim.0,
        timeline.ylim.1
    );
    Ok(())
}

fn init_logging(args: &Args) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("offline_pupil={}", log_level)));

    let mut layers = Vec::new();
    layers.push(match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_target(true)
                .with_thread_ids(args.debug)
                .with_file(args.debug)
                .with_line_number(args.debug)
                .boxed()
        }
    });

    let mut guard = None;
    if let Some(log_file) = &args.log_file {
        let directory = log_file
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| std::path::Path::new("."));
        let file_name = log_file
            .file_name()
            .ok_or_else(|| anyhow::anyhow!("Invalid log file path: {}", log_file.display()))?;
        let appender = tracing_appender::rolling::never(directory, file_name);
        let (writer, worker_guard) = tracing_appender::non_blocking(appender);
        layers.push(
            fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer)
                .boxed(),
        );
        guard = Some(worker_guard);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .init();

    Ok(guard)
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    println!("# Offline Pupil Detection Configuration File");
    println!("# This is the default configuration with all available options");
    println!("# Every key can be overridden with OFFLINE_PUPIL_<SECTION>__<KEY>");
    println!();
    println!("{}", toml::to_string_pretty(&PupilConfig::default())?);
    Ok(())
}
