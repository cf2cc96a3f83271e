use anyhow::{Context, Result};
use clap::{Arg, ArgAction, Command};
use noclip_node::{server, Config, ValidatedConfig};
use std::path::PathBuf;
use tracing::info;

fn print_dry_run_report(config: &ValidatedConfig) {
    let arbiter = &config.arbiter;
    println!("dry-run report");
    println!("  listen: {}", config.listen);
    println!("  log: level={} json={}", config.log_level, config.json_logs);
    println!(
        "  penalty: enabled={} min_speed_kph={} min_interval={:?} notify={}",
        arbiter.penalty.enabled,
        arbiter.penalty.min_speed_kph,
        arbiter.penalty.min_violation_interval,
        arbiter.penalty.notify
    );
    println!(
        "  penalty tables: durations={:?} decays={:?}",
        arbiter.penalty.durations.map(|duration| duration.as_secs()),
        arbiter.penalty.decays.map(|duration| duration.as_secs())
    );
    println!(
        "  race_start: enabled={} include_qualifying={} window={}s..{}s seed={:?}",
        arbiter.race_start.enabled,
        arbiter.race_start.include_qualifying,
        arbiter.race_start.min.as_secs(),
        arbiter.race_start.max.as_secs(),
        arbiter.race_start.seed
    );
    println!("  off_track: enabled={}", arbiter.off_track.enabled);
    println!("  display: {}", config.display);
    println!("  outbound_buffer: {}", config.outbound_buffer);
}

fn init_logging(config: &ValidatedConfig) {
    let builder = tracing_subscriber::fmt().with_max_level(config.log_level);
    if config.json_logs {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() {
    if let Err(err) = main_result() {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}

fn main_result() -> Result<()> {
    // Parse arguments
    let matches = Command::new("noclip")
        .about("Collision arbitration for racing game servers.")
        .arg(
            Arg::new("config")
                .long("config")
                .help("YAML configuration file (defaults apply when omitted)")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("dry-run")
                .long("dry-run")
                .help("Validate the configuration and exit without serving")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    // Load config
    let config = match matches.get_one::<PathBuf>("config") {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    let config = config.validate().context("Invalid configuration")?;

    if matches.get_flag("dry-run") {
        print_dry_run_report(&config);
        println!("config ok");
        return Ok(());
    }

    init_logging(&config);
    info!(config = ?config, "loaded config");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Could not start runtime")?;
    runtime.block_on(server::serve(config))
}
