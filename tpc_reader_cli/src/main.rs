use clap::{Arg, Command};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use indicatif_log_bridge::LogWrapper;
use std::path::{Path, PathBuf};
use std::sync::mpsc;

use libtpc_reader::config::Config;
use libtpc_reader::data_source::open_source;
use libtpc_reader::error::ProcessorError;
use libtpc_reader::event_sink::{EventSink, YamlSink};
use libtpc_reader::monitor::Monitor;
use libtpc_reader::process::{process_run, report_scan};
use libtpc_reader::worker_status::BarColor;

fn make_template_config(path: &Path) {
    let config = Config::default();
    if let Err(e) = config.write_config_file(path) {
        log::error!("Could not write the template config: {e}");
        std::process::exit(1);
    }
}

fn bar_style(color: &BarColor) -> ProgressStyle {
    let template = match color {
        BarColor::CYAN => "{bar:40.cyan/blue} {percent}% {msg}",
        BarColor::MAGENTA => "{bar:40.magenta/blue} {percent}% {msg}",
        BarColor::RED => "{bar:40.red/blue} {percent}% {msg}",
        BarColor::GREEN => "{bar:40.green/blue} {percent}% {msg}",
    };
    ProgressStyle::with_template(template).unwrap_or_else(|_| ProgressStyle::default_bar())
}

/// Terminate on an error. Fatal ones are called out, the log has the details either way.
fn fail(e: ProcessorError) -> ! {
    if e.is_fatal() {
        log::error!("Fatal error, the data is inconsistent: {e}");
    } else {
        log::error!("{e}");
    }
    std::process::exit(1);
}

fn run_scan(config: &Config) -> Result<(), ProcessorError> {
    let mut source = open_source(config)?;
    let report = source.scan(0, true)?;
    report_scan(source.as_ref(), &report);
    Ok(())
}

fn run_monitor(config: &Config) -> Result<usize, ProcessorError> {
    let output = config.get_output_path();
    let mut sink = YamlSink::open(&output.to_string_lossy())?;
    let mut monitor = Monitor::open(config)?;
    let total = monitor.run(|event, tracker| sink.write_event(&event, tracker.as_ref()))?;
    sink.close()?;
    Ok(total)
}

fn run_convert(config: Config, pb_manager: &MultiProgress) -> Result<usize, ProcessorError> {
    let pb = pb_manager.add(ProgressBar::new(100));
    pb.set_style(bar_style(&BarColor::CYAN));
    let (tx, rx) = mpsc::channel();

    // The sources are not Send, so everything is built inside the worker
    let handle = std::thread::spawn(move || -> Result<usize, ProcessorError> {
        let output = config.get_output_path();
        let mut sink = YamlSink::open(&output.to_string_lossy())?;
        process_run(&config, &mut sink, &tx)
    });

    let mut color = BarColor::CYAN;
    loop {
        std::thread::sleep(std::time::Duration::from_millis(100));
        for status in rx.try_iter() {
            if status.color != color {
                color = status.color.clone();
                pb.set_style(bar_style(&color));
            }
            pb.set_position((status.progress * 100.0) as u64);
            pb.set_message(format!("{} events", status.events));
        }

        if handle.is_finished() {
            pb.finish();
            return match handle.join() {
                Ok(result) => result,
                Err(_) => {
                    log::error!("Failed to join conversion task!");
                    std::process::exit(1);
                }
            };
        }
    }
}

fn main() {
    // Create a cli
    let matches = Command::new("tpc_reader_cli")
        .arg_required_else_help(true)
        .subcommand(Command::new("new").about("Make a template configuration yaml file"))
        .subcommand(Command::new("scan").about("Index the source and print its statistics"))
        .subcommand(Command::new("monitor").about("Follow a source which is still being written"))
        .arg(
            Arg::new("path")
                .short('p')
                .long("path")
                .global(true)
                .help("Path to the configuration file"),
        )
        .get_matches();

    // Initialize feedback
    let logger = simplelog::TermLogger::new(
        simplelog::LevelFilter::Info,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );

    let pb_manager = MultiProgress::new();

    LogWrapper::new(pb_manager.clone(), logger)
        .try_init()
        .expect("Could not create logging/progress!");

    // Parse the cli
    let config_path = match matches.get_one::<String>("path") {
        Some(path) => PathBuf::from(path),
        None => {
            log::error!("A configuration path is required (-p/--path)");
            std::process::exit(1);
        }
    };

    if let Some(("new", _)) = matches.subcommand() {
        log::info!(
            "Making a template config at {}...",
            config_path.to_string_lossy()
        );
        make_template_config(&config_path);
        log::info!("Done.");
        return;
    }

    // Load our config
    log::info!("Loading config from {}...", config_path.to_string_lossy());
    let config = match Config::read_config_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            log::error!("{e}");
            std::process::exit(1);
        }
    };
    log::info!("Config successfully loaded.");
    log::info!("Input: {}", config.input);
    if let Some(tracker) = &config.tracker_path {
        log::info!("Tracker: {}", tracker.to_string_lossy());
    }

    match matches.subcommand() {
        Some(("scan", _)) => {
            if let Err(e) = run_scan(&config) {
                fail(e);
            }
        }
        Some(("monitor", _)) => match run_monitor(&config) {
            Ok(total) => log::info!("Monitored {total} events."),
            Err(e) => fail(e),
        },
        _ => {
            log::info!("Output: {}", config.get_output_path().to_string_lossy());
            match run_convert(config, &pb_manager) {
                Ok(total) => log::info!("Successfully converted {total} events!"),
                Err(e) => fail(e),
            }
        }
    }

    log::info!("Done.");
}
