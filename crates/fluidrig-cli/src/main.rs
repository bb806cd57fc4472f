//! fluidrig CLI - the `fluidrig` command.
//!
//! Runs valve-control scripts against connected solenoid controller
//! boards, checks scripts without touching hardware, and lists the
//! serial ports the rig can see.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use fluidrig_core::{
    scan_ports, MessageKind, Runtime, RuntimeConfig, RuntimeHandle, ProgramId, Script,
};

/// fluidrig - scripted control of microfluidic valve rigs
#[derive(Parser, Debug)]
#[command(name = "fluidrig")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Scripted control of microfluidic valve rigs", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a script function against the connected rig
    Run {
        /// Path to the script file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Function to start; defaults to the script's first visible one
        #[arg(short, long)]
        function: Option<String>,

        /// List the script's functions and parameters instead of running
        #[arg(short, long)]
        list: bool,
    },

    /// Compile a script and report diagnostics, without hardware access
    Check {
        /// Path to the script file
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// List the serial ports currently present
    Ports,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    match args.command {
        Commands::Run {
            file,
            function,
            list,
        } => run_script(file, function, list),
        Commands::Check { file } => check_script(file),
        Commands::Ports => list_ports(),
    }
}

fn list_ports() -> Result<()> {
    let ports = scan_ports();
    if ports.is_empty() {
        println!("No serial ports found");
        return Ok(());
    }
    for port in ports {
        let hwid = if port.hwid.is_empty() {
            "-".to_string()
        } else {
            port.hwid
        };
        println!("{}  {}  {}", port.path, hwid, port.description);
    }
    Ok(())
}

/// Load a script file as a program on a fresh runtime and compile it.
fn load_program(handle: &RuntimeHandle, file: &PathBuf) -> Result<ProgramId> {
    if !file.exists() {
        bail!("No such file: {}", file.display());
    }
    let script = Script::from_file(file);
    let name = script.name();
    let id = handle
        .state()
        .with_state_write(|state| state.chip.add_program(script, name));
    handle
        .compiled_program(id)
        .context("Program vanished during compile")?;
    Ok(id)
}

/// Print a program's message area, skipping the first `seen` entries.
/// Returns the new seen count.
fn print_messages(handle: &RuntimeHandle, id: ProgramId, seen: usize) -> usize {
    let messages = handle.program_messages(id);
    for message in &messages[seen.min(messages.len())..] {
        match message.kind {
            MessageKind::Info => log::info!("{}", message.text),
            MessageKind::CompileError => log::error!("{}", message.text),
            MessageKind::RuntimeError => log::error!("{}", message.text),
        }
    }
    messages.len()
}

fn describe(handle: &RuntimeHandle, id: ProgramId) {
    let Some(compiled) = handle.compiled_program(id) else {
        return;
    };
    if !compiled.description.is_empty() {
        println!("{}", compiled.description);
        println!();
    }
    println!("Functions:");
    for function in compiled.visible_functions() {
        let kind = if function.is_async { "async" } else { "sync" };
        println!("  {}  ({}, {})", function.label(), function.symbol, kind);
    }
    if !compiled.parameters.is_empty() {
        println!("Parameters:");
        for parameter in &compiled.parameters {
            println!(
                "  {}  [{}]  default {:?}",
                parameter.display_name,
                parameter.kind.label(),
                parameter.default
            );
        }
    }
}

fn check_script(file: PathBuf) -> Result<()> {
    let mut runtime = Runtime::start(RuntimeConfig::offline());
    let handle = runtime.handle();
    let id = load_program(&handle, &file)?;

    print_messages(&handle, id, 0);
    describe(&handle, id);
    let failed = handle
        .program_messages(id)
        .iter()
        .any(|m| m.kind == MessageKind::CompileError);
    runtime.shutdown();
    if failed {
        bail!("{} has errors", file.display());
    }
    println!("OK");
    Ok(())
}

fn run_script(file: PathBuf, function: Option<String>, list: bool) -> Result<()> {
    let mut runtime = Runtime::start_default();
    let handle = runtime.handle();
    let id = load_program(&handle, &file)?;

    let mut seen = print_messages(&handle, id, 0);
    let compiled = handle
        .compiled_program(id)
        .context("Program vanished during compile")?;
    if compiled.has_errors() {
        bail!("{} has errors", file.display());
    }

    if list {
        describe(&handle, id);
        runtime.shutdown();
        return Ok(());
    }

    let symbol = match function {
        Some(symbol) => {
            if compiled.function(&symbol).is_none() {
                bail!("No function '{}' in {}", symbol, file.display());
            }
            symbol
        }
        None => compiled
            .visible_functions()
            .next()
            .map(|f| f.symbol.clone())
            .context("Script has no visible functions; name one with display()")?,
    };

    // Give the USB worker a moment to find and connect the boards.
    std::thread::sleep(Duration::from_millis(500));
    let connected = handle.rig().with_rig(|rig| {
        for device in &rig.devices {
            log::info!("Device: {}", device.summary());
        }
        rig.connected_solenoid_numbers().len()
    });
    if connected == 0 {
        log::warn!("No enabled devices connected; valve changes will go nowhere");
    }

    log::info!("Starting '{}'", symbol);
    handle.start_function(id, &symbol);

    let interrupted = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&interrupted))?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&interrupted))?;

    let started = Instant::now();
    let mut last_watchdog_report = Instant::now();
    loop {
        if interrupted.load(Ordering::Relaxed) {
            log::info!("Interrupted, stopping '{}'", symbol);
            handle.stop_function(id, &symbol);
            std::thread::sleep(Duration::from_millis(200));
            break;
        }

        seen = print_messages(&handle, id, seen);

        // Watchdog report, once a second while a step is overdue.
        if handle.is_stuck() && last_watchdog_report.elapsed() >= Duration::from_secs(1) {
            if let Some(suspect) = handle.suspected_function() {
                log::warn!(
                    "'{}' of program '{}' has been in one step for {:?}; it may be stuck",
                    suspect.symbol,
                    suspect.program_name,
                    suspect.started.elapsed()
                );
            }
            last_watchdog_report = Instant::now();
        }

        let idle = handle
            .state()
            .with_state_read(|state| state.tasks.is_empty());
        if idle && started.elapsed() > Duration::from_secs(1) {
            break;
        }
        std::thread::sleep(Duration::from_millis(100));
    }

    seen = print_messages(&handle, id, seen);
    let _ = seen;
    runtime.shutdown();
    Ok(())
}
