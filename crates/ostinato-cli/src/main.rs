use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use ostinato_midi::backend_midir::MidirBackend;
use ostinato_midi::{DeviceId, EngineSettings, MidiEngine};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::List => execute_list(),
        Commands::Monitor(args) => execute_monitor(args),
        Commands::Forward(args) => execute_forward(args),
    }
}

#[derive(Parser)]
#[command(author, version, about = "MIDI device tools for the Ostinato engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available MIDI input and output devices.
    List,
    /// Print every event arriving on one input device.
    Monitor(MonitorArgs),
    /// Forward everything from an input to one or more outputs.
    Forward(ForwardArgs),
}

#[derive(Args)]
struct MonitorArgs {
    /// Input device, by enumeration index or exact name.
    #[arg(long)]
    input: String,
    /// Handler identifier prefix.
    #[arg(long, default_value = "Midi")]
    prefix: String,
}

#[derive(Args)]
struct ForwardArgs {
    /// Input device, by enumeration index or exact name.
    #[arg(long)]
    input: String,
    /// Output devices, by enumeration index or exact name.
    #[arg(long, required = true)]
    output: Vec<String>,
}

fn execute_list() -> Result<()> {
    let mut engine = MidiEngine::new(MidirBackend::default());
    engine
        .refresh_devices()
        .context("failed to enumerate MIDI devices")?;

    println!("Inputs:");
    for descriptor in engine.inputs() {
        println!("  {}: {}", descriptor.id, descriptor.name);
    }
    println!("Outputs:");
    for descriptor in engine.outputs() {
        println!("  {}: {}", descriptor.id, descriptor.name);
    }
    Ok(())
}

fn execute_monitor(args: MonitorArgs) -> Result<()> {
    let settings = EngineSettings {
        handler_prefix: args.prefix.clone(),
        passthrough_enabled: false,
        ..EngineSettings::default()
    };
    let mut engine = MidiEngine::with_settings(MidirBackend::default(), settings);
    engine
        .refresh_devices()
        .context("failed to enumerate MIDI devices")?;

    let device = open_input(&mut engine, &args.input)?;
    let name = engine
        .inputs()
        .iter()
        .find(|descriptor| descriptor.id == device)
        .map(|descriptor| descriptor.name.clone())
        .unwrap_or_default();
    engine.register_handler(args.prefix.clone(), |event| {
        println!("{event}");
    });

    println!("Monitoring '{name}' (Ctrl-C to exit)");
    loop {
        engine.pump_timeout(Duration::from_millis(50));
    }
}

fn execute_forward(args: ForwardArgs) -> Result<()> {
    // No handlers and dispatch off: pass-through forwards every message.
    let settings = EngineSettings {
        dispatch_enabled: false,
        ..EngineSettings::default()
    };
    let mut engine = MidiEngine::with_settings(MidirBackend::default(), settings);
    engine
        .refresh_devices()
        .context("failed to enumerate MIDI devices")?;

    open_input(&mut engine, &args.input)?;
    for selector in &args.output {
        open_output(&mut engine, selector)?;
    }

    println!(
        "Forwarding to {} output(s) (Ctrl-C to exit)",
        engine.manager().open_output_count()
    );
    loop {
        engine.pump_timeout(Duration::from_millis(50));
    }
}

fn open_input(engine: &mut MidiEngine<MidirBackend>, selector: &str) -> Result<DeviceId> {
    if let Ok(device) = selector.parse::<DeviceId>() {
        return engine
            .open_input(device)
            .with_context(|| format!("failed to open input {device}"));
    }
    engine
        .open_input_by_name(selector)
        .with_context(|| format!("failed to open input '{selector}'"))?
        .ok_or_else(|| anyhow!("no input named '{selector}'"))
}

fn open_output(engine: &mut MidiEngine<MidirBackend>, selector: &str) -> Result<DeviceId> {
    if let Ok(device) = selector.parse::<DeviceId>() {
        return engine
            .open_output(device)
            .with_context(|| format!("failed to open output {device}"));
    }
    engine
        .open_output_by_name(selector)
        .with_context(|| format!("failed to open output '{selector}'"))?
        .ok_or_else(|| anyhow!("no output named '{selector}'"))
}
