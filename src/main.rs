// Ordenador CLI: run a task or calibration against the real desktop, or edit
// the stored element positions.
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use ordenador::agent_engine::engine::AgentEngine;
use ordenador::agent_engine::event_bus::EventBus;
use ordenador::config::{load_config_from, AppConfig, MemoryConfig};
use ordenador::errors::{OrdenadorError, OrdenadorResult};
use ordenador::executor::input::DesktopDriver;
use ordenador::memory::spatial::{Point, SpatialMemory};
use ordenador::perception::screenshot::XcapCapture;
use ordenador::{init_tracing, spawn_agent, AgentNotification, RunOutcome};

#[derive(Parser)]
#[command(name = "ordenador")]
#[command(about = "Vision-driven desktop assistant")]
#[command(version)]
struct Cli {
    /// Path to config.toml (defaults to next to the executable, then the working directory)
    #[arg(short, long, env = "ORDENADOR_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Carry out a free-form instruction
    Run {
        #[arg(required = true, num_args = 1..)]
        task: Vec<String>,
    },
    /// Locate elements and store their positions (defaults to [calibration].elements)
    Calibrate { elements: Vec<String> },
    /// Store an element position by hand
    Teach { name: String, x: i32, y: i32 },
    /// Remove a stored element
    Forget { name: String },
    /// List stored elements
    Elements,
}

fn load(path: Option<&PathBuf>) -> OrdenadorResult<AppConfig> {
    match path {
        Some(p) => load_config_from(p),
        None => ordenador::load_config(),
    }
}

/// Memory commands work without a usable LLM config.
fn memory_for(path: Option<&PathBuf>) -> SpatialMemory {
    let memory = match load(path) {
        Ok(cfg) => cfg.memory,
        Err(e) => {
            tracing::debug!(error = %e, "no config, using default memory location");
            MemoryConfig::default()
        }
    };
    SpatialMemory::new(memory.resolved_path())
}

#[tokio::main]
async fn main() -> OrdenadorResult<()> {
    let _ = dotenvy::dotenv();
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Teach { name, x, y } => {
            memory_for(cli.config.as_ref()).remember(&name, Point::new(x, y))?;
            println!("{name} -> ({x}, {y})");
            Ok(())
        }
        Command::Forget { name } => {
            if memory_for(cli.config.as_ref()).forget(&name)? {
                println!("forgot {name}");
            } else {
                println!("{name} was not stored");
            }
            Ok(())
        }
        Command::Elements => {
            for (name, p) in memory_for(cli.config.as_ref()).entries() {
                println!("{name}: ({}, {})", p.x, p.y);
            }
            Ok(())
        }
        Command::Run { task } => {
            let config = load(cli.config.as_ref())?;
            drive(&config, Request::Task(task.join(" "))).await
        }
        Command::Calibrate { elements } => {
            let config = load(cli.config.as_ref())?;
            let elements = if elements.is_empty() {
                config.calibration.elements.clone()
            } else {
                elements
            };
            drive(&config, Request::Calibrate(elements)).await
        }
    }
}

enum Request {
    Task(String),
    Calibrate(Vec<String>),
}

async fn drive(config: &AppConfig, request: Request) -> OrdenadorResult<()> {
    let mut bus = EventBus::new();
    let mut notes = bus.subscribe();
    let engine = AgentEngine::from_config(
        config,
        Arc::new(XcapCapture::new(config.capture.clone())),
        Arc::new(DesktopDriver::new()),
        bus.notifier(),
    );
    let (handle, task) = spawn_agent(engine, &mut bus)?;

    match request {
        Request::Task(input) => handle.start_task(input).await?,
        Request::Calibrate(elements) => handle.start_calibration(elements).await?,
    }

    let stopper = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("stopping...");
            stopper.stop_task();
        }
    });

    let outcome = loop {
        match notes.recv().await {
            Ok(AgentNotification::Status(s)) => println!("* {s}"),
            Ok(AgentNotification::Log(line)) => println!("  {line}"),
            Ok(AgentNotification::CalibrationResult(r)) => match r.position {
                Some((x, y)) => println!("  {} -> ({x}, {y})", r.element),
                None => println!("  {} not found", r.element),
            },
            Ok(AgentNotification::Finished(outcome)) => break outcome,
            Ok(_) => {}
            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(skipped = n, "notification receiver lagged");
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                return Err(OrdenadorError::Agent("engine stopped unexpectedly".into()));
            }
        }
    };

    handle.shutdown().await;
    let _ = task.await;
    match outcome {
        RunOutcome::Aborted { reason } => Err(OrdenadorError::Agent(reason)),
        _ => Ok(()),
    }
}
