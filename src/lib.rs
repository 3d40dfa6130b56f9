pub mod agent_engine;
pub mod commands;
pub mod config;
pub mod errors;
pub mod executor;
pub mod llm;
pub mod memory;
pub mod perception;
pub mod plugins;

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::agent_engine::engine::AgentEngine;
use crate::agent_engine::event_bus::EventBus;
use crate::commands::AgentHandle;
use crate::errors::{OrdenadorError, OrdenadorResult};
use crate::memory::spatial::SpatialMemory;

pub use crate::agent_engine::event_bus::AgentNotification;
pub use crate::agent_engine::state::{RunOutcome, TaskState};
pub use crate::config::{load_config, AppConfig};

/// Install the global `tracing` subscriber. `RUST_LOG` wins; otherwise `info`.
/// Calling it twice is harmless.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();
}

/// Move the engine onto its own task and return the handle that drives it.
///
/// The bus keeps its broadcast side, so callers can still `subscribe()` after
/// this returns.
pub fn spawn_agent(
    mut engine: AgentEngine,
    bus: &mut EventBus,
) -> OrdenadorResult<(Arc<AgentHandle>, JoinHandle<()>)> {
    let rx = bus
        .take_command_receiver()
        .ok_or_else(|| OrdenadorError::Agent("agent already spawned on this bus".into()))?;
    let handle = Arc::new(AgentHandle::new(
        bus.command_sender(),
        engine.run_lock(),
        SpatialMemory::new(engine.memory().path()),
    ));

    tracing::info!("spawning AgentEngine background task");
    let task = tokio::spawn(async move {
        engine.run_loop(rx).await;
        tracing::info!("AgentEngine task exited");
    });
    Ok((handle, task))
}
