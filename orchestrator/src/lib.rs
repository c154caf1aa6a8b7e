pub mod configs;
pub mod error;
mod session;

use log::info;
use ml_core::ProcessGroup;

use configs::{Adapter, RunConfig};

pub use error::{OrchestratorError, Result};
pub use session::{RunOutcome, Session};

/// Validates a run configuration and prepares the session of this process.
///
/// # Errors
/// Returns an `OrchestratorError` if the configuration is invalid; nothing
/// is allocated or written in that case.
pub fn session<G: ProcessGroup + Clone>(config: &RunConfig, group: G) -> Result<Session<G>> {
    info!("adapting configs");
    let spec = Adapter::new().adapt(config)?;
    info!(
        tasks = spec.tasks.len(),
        world_size = group.world_size();
        "session ready, writing to {}", spec.trainer.output_dir.display()
    );
    Ok(Session::new(spec, group))
}
