use std::{env, path::PathBuf, sync::atomic::Ordering};

use anyhow::{Context, Result, bail};
use log::{LevelFilter, info, warn};
use ml_core::{LocalGroup, ProcessGroup};
use orchestrator::{RunOutcome, configs::RunConfig};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let Some(path) = env::args().nth(1).map(PathBuf::from) else {
        bail!("usage: mtl-orchestra <config.json>");
    };

    let group = LocalGroup;
    if !group.is_main() {
        log::set_max_level(LevelFilter::Warn);
    }

    let config = RunConfig::from_file(&path)
        .with_context(|| format!("loading {}", path.display()))?;
    let session = orchestrator::session(&config, group)?;

    let stop = session.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping at the next batch");
            stop.store(true, Ordering::SeqCst);
        }
    });

    match tokio::task::spawn_blocking(move || session.run()).await?? {
        RunOutcome::AlreadyDone => info!("run already completed"),
        RunOutcome::Interrupted { global_step } => {
            info!(step = global_step; "run interrupted, invoke again to resume")
        }
        RunOutcome::Completed { global_step, results } => {
            for (task, metrics) in &results {
                info!("{task}: {metrics:?}");
            }
            info!("run completed at step {global_step:?}");
        }
    }

    Ok(())
}
