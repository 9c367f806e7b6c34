use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use chess_rl::config::TrainingConfig;
use chess_rl::selfplay::Orchestrator;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = TrainingConfig::default();

    let mut orchestrator = match Orchestrator::new(config) {
        Ok(orchestrator) => orchestrator,
        Err(err) => {
            error!(%err, "invalid configuration");
            std::process::exit(1);
        }
    };

    // Raised by an embedding process to stop at the next cycle boundary;
    // the run always leaves a final checkpoint behind.
    let stop = Arc::new(AtomicBool::new(false));

    match orchestrator.run(&stop) {
        Ok(summary) => {
            info!(
                cycles = summary.cycles,
                games = summary.games,
                experiences = summary.experiences,
                batches = summary.batches,
                best_win_rate = summary.best_win_rate,
                "done"
            );
        }
        Err(err) => {
            error!(%err, "training aborted");
            std::process::exit(1);
        }
    }
}
