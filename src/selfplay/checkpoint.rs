//! Versioned checkpoint files with bounded retention and best-by-win-rate
//! tracking. A failed write is logged and swallowed: a missed checkpoint
//! must not stop training.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::dqn::DqnAgent;
use crate::network::NetworkError;

pub struct CheckpointManager {
    directory: PathBuf,
    max_versions: usize,
    /// Saved cycle checkpoints, oldest first.
    saved: Vec<PathBuf>,
    best_win_rate: Option<f64>,
}

impl CheckpointManager {
    pub fn new(directory: &Path, max_versions: usize) -> Self {
        CheckpointManager {
            directory: directory.to_path_buf(),
            max_versions: max_versions.max(1),
            saved: Vec::new(),
            best_win_rate: None,
        }
    }

    pub fn best_win_rate(&self) -> Option<f64> {
        self.best_win_rate
    }

    fn cycle_path(&self, cycle: usize) -> PathBuf {
        self.directory.join(format!("checkpoint-cycle-{cycle:06}.json"))
    }

    pub fn best_path(&self) -> PathBuf {
        self.directory.join("best.json")
    }

    fn write(&self, agent: &DqnAgent, path: &Path) -> Result<(), NetworkError> {
        fs::create_dir_all(&self.directory)?;
        agent.save(path)
    }

    /// Save a cycle checkpoint and prune the oldest beyond the retention
    /// limit. Returns the path on success; failures are logged, not fatal.
    pub fn save_cycle(&mut self, agent: &DqnAgent, cycle: usize) -> Option<PathBuf> {
        let path = self.cycle_path(cycle);
        if let Err(err) = self.write(agent, &path) {
            warn!(%err, path = %path.display(), "checkpoint save failed; continuing");
            return None;
        }
        info!(path = %path.display(), "checkpoint written");
        self.saved.push(path.clone());

        while self.saved.len() > self.max_versions {
            let old = self.saved.remove(0);
            if let Err(err) = fs::remove_file(&old) {
                warn!(%err, path = %old.display(), "stale checkpoint not removed");
            }
        }
        Some(path)
    }

    /// Keep `best.json` pointing at the highest evaluation win rate seen.
    pub fn record_best(&mut self, agent: &DqnAgent, win_rate: f64) {
        let improved = self.best_win_rate.map(|b| win_rate > b).unwrap_or(true);
        if !improved {
            return;
        }
        let path = self.best_path();
        match self.write(agent, &path) {
            Ok(()) => {
                info!(win_rate, path = %path.display(), "new best checkpoint");
                self.best_win_rate = Some(win_rate);
            }
            Err(err) => warn!(%err, "best checkpoint save failed; continuing"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrainingConfig;

    fn test_agent() -> DqnAgent {
        let mut config = TrainingConfig::default();
        config.hidden_layers = vec![4];
        config.seed = Some(13);
        DqnAgent::new(&config)
    }

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("chess-rl-checkpoint-tests").join(name);
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn retention_prunes_the_oldest() {
        let dir = temp_dir("retention");
        let mut manager = CheckpointManager::new(&dir, 2);
        let agent = test_agent();

        for cycle in 0..4 {
            assert!(manager.save_cycle(&agent, cycle).is_some());
        }

        let mut kept: Vec<String> = fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        kept.sort();
        assert_eq!(
            kept,
            vec![
                "checkpoint-cycle-000002.json".to_string(),
                "checkpoint-cycle-000003.json".to_string(),
            ]
        );
    }

    #[test]
    fn best_checkpoint_only_improves() {
        let dir = temp_dir("best");
        let mut manager = CheckpointManager::new(&dir, 3);
        let agent = test_agent();

        manager.record_best(&agent, 0.4);
        assert_eq!(manager.best_win_rate(), Some(0.4));
        manager.record_best(&agent, 0.3);
        assert_eq!(manager.best_win_rate(), Some(0.4), "lower rate must not replace");
        manager.record_best(&agent, 0.7);
        assert_eq!(manager.best_win_rate(), Some(0.7));
        assert!(manager.best_path().exists());
    }

    #[test]
    fn unwritable_directory_is_not_fatal() {
        let mut manager = CheckpointManager::new(Path::new("/dev/null/nope"), 2);
        let agent = test_agent();
        assert!(manager.save_cycle(&agent, 0).is_none());
        manager.record_best(&agent, 0.5);
        assert_eq!(manager.best_win_rate(), None);
    }
}
