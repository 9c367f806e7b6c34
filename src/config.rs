//! The training configuration: every tunable in one immutable record,
//! validated once at startup.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use crate::encoding::{FEATURE_SIZE, NUM_ACTIONS};
use crate::env::IllegalActionPolicy;
use crate::network::{GradientClip, Loss, NetworkSpec, OptimizerKind, WeightInit};
use crate::replay::ReplayType;
use crate::selfplay::opponent::OpponentKind;

#[derive(Error, Clone, PartialEq, Debug)]
pub enum ConfigError {
    #[error("{name} must be positive")]
    NonPositive { name: &'static str },
    #[error("learning_rate must be in (0, 1], got {0}")]
    LearningRate(f64),
    #[error("exploration_rate must be in [0, 1], got {0}")]
    ExplorationRate(f64),
    #[error("exploration_min must be in [0, exploration_rate], got {0}")]
    ExplorationMin(f64),
    #[error("gamma must be in (0, 1), got {0}")]
    Gamma(f64),
    #[error("hidden_layers must not be empty")]
    EmptyHiddenLayers,
    #[error("hidden layer {index} has zero width")]
    ZeroWidthLayer { index: usize },
    #[error("max_experience_buffer ({buffer}) must exceed batch_size ({batch})")]
    BufferTooSmall { buffer: usize, batch: usize },
}

#[derive(Clone, Debug)]
pub struct TrainingConfig {
    // Q-network
    pub hidden_layers: Vec<usize>,
    pub learning_rate: f64,
    pub optimizer: OptimizerKind,
    pub loss: Loss,
    pub weight_init: WeightInit,
    pub weight_decay: f64,
    pub gradient_clip: Option<GradientClip>,

    // DQN
    pub batch_size: usize,
    pub exploration_rate: f64,
    pub exploration_min: f64,
    pub exploration_decay: f64,
    pub target_update_frequency: u64,
    pub double_dqn: bool,
    pub gamma: f64,
    /// Consecutive non-finite training updates tolerated before the run
    /// aborts.
    pub max_numeric_failures: u32,

    // Replay
    pub max_experience_buffer: usize,
    pub replay_type: ReplayType,
    pub priority_alpha: f64,
    pub priority_beta: f64,
    pub priority_beta_increment: f64,
    pub priority_epsilon: f64,

    // Self-play schedule
    pub games_per_cycle: usize,
    pub max_cycles: usize,
    pub max_concurrent_games: usize,
    pub max_steps_per_game: usize,
    pub max_batches_per_cycle: usize,
    /// Wall-clock budget for one collect phase; games still running at the
    /// deadline are abandoned.
    pub cycle_time_limit: Option<Duration>,

    // Rewards, from the perspective of the side that just moved
    pub win_reward: f64,
    pub loss_reward: f64,
    pub draw_reward: f64,
    pub step_limit_penalty: f64,
    pub illegal_move_penalty: f64,
    pub fallback_penalty: f64,
    pub illegal_action_policy: IllegalActionPolicy,

    // Early adjudication, separately for training and evaluation games
    pub train_early_adjudication: bool,
    pub train_resign_material_threshold: f64,
    pub train_no_progress_plies: u32,
    pub eval_early_adjudication: bool,
    pub eval_resign_material_threshold: f64,
    pub eval_no_progress_plies: u32,

    // Opponents
    pub train_opponent: OpponentKind,
    pub eval_opponent: OpponentKind,

    // Bookkeeping
    pub seed: Option<u64>,
    pub checkpoint_interval: usize,
    pub checkpoint_directory: PathBuf,
    pub checkpoint_max_versions: usize,
    pub evaluation_games: usize,
    /// Batches between progress lines during the train phase.
    pub log_interval: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        TrainingConfig {
            hidden_layers: vec![512, 256],
            learning_rate: 0.001,
            optimizer: OptimizerKind::adam(),
            loss: Loss::huber(),
            weight_init: WeightInit::He,
            weight_decay: 0.0,
            gradient_clip: Some(GradientClip::GlobalNorm(10.0)),

            batch_size: 64,
            exploration_rate: 0.2,
            exploration_min: 0.02,
            exploration_decay: 0.995,
            target_update_frequency: 100,
            double_dqn: true,
            gamma: 0.99,
            max_numeric_failures: 3,

            max_experience_buffer: 50_000,
            replay_type: ReplayType::Uniform,
            priority_alpha: 0.6,
            priority_beta: 0.4,
            priority_beta_increment: 0.001,
            priority_epsilon: 1e-5,

            games_per_cycle: 20,
            max_cycles: 100,
            max_concurrent_games: 4,
            max_steps_per_game: 200,
            max_batches_per_cycle: 50,
            cycle_time_limit: Some(Duration::from_secs(300)),

            win_reward: 1.0,
            loss_reward: -1.0,
            draw_reward: 0.0,
            step_limit_penalty: -0.5,
            illegal_move_penalty: -1.0,
            fallback_penalty: -0.05,
            illegal_action_policy: IllegalActionPolicy::Terminate,

            train_early_adjudication: false,
            train_resign_material_threshold: 15.0,
            train_no_progress_plies: 80,
            eval_early_adjudication: true,
            eval_resign_material_threshold: 15.0,
            eval_no_progress_plies: 80,

            train_opponent: OpponentKind::SelfPlay,
            eval_opponent: OpponentKind::Heuristic,

            seed: None,
            checkpoint_interval: 5,
            checkpoint_directory: PathBuf::from("checkpoints"),
            checkpoint_max_versions: 5,
            evaluation_games: 10,
            log_interval: 10,
        }
    }
}

impl TrainingConfig {
    /// Reject anything that cannot train; warn about things that can but
    /// probably should not.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("batch_size", self.batch_size),
            ("max_experience_buffer", self.max_experience_buffer),
            ("games_per_cycle", self.games_per_cycle),
            ("max_cycles", self.max_cycles),
            ("max_concurrent_games", self.max_concurrent_games),
            ("max_steps_per_game", self.max_steps_per_game),
            ("max_batches_per_cycle", self.max_batches_per_cycle),
            ("checkpoint_interval", self.checkpoint_interval),
            ("checkpoint_max_versions", self.checkpoint_max_versions),
        ] {
            if value == 0 {
                return Err(ConfigError::NonPositive { name });
            }
        }
        if self.target_update_frequency == 0 {
            return Err(ConfigError::NonPositive {
                name: "target_update_frequency",
            });
        }

        if !(self.learning_rate > 0.0 && self.learning_rate <= 1.0) {
            return Err(ConfigError::LearningRate(self.learning_rate));
        }
        if !(0.0..=1.0).contains(&self.exploration_rate) {
            return Err(ConfigError::ExplorationRate(self.exploration_rate));
        }
        if !(0.0..=self.exploration_rate).contains(&self.exploration_min) {
            return Err(ConfigError::ExplorationMin(self.exploration_min));
        }
        if !(self.gamma > 0.0 && self.gamma < 1.0) {
            return Err(ConfigError::Gamma(self.gamma));
        }

        if self.hidden_layers.is_empty() {
            return Err(ConfigError::EmptyHiddenLayers);
        }
        if let Some(index) = self.hidden_layers.iter().position(|&w| w == 0) {
            return Err(ConfigError::ZeroWidthLayer { index });
        }

        if self.max_experience_buffer <= self.batch_size {
            return Err(ConfigError::BufferTooSmall {
                buffer: self.max_experience_buffer,
                batch: self.batch_size,
            });
        }

        let hardware = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        if self.max_concurrent_games > hardware {
            warn!(
                requested = self.max_concurrent_games,
                hardware, "more concurrent games than hardware threads"
            );
        }
        if self.draw_reward > self.win_reward {
            warn!(
                draw = self.draw_reward,
                win = self.win_reward,
                "draw reward exceeds win reward; the agent will steer into draws"
            );
        }

        Ok(())
    }

    /// Spec for the Q-network (and its target twin).
    pub fn network_spec(&self) -> NetworkSpec {
        NetworkSpec {
            input_size: FEATURE_SIZE,
            hidden_layers: self.hidden_layers.clone(),
            output_size: NUM_ACTIONS,
            loss: self.loss,
            optimizer: self.optimizer,
            learning_rate: self.learning_rate,
            weight_decay: self.weight_decay,
            gradient_clip: self.gradient_clip,
            weight_init: self.weight_init,
            seed: self.seed,
        }
    }
}
