//! The training loop: collect → train → evaluate → checkpoint, cycle by
//! cycle.
//!
//! Collection fans games out over a fixed pool of worker threads fed by a
//! job channel. Workers only read the agent (action selection borrows it
//! immutably) and push each finished game's experiences into the shared
//! replay buffer under a single lock acquisition, so within a game the
//! buffer order is the move order. The train phase runs after the pool has
//! drained, when the orchestrator has the agent to itself again.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigError, TrainingConfig};
use crate::dqn::{DqnAgent, TrainingError};
use crate::env::EnvOptions;
use crate::piece::Color;
use crate::replay::{ReplayBuffer, ReplayType};
use crate::selfplay::checkpoint::CheckpointManager;
use crate::selfplay::evaluation::{evaluate_agent, EvalSummary};
use crate::selfplay::worker::{play_episode, EpisodeOutcome};

/// Aggregate outcome of a whole run.
#[derive(Clone, Copy, PartialEq, Debug, Default)]
pub struct RunSummary {
    pub cycles: usize,
    pub games: usize,
    pub games_aborted: usize,
    pub experiences: usize,
    pub batches: usize,
    pub final_epsilon: f64,
    pub best_win_rate: Option<f64>,
}

#[derive(Default)]
struct CollectStats {
    finished: usize,
    aborted: usize,
    experiences: usize,
    plies: usize,
    reward_sum: f64,
}

#[derive(Default)]
struct TrainStats {
    batches: usize,
    trained: usize,
    loss_sum: f64,
    grad_sum: f64,
    entropy_sum: f64,
}

struct GameReport {
    finished: bool,
    experiences: usize,
    plies: usize,
    reward: f64,
}

fn worker_seed(base: u64, cycle: usize, worker: usize) -> u64 {
    base ^ (cycle as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15)
        ^ (worker as u64 + 1).wrapping_mul(0xd1b5_4a32_d192_ed03)
}

pub struct Orchestrator {
    config: TrainingConfig,
    agent: DqnAgent,
    buffer: Mutex<ReplayBuffer>,
    checkpoints: CheckpointManager,
    seed_base: u64,
}

impl Orchestrator {
    /// Validate the configuration and assemble the agent, buffer and
    /// checkpoint manager. Configuration errors are fatal here, before
    /// anything is spawned.
    pub fn new(config: TrainingConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let agent = DqnAgent::new(&config);
        let buffer = match config.replay_type {
            ReplayType::Uniform => ReplayBuffer::uniform(config.max_experience_buffer),
            ReplayType::Prioritized => ReplayBuffer::prioritized(
                config.max_experience_buffer,
                config.priority_alpha,
                config.priority_beta,
                config.priority_beta_increment,
                config.priority_epsilon,
            ),
        };
        let checkpoints =
            CheckpointManager::new(&config.checkpoint_directory, config.checkpoint_max_versions);
        let seed_base = config.seed.unwrap_or_else(rand::random);

        Ok(Orchestrator {
            config,
            agent,
            buffer: Mutex::new(buffer),
            checkpoints,
            seed_base,
        })
    }

    pub fn agent(&self) -> &DqnAgent {
        &self.agent
    }

    /// Run up to `max_cycles` cycles, or until `stop` is raised. Always
    /// writes a final checkpoint on the way out, including the clean-abort
    /// path after persistent training failures.
    pub fn run(&mut self, stop: &AtomicBool) -> Result<RunSummary, TrainingError> {
        let train_options = EnvOptions::for_training(&self.config);
        let eval_options = EnvOptions::for_evaluation(&self.config);
        let mut trainer_rng =
            ChaCha8Rng::seed_from_u64(self.seed_base ^ 0x7261_696e_6572_0001);
        let mut eval_rng = ChaCha8Rng::seed_from_u64(self.seed_base ^ 0x6576_616c_0000_0001);
        let mut summary = RunSummary::default();

        info!(
            cycles = self.config.max_cycles,
            games_per_cycle = self.config.games_per_cycle,
            workers = self.config.max_concurrent_games,
            "training run starting"
        );

        for cycle in 0..self.config.max_cycles {
            if stop.load(Ordering::Relaxed) {
                info!(cycle, "external stop signal; shutting down cleanly");
                break;
            }

            let collect = self.collect_phase(cycle, &train_options);
            summary.games += collect.finished;
            summary.games_aborted += collect.aborted;
            summary.experiences += collect.experiences;

            let train = match self.train_phase(&mut trainer_rng) {
                Ok(stats) => stats,
                Err(err) => {
                    error!(%err, "training phase aborted; writing final checkpoint");
                    self.checkpoints.save_cycle(&self.agent, cycle + 1);
                    return Err(err);
                }
            };
            summary.batches += train.batches;

            self.agent.decay_epsilon();
            // With the step-based sync disabled, resynchronize at the cycle
            // boundary instead.
            if self.config.target_update_frequency == u64::MAX {
                self.agent.force_update();
            }

            let eval = if self.config.evaluation_games > 0 {
                let eval = evaluate_agent(
                    &self.agent,
                    &self.config.eval_opponent,
                    self.config.evaluation_games,
                    &eval_options,
                    &mut eval_rng,
                );
                self.checkpoints.record_best(&self.agent, eval.win_rate());
                Some(eval)
            } else {
                None
            };

            if (cycle + 1) % self.config.checkpoint_interval == 0 {
                self.checkpoints.save_cycle(&self.agent, cycle + 1);
            }

            summary.cycles = cycle + 1;
            self.log_cycle(cycle + 1, &collect, &train, eval.as_ref());
        }

        // Final checkpoint, unless the last cycle just wrote one.
        if summary.cycles == 0 || summary.cycles % self.config.checkpoint_interval != 0 {
            self.checkpoints.save_cycle(&self.agent, summary.cycles);
        }
        summary.final_epsilon = self.agent.epsilon();
        summary.best_win_rate = self.checkpoints.best_win_rate();
        info!(
            cycles = summary.cycles,
            games = summary.games,
            experiences = summary.experiences,
            "training run finished"
        );
        Ok(summary)
    }

    /// Schedule the cycle's games onto the worker pool and absorb their
    /// experiences. Games that fail or outlive the cycle deadline are
    /// dropped whole.
    fn collect_phase(&self, cycle: usize, options: &EnvOptions) -> CollectStats {
        let deadline = self.config.cycle_time_limit.map(|d| Instant::now() + d);
        let epsilon = self.agent.epsilon();
        let agent = &self.agent;
        let buffer = &self.buffer;
        let config = &self.config;
        let seed_base = self.seed_base;

        let (job_tx, job_rx) = crossbeam_channel::unbounded::<usize>();
        for game in 0..config.games_per_cycle {
            job_tx.send(game).expect("job channel open");
        }
        drop(job_tx);
        let (report_tx, report_rx) = crossbeam_channel::unbounded::<GameReport>();

        std::thread::scope(|scope| {
            for worker in 0..config.max_concurrent_games {
                let job_rx = job_rx.clone();
                let report_tx = report_tx.clone();
                scope.spawn(move || {
                    let mut rng =
                        ChaCha8Rng::seed_from_u64(worker_seed(seed_base, cycle, worker));
                    while let Ok(game) = job_rx.recv() {
                        let agent_color = if game % 2 == 0 {
                            Color::White
                        } else {
                            Color::Black
                        };
                        let outcome = play_episode(
                            agent,
                            &config.train_opponent,
                            agent_color,
                            options,
                            epsilon,
                            &mut rng,
                            deadline,
                        );
                        let report = match outcome {
                            EpisodeOutcome::Finished(record) => {
                                let experiences = record.experiences.len();
                                let mut locked = buffer.lock();
                                for experience in record.experiences {
                                    locked.add(experience);
                                }
                                drop(locked);
                                GameReport {
                                    finished: true,
                                    experiences,
                                    plies: record.plies,
                                    reward: record.reward_sum,
                                }
                            }
                            EpisodeOutcome::DeadlineAborted => {
                                warn!(cycle, game, "cycle deadline hit; game discarded");
                                GameReport {
                                    finished: false,
                                    experiences: 0,
                                    plies: 0,
                                    reward: 0.0,
                                }
                            }
                            EpisodeOutcome::Failed => {
                                warn!(cycle, game, "game errored; its experiences discarded");
                                GameReport {
                                    finished: false,
                                    experiences: 0,
                                    plies: 0,
                                    reward: 0.0,
                                }
                            }
                        };
                        let _ = report_tx.send(report);
                    }
                });
            }
            drop(report_tx);
        });

        let mut stats = CollectStats::default();
        for report in report_rx.try_iter() {
            if report.finished {
                stats.finished += 1;
                stats.experiences += report.experiences;
                stats.plies += report.plies;
                stats.reward_sum += report.reward;
            } else {
                stats.aborted += 1;
            }
        }
        stats
    }

    /// Draw and train batches until the per-cycle cap, or until the buffer
    /// cannot fill one.
    fn train_phase(&mut self, rng: &mut ChaCha8Rng) -> Result<TrainStats, TrainingError> {
        let mut stats = TrainStats::default();

        while stats.batches < self.config.max_batches_per_cycle {
            let batch = {
                let mut buffer = self.buffer.lock();
                if buffer.len() < self.config.batch_size {
                    break;
                }
                buffer.sample(self.config.batch_size, rng)
            };

            let report = self.agent.train_batch(&batch)?;
            stats.batches += 1;

            if report.loss.is_finite() {
                self.buffer
                    .lock()
                    .update_priorities(&batch.indices, &report.td_errors);
                stats.trained += 1;
                stats.loss_sum += report.loss;
                stats.grad_sum += report.gradient_norm;
                stats.entropy_sum += report.policy_entropy;
            }

            if stats.batches % self.config.log_interval == 0 {
                debug!(
                    batches = stats.batches,
                    loss = report.loss,
                    "train phase progress"
                );
            }
        }

        Ok(stats)
    }

    fn log_cycle(
        &self,
        cycle: usize,
        collect: &CollectStats,
        train: &TrainStats,
        eval: Option<&EvalSummary>,
    ) {
        let games = collect.finished.max(1) as f64;
        let trained = train.trained.max(1) as f64;
        let buffer_fill = {
            let buffer = self.buffer.lock();
            buffer.len() as f64 / buffer.capacity() as f64
        };

        info!(
            cycle,
            games = collect.finished,
            aborted = collect.aborted,
            avg_reward = collect.reward_sum / games,
            avg_length = collect.plies as f64 / games,
            batches = train.batches,
            avg_loss = train.loss_sum / trained,
            avg_gradient_norm = train.grad_sum / trained,
            avg_entropy = train.entropy_sum / trained,
            buffer_fill,
            epsilon = self.agent.epsilon(),
            eval_wins = eval.map(|e| e.wins),
            eval_draws = eval.map(|e| e.draws),
            eval_losses = eval.map(|e| e.losses),
            eval_avg_length = eval.map(|e| e.average_length),
            "cycle complete"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn tiny_config(dir: &str, seed: u64) -> TrainingConfig {
        let mut config = TrainingConfig::default();
        config.hidden_layers = vec![4];
        config.seed = Some(seed);
        config.games_per_cycle = 2;
        config.max_cycles = 2;
        config.max_concurrent_games = 1;
        config.max_steps_per_game = 20;
        config.batch_size = 8;
        config.max_experience_buffer = 64;
        config.max_batches_per_cycle = 2;
        config.evaluation_games = 2;
        config.checkpoint_interval = 1;
        config.checkpoint_max_versions = 3;
        config.cycle_time_limit = None;
        config.checkpoint_directory = std::env::temp_dir()
            .join("chess-rl-orchestrator-tests")
            .join(dir);
        let _ = std::fs::remove_dir_all(&config.checkpoint_directory);
        config
    }

    fn final_checkpoint(config: &TrainingConfig, summary: &RunSummary) -> PathBuf {
        config
            .checkpoint_directory
            .join(format!("checkpoint-cycle-{:06}.json", summary.cycles))
    }

    #[test]
    fn rejects_invalid_configuration() {
        let mut config = tiny_config("invalid", 0);
        config.gamma = 2.0;
        assert!(Orchestrator::new(config).is_err());
    }

    #[test]
    fn runs_cycles_and_checkpoints() {
        let config = tiny_config("runs", 7);
        let mut orchestrator = Orchestrator::new(config.clone()).unwrap();
        let stop = AtomicBool::new(false);

        let summary = orchestrator.run(&stop).unwrap();
        assert_eq!(summary.cycles, 2);
        assert_eq!(summary.games, 4);
        assert!(summary.experiences > 0);
        assert!(final_checkpoint(&config, &summary).exists());
        assert!(summary.final_epsilon < config.exploration_rate);
    }

    #[test]
    fn stop_signal_exits_before_the_first_cycle() {
        let config = tiny_config("stopped", 8);
        let mut orchestrator = Orchestrator::new(config.clone()).unwrap();
        let stop = AtomicBool::new(true);

        let summary = orchestrator.run(&stop).unwrap();
        assert_eq!(summary.cycles, 0);
        assert_eq!(summary.games, 0);
    }

    #[test]
    fn seeded_single_worker_runs_are_bit_identical() {
        let config_a = tiny_config("det-a", 99);
        let config_b = tiny_config("det-b", 99);

        let stop = AtomicBool::new(false);
        let mut a = Orchestrator::new(config_a.clone()).unwrap();
        let summary_a = a.run(&stop).unwrap();
        let mut b = Orchestrator::new(config_b.clone()).unwrap();
        let summary_b = b.run(&stop).unwrap();

        assert_eq!(summary_a, summary_b);
        let bytes_a = std::fs::read(final_checkpoint(&config_a, &summary_a)).unwrap();
        let bytes_b = std::fs::read(final_checkpoint(&config_b, &summary_b)).unwrap();
        assert_eq!(bytes_a, bytes_b, "deterministic runs must write identical checkpoints");
    }

    #[test]
    fn prioritized_replay_runs_end_to_end() {
        let mut config = tiny_config("prioritized", 11);
        config.replay_type = ReplayType::Prioritized;
        config.max_cycles = 1;
        let mut orchestrator = Orchestrator::new(config).unwrap();
        let stop = AtomicBool::new(false);
        let summary = orchestrator.run(&stop).unwrap();
        assert_eq!(summary.cycles, 1);
    }
}
