//! Deep Q-learning over the 4096-action space.
//!
//! The agent owns the online network Q and its lagged target copy Q̂.
//! Action selection is ε-greedy restricted to an `ActionMask`; the argmax
//! scans only set bits and breaks ties toward the lowest action index.
//! Every `target_update_frequency` training steps the target snapshots the
//! online parameters (after the step, so the copy includes it).

use std::path::Path;

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use thiserror::Error;
use tracing::warn;

use crate::config::TrainingConfig;
use crate::encoding::ActionMask;
use crate::network::{NetworkError, NeuralNetwork};
use crate::replay::SampledBatch;

#[derive(Error, Debug)]
pub enum TrainingError {
    #[error("{count} consecutive non-finite training updates")]
    NumericInstability { count: u32 },
    #[error(transparent)]
    Network(#[from] NetworkError),
}

/// Metrics of one training step. `td_errors` feed prioritized replay.
#[derive(Clone, Debug)]
pub struct TrainReport {
    pub loss: f64,
    pub gradient_norm: f64,
    pub policy_entropy: f64,
    pub td_errors: Vec<f64>,
}

pub struct DqnAgent {
    q: NeuralNetwork,
    target: NeuralNetwork,
    gamma: f64,
    double_dqn: bool,
    target_update_frequency: u64,
    train_steps: u64,
    epsilon: f64,
    epsilon_min: f64,
    epsilon_decay: f64,
    max_numeric_failures: u32,
    consecutive_numeric_failures: u32,
}

impl DqnAgent {
    pub fn new(config: &TrainingConfig) -> Self {
        let spec = config.network_spec();
        let q = NeuralNetwork::new(&spec);
        let mut target = NeuralNetwork::new(&spec);
        q.copy_weights_to(&mut target);

        DqnAgent {
            q,
            target,
            gamma: config.gamma,
            double_dqn: config.double_dqn,
            target_update_frequency: config.target_update_frequency,
            train_steps: 0,
            epsilon: config.exploration_rate,
            epsilon_min: config.exploration_min,
            epsilon_decay: config.exploration_decay,
            max_numeric_failures: config.max_numeric_failures,
            consecutive_numeric_failures: 0,
        }
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    pub fn train_steps(&self) -> u64 {
        self.train_steps
    }

    /// Multiplicative ε decay toward the floor, applied by the orchestrator
    /// at cycle boundaries.
    pub fn decay_epsilon(&mut self) {
        self.epsilon = (self.epsilon * self.epsilon_decay).max(self.epsilon_min);
    }

    /// ε-greedy action selection over the legal-action mask. Returns `None`
    /// when the mask is empty (terminal position; callers should not ask).
    pub fn select_action(
        &self,
        state: &[f64],
        valid: &ActionMask,
        epsilon: f64,
        rng: &mut ChaCha8Rng,
    ) -> Option<u16> {
        let count = valid.count();
        if count == 0 {
            return None;
        }

        if epsilon > 0.0 && rng.gen::<f64>() < epsilon {
            let pick = rng.gen_range(0..count);
            return valid.iter().nth(pick);
        }

        let q_values = self.q.forward(state);
        let mut best: Option<(u16, f64)> = None;
        for action in valid.iter() {
            let value = q_values[action as usize];
            // Strict comparison keeps the lowest index on ties.
            if best.map(|(_, b)| value > b).unwrap_or(true) {
                best = Some((action, value));
            }
        }
        best.map(|(a, _)| a)
    }

    /// Q-values restricted to the legal actions.
    pub fn action_values(&self, state: &[f64], valid: &ActionMask) -> Vec<(u16, f64)> {
        let q_values = self.q.forward(state);
        valid
            .iter()
            .map(|a| (a, q_values[a as usize]))
            .collect()
    }

    fn bootstrap_value(&self, experience_next: &[f64], next_actions: &ActionMask) -> f64 {
        if next_actions.is_empty() {
            return 0.0;
        }
        let target_values = self.target.forward(experience_next);
        if self.double_dqn {
            // Online network chooses the action, target network prices it.
            let online_values = self.q.forward(experience_next);
            let mut best: Option<(u16, f64)> = None;
            for a in next_actions.iter() {
                let v = online_values[a as usize];
                if best.map(|(_, b)| v > b).unwrap_or(true) {
                    best = Some((a, v));
                }
            }
            best.map(|(a, _)| target_values[a as usize]).unwrap_or(0.0)
        } else {
            next_actions
                .iter()
                .map(|a| target_values[a as usize])
                .fold(f64::NEG_INFINITY, f64::max)
        }
    }

    fn softmax_entropy(values: &[f64]) -> f64 {
        let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        if !max.is_finite() {
            return 0.0;
        }
        let exps: Vec<f64> = values.iter().map(|v| (v - max).exp()).collect();
        let sum: f64 = exps.iter().sum();
        let mut entropy = 0.0;
        for e in &exps {
            let p = e / sum;
            if p > 0.0 {
                entropy -= p * p.ln();
            }
        }
        entropy
    }

    /// One Q-update on a sampled batch.
    ///
    /// Targets follow the Bellman rule: `y = r` when done, otherwise
    /// `r + γ·V̂(s')` with `V̂` maximized over the successor's legal actions
    /// (Double DQN selects that action with the online network). The target
    /// vector equals the online prediction except at the taken action, so
    /// gradient flows only there. Importance weights are folded into the
    /// target so each sample's gradient is scaled without a weighted-loss
    /// API on the network.
    pub fn train_batch(&mut self, batch: &SampledBatch) -> Result<TrainReport, TrainingError> {
        assert!(!batch.is_empty());

        let mut inputs = Vec::with_capacity(batch.len());
        let mut targets = Vec::with_capacity(batch.len());
        let mut td_errors = Vec::with_capacity(batch.len());
        let mut entropy_sum = 0.0;
        let mut targets_finite = true;

        for (experience, weight) in batch.experiences.iter().zip(&batch.weights) {
            let prediction = self.q.forward(&experience.state);
            entropy_sum += Self::softmax_entropy(&prediction);

            let y = if experience.done {
                experience.reward
            } else {
                experience.reward
                    + self.gamma
                        * self.bootstrap_value(&experience.next_state, &experience.next_actions)
            };
            if !y.is_finite() {
                targets_finite = false;
            }

            let action = experience.action as usize;
            let td = y - prediction[action];
            td_errors.push(td);

            let mut target = prediction;
            target[action] += weight * td;
            inputs.push(experience.state.clone());
            targets.push(target);
        }

        let policy_entropy = entropy_sum / batch.len() as f64;

        if !targets_finite {
            return self.record_numeric_failure(f64::NAN, policy_entropy, td_errors);
        }

        let loss = self.q.train_batch(&inputs, &targets);
        let gradient_norm = self.q.last_gradient_norm();

        if !loss.is_finite() || !gradient_norm.is_finite() {
            return self.record_numeric_failure(loss, policy_entropy, td_errors);
        }

        self.consecutive_numeric_failures = 0;
        self.train_steps += 1;
        if self.train_steps % self.target_update_frequency == 0 {
            self.q.copy_weights_to(&mut self.target);
        }

        Ok(TrainReport {
            loss,
            gradient_norm,
            policy_entropy,
            td_errors,
        })
    }

    fn record_numeric_failure(
        &mut self,
        loss: f64,
        policy_entropy: f64,
        td_errors: Vec<f64>,
    ) -> Result<TrainReport, TrainingError> {
        self.consecutive_numeric_failures += 1;
        warn!(
            consecutive = self.consecutive_numeric_failures,
            "non-finite training update"
        );
        if self.consecutive_numeric_failures > self.max_numeric_failures {
            return Err(TrainingError::NumericInstability {
                count: self.consecutive_numeric_failures,
            });
        }
        Ok(TrainReport {
            loss,
            gradient_norm: f64::NAN,
            policy_entropy,
            td_errors,
        })
    }

    /// Synchronize the target network immediately, regardless of the step
    /// counter.
    pub fn force_update(&mut self) {
        self.q.copy_weights_to(&mut self.target);
    }

    pub fn network(&self) -> &NeuralNetwork {
        &self.q
    }

    pub fn target_network(&self) -> &NeuralNetwork {
        &self.target
    }

    pub fn save(&self, path: &Path) -> Result<(), NetworkError> {
        self.q.save(path)
    }

    /// Load a checkpoint into the online network (refusing a mismatched
    /// architecture) and resynchronize the target.
    pub fn load(&mut self, path: &Path) -> Result<(), NetworkError> {
        let loaded = NeuralNetwork::load(path)?;
        self.q.check_compatible(&loaded.manifest())?;
        self.q = loaded;
        self.force_update();
        Ok(())
    }
}
