//! First-order optimizers as a tagged sum type. One instance owns the state
//! for every parameter tensor of its network; tensors are addressed by slot
//! (weights then biases, layer by layer) and state is sized lazily on first
//! use so construction needs no shape bookkeeping.

use serde::{Deserialize, Serialize};

/// Optimizer choice plus its hyperparameters, without state. Lives in the
/// training configuration.
#[derive(Clone, Copy, PartialEq, Serialize, Deserialize, Debug)]
pub enum OptimizerKind {
    Sgd { momentum: f64 },
    Adam { beta1: f64, beta2: f64, epsilon: f64 },
    RmsProp { decay: f64, epsilon: f64 },
}

impl OptimizerKind {
    /// Adam with the customary defaults.
    pub fn adam() -> Self {
        OptimizerKind::Adam {
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
        }
    }
}

#[derive(Clone, Serialize, Deserialize, Debug)]
pub enum Optimizer {
    Sgd {
        learning_rate: f64,
        momentum: f64,
        velocity: Vec<Vec<f64>>,
    },
    Adam {
        learning_rate: f64,
        beta1: f64,
        beta2: f64,
        epsilon: f64,
        step: u64,
        first_moment: Vec<Vec<f64>>,
        second_moment: Vec<Vec<f64>>,
    },
    RmsProp {
        learning_rate: f64,
        decay: f64,
        epsilon: f64,
        cache: Vec<Vec<f64>>,
    },
}

fn slot_state(states: &mut Vec<Vec<f64>>, slot: usize, len: usize) -> &mut Vec<f64> {
    if states.len() <= slot {
        states.resize(slot + 1, Vec::new());
    }
    let state = &mut states[slot];
    if state.len() != len {
        *state = vec![0.0; len];
    }
    state
}

impl Optimizer {
    pub fn new(kind: OptimizerKind, learning_rate: f64) -> Self {
        match kind {
            OptimizerKind::Sgd { momentum } => Optimizer::Sgd {
                learning_rate,
                momentum,
                velocity: Vec::new(),
            },
            OptimizerKind::Adam {
                beta1,
                beta2,
                epsilon,
            } => Optimizer::Adam {
                learning_rate,
                beta1,
                beta2,
                epsilon,
                step: 0,
                first_moment: Vec::new(),
                second_moment: Vec::new(),
            },
            OptimizerKind::RmsProp { decay, epsilon } => Optimizer::RmsProp {
                learning_rate,
                decay,
                epsilon,
                cache: Vec::new(),
            },
        }
    }

    /// Called once per batch, before the per-slot updates. Advances Adam's
    /// bias-correction step counter.
    pub fn begin_step(&mut self) {
        if let Optimizer::Adam { step, .. } = self {
            *step += 1;
        }
    }

    /// Apply one update to the parameter tensor in `slot`.
    pub fn update(&mut self, slot: usize, params: &mut [f64], grads: &[f64]) {
        debug_assert_eq!(params.len(), grads.len());
        match self {
            Optimizer::Sgd {
                learning_rate,
                momentum,
                velocity,
            } => {
                let v = slot_state(velocity, slot, params.len());
                for i in 0..params.len() {
                    v[i] = *momentum * v[i] - *learning_rate * grads[i];
                    params[i] += v[i];
                }
            }
            Optimizer::Adam {
                learning_rate,
                beta1,
                beta2,
                epsilon,
                step,
                first_moment,
                second_moment,
            } => {
                let t = (*step).max(1) as f64;
                let (b1, b2, lr, eps) = (*beta1, *beta2, *learning_rate, *epsilon);
                let m = slot_state(first_moment, slot, params.len());
                let v = slot_state(second_moment, slot, params.len());
                for i in 0..params.len() {
                    m[i] = b1 * m[i] + (1.0 - b1) * grads[i];
                    v[i] = b2 * v[i] + (1.0 - b2) * grads[i] * grads[i];
                    let m_hat = m[i] / (1.0 - b1.powf(t));
                    let v_hat = v[i] / (1.0 - b2.powf(t));
                    params[i] -= lr * m_hat / (v_hat.sqrt() + eps);
                }
            }
            Optimizer::RmsProp {
                learning_rate,
                decay,
                epsilon,
                cache,
            } => {
                let (d, lr, eps) = (*decay, *learning_rate, *epsilon);
                let c = slot_state(cache, slot, params.len());
                for i in 0..params.len() {
                    c[i] = d * c[i] + (1.0 - d) * grads[i] * grads[i];
                    params[i] -= lr * grads[i] / (c[i].sqrt() + eps);
                }
            }
        }
    }

}
