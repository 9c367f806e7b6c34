//! Experience replay: a bounded ring of transitions sampled for training.
//!
//! Two sampling strategies share the ring. Uniform draws distinct indices;
//! prioritized draws proportionally to `(priority + ε)^α` with importance
//! weights annealed by β toward full correction.

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::encoding::ActionMask;

/// One (s, a, r, s', done) transition, plus the legal-action mask of the
/// successor position: the Q-update bootstraps over legal next actions only,
/// and relegalizing from the raw feature vector is not possible.
#[derive(Clone, Debug)]
pub struct Experience {
    pub state: Vec<f64>,
    pub action: u16,
    pub reward: f64,
    pub next_state: Vec<f64>,
    pub next_actions: ActionMask,
    pub done: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub enum ReplayType {
    Uniform,
    Prioritized,
}

/// A sampled batch. `indices` address the ring so prioritized callers can
/// write back updated priorities; `weights` are the importance-sampling
/// corrections (all 1.0 under uniform sampling).
#[derive(Clone, Debug)]
pub struct SampledBatch {
    pub indices: Vec<usize>,
    pub experiences: Vec<Experience>,
    pub weights: Vec<f64>,
}

impl SampledBatch {
    pub fn len(&self) -> usize {
        self.experiences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.experiences.is_empty()
    }
}

enum Strategy {
    Uniform,
    Prioritized {
        alpha: f64,
        beta: f64,
        beta_increment: f64,
        epsilon: f64,
        priorities: Vec<f64>,
        max_priority: f64,
    },
}

pub struct ReplayBuffer {
    capacity: usize,
    items: Vec<Experience>,
    /// Next ring write position once the buffer is full.
    write: usize,
    strategy: Strategy,
}

impl ReplayBuffer {
    pub fn uniform(capacity: usize) -> Self {
        ReplayBuffer {
            capacity,
            items: Vec::with_capacity(capacity),
            write: 0,
            strategy: Strategy::Uniform,
        }
    }

    pub fn prioritized(
        capacity: usize,
        alpha: f64,
        beta: f64,
        beta_increment: f64,
        epsilon: f64,
    ) -> Self {
        ReplayBuffer {
            capacity,
            items: Vec::with_capacity(capacity),
            write: 0,
            strategy: Strategy::Prioritized {
                alpha,
                beta,
                beta_increment,
                epsilon,
                priorities: Vec::with_capacity(capacity),
                max_priority: 1.0,
            },
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.items.len() == self.capacity
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.write = 0;
        if let Strategy::Prioritized {
            priorities,
            max_priority,
            ..
        } = &mut self.strategy
        {
            priorities.clear();
            *max_priority = 1.0;
        }
    }

    /// O(1) append; overwrites the oldest entry when full. A fresh item
    /// enters at the running maximum priority so it is sampled at least
    /// once before its TD error is known.
    pub fn add(&mut self, experience: Experience) {
        let priority = match &self.strategy {
            Strategy::Uniform => 0.0,
            Strategy::Prioritized { max_priority, .. } => *max_priority,
        };

        if self.items.len() < self.capacity {
            self.items.push(experience);
            if let Strategy::Prioritized { priorities, .. } = &mut self.strategy {
                priorities.push(priority);
            }
        } else {
            self.items[self.write] = experience;
            if let Strategy::Prioritized { priorities, .. } = &mut self.strategy {
                priorities[self.write] = priority;
            }
            self.write = (self.write + 1) % self.capacity;
        }
    }

    /// Draw a batch of up to `k` transitions. Uniform sampling picks
    /// distinct indices (all of them when `k ≥ len`); prioritized sampling
    /// draws with replacement proportionally to priority and anneals β one
    /// increment toward 1.
    pub fn sample(&mut self, k: usize, rng: &mut ChaCha8Rng) -> SampledBatch {
        let n = self.items.len();
        if n == 0 {
            return SampledBatch {
                indices: Vec::new(),
                experiences: Vec::new(),
                weights: Vec::new(),
            };
        }

        match &mut self.strategy {
            Strategy::Uniform => {
                let indices: Vec<usize> = if k >= n {
                    (0..n).collect()
                } else {
                    rand::seq::index::sample(rng, n, k).into_vec()
                };
                let experiences = indices.iter().map(|&i| self.items[i].clone()).collect();
                let weights = vec![1.0; indices.len()];
                SampledBatch {
                    indices,
                    experiences,
                    weights,
                }
            }
            Strategy::Prioritized {
                alpha,
                beta,
                beta_increment,
                epsilon,
                priorities,
                ..
            } => {
                // Floor keeps the distribution total strictly positive even
                // with a zero ε and all-zero priorities.
                let scaled: Vec<f64> = priorities[..n]
                    .iter()
                    .map(|p| (p + *epsilon).powf(*alpha).max(f64::MIN_POSITIVE))
                    .collect();
                let total: f64 = scaled.iter().sum();

                let k = k.min(n).max(1);
                let mut indices = Vec::with_capacity(k);
                for _ in 0..k {
                    let mut target = rng.gen_range(0.0..total);
                    let mut chosen = n - 1;
                    for (i, p) in scaled.iter().enumerate() {
                        if target < *p {
                            chosen = i;
                            break;
                        }
                        target -= p;
                    }
                    indices.push(chosen);
                }

                let b = *beta;
                let mut weights: Vec<f64> = indices
                    .iter()
                    .map(|&i| {
                        let prob = scaled[i] / total;
                        (n as f64 * prob).powf(-b)
                    })
                    .collect();
                let max_w = weights.iter().cloned().fold(f64::MIN, f64::max).max(1e-12);
                for w in weights.iter_mut() {
                    *w /= max_w;
                }

                *beta = (*beta + *beta_increment).min(1.0);

                let experiences = indices.iter().map(|&i| self.items[i].clone()).collect();
                SampledBatch {
                    indices,
                    experiences,
                    weights,
                }
            }
        }
    }

    /// Write back `|td| + ε` for the sampled indices. A no-op under uniform
    /// sampling.
    pub fn update_priorities(&mut self, indices: &[usize], td_errors: &[f64]) {
        if let Strategy::Prioritized {
            epsilon,
            priorities,
            max_priority,
            ..
        } = &mut self.strategy
        {
            for (&i, td) in indices.iter().zip(td_errors) {
                if i < priorities.len() && td.is_finite() {
                    let p = td.abs() + *epsilon;
                    priorities[i] = p;
                    if p > *max_priority {
                        *max_priority = p;
                    }
                }
            }
        }
    }
}
