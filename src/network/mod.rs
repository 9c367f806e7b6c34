//! A small dense neural network with hand-rolled backpropagation.
//!
//! The Q-function for a 4096-action space does not need convolutions or a
//! GPU; it needs a deterministic, dependency-light backend whose forward
//! pass is a pure function of its weights. Layers are fully connected with
//! ReLU activations inside and a linear output.

pub mod activation;
pub mod loss;
pub mod optimizer;

pub use activation::Activation;
pub use loss::Loss;
pub use optimizer::{Optimizer, OptimizerKind};

use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// File-format tag written into every checkpoint manifest.
const BACKEND_TAG: &str = "dense-f64";
const FORMAT_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("checkpoint I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("checkpoint is not valid JSON: {0}")]
    Format(#[from] serde_json::Error),
    #[error("checkpoint architecture mismatch: expected {expected}, found {found}")]
    ArchitectureMismatch { expected: String, found: String },
}

/// Weight initialization scheme. He and Xavier are used in their
/// uniform-bound forms so a single uniform sampler covers all three.
#[derive(Clone, Copy, PartialEq, Serialize, Deserialize, Debug)]
pub enum WeightInit {
    He,
    Xavier,
    Uniform { limit: f64 },
}

impl WeightInit {
    fn limit(&self, fan_in: usize, fan_out: usize) -> f64 {
        match self {
            WeightInit::He => (6.0 / fan_in as f64).sqrt(),
            WeightInit::Xavier => (6.0 / (fan_in + fan_out) as f64).sqrt(),
            WeightInit::Uniform { limit } => *limit,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Serialize, Deserialize, Debug)]
pub enum GradientClip {
    /// Scale the whole gradient so its L2 norm does not exceed the bound.
    GlobalNorm(f64),
    /// Clamp each gradient element into [-bound, bound].
    Value(f64),
}

/// Everything needed to build a network. Assembled by the training config.
#[derive(Clone, PartialEq, Serialize, Deserialize, Debug)]
pub struct NetworkSpec {
    pub input_size: usize,
    pub hidden_layers: Vec<usize>,
    pub output_size: usize,
    pub loss: Loss,
    pub optimizer: OptimizerKind,
    pub learning_rate: f64,
    pub weight_decay: f64,
    pub gradient_clip: Option<GradientClip>,
    pub weight_init: WeightInit,
    pub seed: Option<u64>,
}

#[derive(Clone, Serialize, Deserialize, Debug)]
struct DenseLayer {
    in_size: usize,
    out_size: usize,
    /// Row-major: weights[j * in_size + i] connects input i to output j.
    weights: Vec<f64>,
    biases: Vec<f64>,
    activation: Activation,
}

impl DenseLayer {
    fn init(
        in_size: usize,
        out_size: usize,
        activation: Activation,
        weight_init: WeightInit,
        rng: &mut ChaCha8Rng,
    ) -> Self {
        let limit = weight_init.limit(in_size, out_size);
        let weights = (0..in_size * out_size)
            .map(|_| rng.gen_range(-limit..=limit))
            .collect();
        DenseLayer {
            in_size,
            out_size,
            weights,
            biases: vec![0.0; out_size],
            activation,
        }
    }

    /// Pre-activation values W·x + b.
    fn affine(&self, input: &[f64]) -> Vec<f64> {
        let mut out = self.biases.clone();
        for (j, out_j) in out.iter_mut().enumerate() {
            let row = &self.weights[j * self.in_size..(j + 1) * self.in_size];
            let mut sum = 0.0;
            for (w, x) in row.iter().zip(input) {
                sum += w * x;
            }
            *out_j += sum;
        }
        out
    }

    fn forward(&self, input: &[f64]) -> Vec<f64> {
        let mut z = self.affine(input);
        for v in z.iter_mut() {
            *v = self.activation.apply(*v);
        }
        z
    }
}

/// Serialized checkpoint: manifest first so readers can refuse early.
#[derive(Serialize, Deserialize)]
struct CheckpointFile {
    manifest: CheckpointManifest,
    loss: Loss,
    weight_decay: f64,
    gradient_clip: Option<GradientClip>,
    created_at_unix: u64,
    layers: Vec<DenseLayer>,
    optimizer: Optimizer,
}

/// Self-describing header of a checkpoint. Architecture fields let a loader
/// refuse a file that does not match its own network shape.
#[derive(Clone, PartialEq, Serialize, Deserialize, Debug)]
pub struct CheckpointManifest {
    pub backend: String,
    pub format_version: u32,
    pub input_size: usize,
    pub output_size: usize,
    pub hidden_layers: Vec<usize>,
    pub parameter_count: usize,
    pub created_at_unix: u64,
}

impl CheckpointManifest {
    fn architecture_string(&self) -> String {
        format!(
            "{}x{:?}x{} ({})",
            self.input_size, self.hidden_layers, self.output_size, self.backend
        )
    }
}

#[derive(Clone, Debug)]
pub struct NeuralNetwork {
    layers: Vec<DenseLayer>,
    loss: Loss,
    optimizer: Optimizer,
    weight_decay: f64,
    gradient_clip: Option<GradientClip>,
    last_gradient_norm: f64,
    created_at_unix: u64,
}

impl NeuralNetwork {
    /// Build a network from a spec. With a seed the weights (and therefore
    /// every forward pass) are reproducible and the manifest timestamp is
    /// pinned to zero so identical runs write identical checkpoints.
    pub fn new(spec: &NetworkSpec) -> Self {
        let mut rng = match spec.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };

        let mut sizes = vec![spec.input_size];
        sizes.extend(&spec.hidden_layers);
        sizes.push(spec.output_size);

        let mut layers = Vec::with_capacity(sizes.len() - 1);
        for w in sizes.windows(2) {
            let is_output = layers.len() == sizes.len() - 2;
            let activation = if is_output {
                Activation::Linear
            } else {
                Activation::Relu
            };
            layers.push(DenseLayer::init(
                w[0],
                w[1],
                activation,
                spec.weight_init,
                &mut rng,
            ));
        }

        let created_at_unix = if spec.seed.is_some() {
            0
        } else {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0)
        };

        NeuralNetwork {
            layers,
            loss: spec.loss,
            optimizer: Optimizer::new(spec.optimizer, spec.learning_rate),
            weight_decay: spec.weight_decay,
            gradient_clip: spec.gradient_clip,
            last_gradient_norm: 0.0,
            created_at_unix,
        }
    }

    pub fn input_size(&self) -> usize {
        self.layers.first().map(|l| l.in_size).unwrap_or(0)
    }

    pub fn output_size(&self) -> usize {
        self.layers.last().map(|l| l.out_size).unwrap_or(0)
    }

    pub fn hidden_sizes(&self) -> Vec<usize> {
        self.layers[..self.layers.len().saturating_sub(1)]
            .iter()
            .map(|l| l.out_size)
            .collect()
    }

    pub fn parameter_count(&self) -> usize {
        self.layers
            .iter()
            .map(|l| l.weights.len() + l.biases.len())
            .sum()
    }

    /// Pure function of the current parameters.
    pub fn forward(&self, input: &[f64]) -> Vec<f64> {
        debug_assert_eq!(input.len(), self.input_size());
        let mut a = input.to_vec();
        for layer in &self.layers {
            a = layer.forward(&a);
        }
        a
    }

    /// One optimizer step on a batch of (input, target) pairs.
    ///
    /// The returned loss is summed over output coordinates and averaged
    /// over the batch; for Q-update targets (which differ from the
    /// prediction only at the taken action) it is the mean per-sample
    /// TD loss. The global gradient norm measured before clipping is
    /// available from `last_gradient_norm`.
    pub fn train_batch(&mut self, inputs: &[Vec<f64>], targets: &[Vec<f64>]) -> f64 {
        assert_eq!(inputs.len(), targets.len());
        assert!(!inputs.is_empty());
        let batch = inputs.len() as f64;

        let mut weight_grads: Vec<Vec<f64>> = self
            .layers
            .iter()
            .map(|l| vec![0.0; l.weights.len()])
            .collect();
        let mut bias_grads: Vec<Vec<f64>> = self
            .layers
            .iter()
            .map(|l| vec![0.0; l.biases.len()])
            .collect();
        let mut total_loss = 0.0;

        for (input, target) in inputs.iter().zip(targets) {
            // Forward pass keeping each layer's pre-activation and output.
            let mut pre_activations = Vec::with_capacity(self.layers.len());
            let mut outputs: Vec<Vec<f64>> = Vec::with_capacity(self.layers.len() + 1);
            outputs.push(input.clone());
            for layer in &self.layers {
                let z = layer.affine(outputs.last().expect("at least the input"));
                let a = z.iter().map(|&v| layer.activation.apply(v)).collect();
                pre_activations.push(z);
                outputs.push(a);
            }

            let prediction = outputs.last().expect("output layer");
            for (p, t) in prediction.iter().zip(target) {
                total_loss += self.loss.value(*p, *t);
            }

            // Backward pass: delta starts as dL/dz at the output layer and
            // is pulled through each layer in turn.
            let last = self.layers.len() - 1;
            let mut delta: Vec<f64> = prediction
                .iter()
                .zip(target)
                .enumerate()
                .map(|(i, (p, t))| {
                    self.loss.derivative(*p, *t)
                        * self.layers[last].activation.derivative(pre_activations[last][i])
                })
                .collect();

            for l in (0..self.layers.len()).rev() {
                let a_prev = &outputs[l];
                let layer = &self.layers[l];
                for j in 0..layer.out_size {
                    let row = &mut weight_grads[l][j * layer.in_size..(j + 1) * layer.in_size];
                    for (g, x) in row.iter_mut().zip(a_prev) {
                        *g += delta[j] * x;
                    }
                    bias_grads[l][j] += delta[j];
                }

                if l > 0 {
                    let below = &self.layers[l - 1];
                    let mut next_delta = vec![0.0; layer.in_size];
                    for j in 0..layer.out_size {
                        let row = &layer.weights[j * layer.in_size..(j + 1) * layer.in_size];
                        for (nd, w) in next_delta.iter_mut().zip(row) {
                            *nd += w * delta[j];
                        }
                    }
                    for (i, nd) in next_delta.iter_mut().enumerate() {
                        *nd *= below.activation.derivative(pre_activations[l - 1][i]);
                    }
                    delta = next_delta;
                }
            }
        }

        // Batch mean, then L2 weight decay on the weight tensors.
        for l in 0..self.layers.len() {
            for (g, w) in weight_grads[l].iter_mut().zip(&self.layers[l].weights) {
                *g = *g / batch + self.weight_decay * w;
            }
            for g in bias_grads[l].iter_mut() {
                *g /= batch;
            }
        }

        let squared_sum: f64 = weight_grads
            .iter()
            .chain(bias_grads.iter())
            .flat_map(|g| g.iter())
            .map(|g| g * g)
            .sum();
        self.last_gradient_norm = squared_sum.sqrt();

        match self.gradient_clip {
            Some(GradientClip::GlobalNorm(bound)) if self.last_gradient_norm > bound => {
                let scale = bound / self.last_gradient_norm;
                for g in weight_grads.iter_mut().chain(bias_grads.iter_mut()) {
                    for v in g.iter_mut() {
                        *v *= scale;
                    }
                }
            }
            Some(GradientClip::Value(bound)) => {
                for g in weight_grads.iter_mut().chain(bias_grads.iter_mut()) {
                    for v in g.iter_mut() {
                        *v = v.clamp(-bound, bound);
                    }
                }
            }
            _ => {}
        }

        self.optimizer.begin_step();
        for (l, layer) in self.layers.iter_mut().enumerate() {
            self.optimizer.update(2 * l, &mut layer.weights, &weight_grads[l]);
            self.optimizer
                .update(2 * l + 1, &mut layer.biases, &bias_grads[l]);
        }

        total_loss / batch
    }

    pub fn last_gradient_norm(&self) -> f64 {
        self.last_gradient_norm
    }

    /// Overwrite `other`'s parameters with this network's. Both must have
    /// been built from the same spec; afterwards their forward passes are
    /// identical.
    pub fn copy_weights_to(&self, other: &mut NeuralNetwork) {
        debug_assert_eq!(self.layers.len(), other.layers.len());
        for (src, dst) in self.layers.iter().zip(other.layers.iter_mut()) {
            dst.weights.clone_from(&src.weights);
            dst.biases.clone_from(&src.biases);
        }
    }

    pub fn manifest(&self) -> CheckpointManifest {
        CheckpointManifest {
            backend: BACKEND_TAG.to_string(),
            format_version: FORMAT_VERSION,
            input_size: self.input_size(),
            output_size: self.output_size(),
            hidden_layers: self.hidden_sizes(),
            parameter_count: self.parameter_count(),
            created_at_unix: self.created_at_unix,
        }
    }

    /// Write parameters, optimizer state and manifest as JSON. Loading the
    /// file and saving it again reproduces the bytes exactly.
    pub fn save(&self, path: &Path) -> Result<(), NetworkError> {
        let file = CheckpointFile {
            manifest: self.manifest(),
            loss: self.loss,
            weight_decay: self.weight_decay,
            gradient_clip: self.gradient_clip,
            created_at_unix: self.created_at_unix,
            layers: self.layers.clone(),
            optimizer: self.optimizer.clone(),
        };
        let json = serde_json::to_string_pretty(&file)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<NeuralNetwork, NetworkError> {
        let json = fs::read_to_string(path)?;
        let file: CheckpointFile = serde_json::from_str(&json)?;

        let network = NeuralNetwork {
            layers: file.layers,
            loss: file.loss,
            optimizer: file.optimizer,
            weight_decay: file.weight_decay,
            gradient_clip: file.gradient_clip,
            last_gradient_norm: 0.0,
            created_at_unix: file.created_at_unix,
        };

        // The manifest must describe the parameters that follow it.
        let recomputed = network.manifest();
        if recomputed != file.manifest {
            return Err(NetworkError::ArchitectureMismatch {
                expected: file.manifest.architecture_string(),
                found: recomputed.architecture_string(),
            });
        }
        Ok(network)
    }

    /// Refuse a checkpoint whose manifest does not describe this network's
    /// architecture.
    pub fn check_compatible(&self, manifest: &CheckpointManifest) -> Result<(), NetworkError> {
        let own = self.manifest();
        if manifest.backend != own.backend
            || manifest.input_size != own.input_size
            || manifest.output_size != own.output_size
            || manifest.hidden_layers != own.hidden_layers
        {
            return Err(NetworkError::ArchitectureMismatch {
                expected: own.architecture_string(),
                found: manifest.architecture_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toy_spec(seed: u64) -> NetworkSpec {
        NetworkSpec {
            input_size: 4,
            hidden_layers: vec![8],
            output_size: 2,
            loss: Loss::Mse,
            optimizer: OptimizerKind::adam(),
            learning_rate: 0.01,
            weight_decay: 0.0,
            gradient_clip: None,
            weight_init: WeightInit::He,
            seed: Some(seed),
        }
    }

    fn toy_batch() -> (Vec<Vec<f64>>, Vec<Vec<f64>>) {
        // Learn [sum of first two, sum of last two].
        let inputs: Vec<Vec<f64>> = vec![
            vec![1.0, 0.0, 0.0, 1.0],
            vec![0.5, 0.5, 1.0, 0.0],
            vec![0.0, 1.0, 0.5, 0.5],
            vec![1.0, 1.0, 0.0, 0.0],
        ];
        let targets = inputs
            .iter()
            .map(|x| vec![x[0] + x[1], x[2] + x[3]])
            .collect();
        (inputs, targets)
    }

    #[test]
    fn seeded_init_is_deterministic() {
        let a = NeuralNetwork::new(&toy_spec(7));
        let b = NeuralNetwork::new(&toy_spec(7));
        let c = NeuralNetwork::new(&toy_spec(8));
        let x = [0.1, 0.2, 0.3, 0.4];
        assert_eq!(a.forward(&x), b.forward(&x));
        assert_ne!(a.forward(&x), c.forward(&x));
    }

    #[test]
    fn training_reduces_loss() {
        let mut net = NeuralNetwork::new(&toy_spec(42));
        let (inputs, targets) = toy_batch();
        let first = net.train_batch(&inputs, &targets);
        let mut last = first;
        for _ in 0..500 {
            last = net.train_batch(&inputs, &targets);
        }
        assert!(last.is_finite());
        assert!(
            last < first * 0.1,
            "loss did not drop: first {first}, last {last}"
        );
        assert!(net.last_gradient_norm() >= 0.0);
    }

    #[test]
    fn value_clipping_bounds_each_gradient_element() {
        let mut spec = toy_spec(3);
        // Plain SGD so the step size is proportional to the clipped
        // gradient (Adam would renormalize it away).
        spec.optimizer = OptimizerKind::Sgd { momentum: 0.0 };
        spec.gradient_clip = Some(GradientClip::Value(1e-12));
        let mut net = NeuralNetwork::new(&spec);
        let before = net.forward(&[1.0, 1.0, 1.0, 1.0]);
        let (inputs, targets) = toy_batch();
        net.train_batch(&inputs, &targets);
        let after = net.forward(&[1.0, 1.0, 1.0, 1.0]);
        for (b, a) in before.iter().zip(&after) {
            assert!((b - a).abs() < 1e-3, "clipped step moved output too far");
        }
    }

    #[test]
    fn global_norm_clipping_keeps_training_stable() {
        let mut spec = toy_spec(4);
        spec.gradient_clip = Some(GradientClip::GlobalNorm(0.5));
        let mut net = NeuralNetwork::new(&spec);
        let (inputs, targets) = toy_batch();
        let first = net.train_batch(&inputs, &targets);
        let mut last = first;
        for _ in 0..300 {
            last = net.train_batch(&inputs, &targets);
        }
        assert!(last < first, "first {first}, last {last}");
    }

    #[test]
    fn copy_weights_makes_forward_identical() {
        let mut a = NeuralNetwork::new(&toy_spec(1));
        let mut b = NeuralNetwork::new(&toy_spec(2));
        let x = [0.3, -0.1, 0.7, 0.2];
        assert_ne!(a.forward(&x), b.forward(&x));

        let (inputs, targets) = toy_batch();
        a.train_batch(&inputs, &targets);
        a.copy_weights_to(&mut b);
        assert_eq!(a.forward(&x), b.forward(&x));
    }

    #[test]
    fn save_load_round_trip_preserves_forward_and_bytes() {
        let dir = std::env::temp_dir().join("chess-rl-network-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("roundtrip.json");

        let mut net = NeuralNetwork::new(&toy_spec(9));
        let (inputs, targets) = toy_batch();
        net.train_batch(&inputs, &targets);
        net.save(&path).unwrap();

        let loaded = NeuralNetwork::load(&path).unwrap();
        let x = [0.5, 0.5, 0.5, 0.5];
        assert_eq!(net.forward(&x), loaded.forward(&x));

        let path2 = dir.join("roundtrip2.json");
        loaded.save(&path2).unwrap();
        assert_eq!(
            std::fs::read(&path).unwrap(),
            std::fs::read(&path2).unwrap(),
            "load-then-save must be byte-stable"
        );
    }

    #[test]
    fn mismatched_checkpoint_is_refused() {
        let net = NeuralNetwork::new(&toy_spec(5));
        let mut other_spec = toy_spec(5);
        other_spec.hidden_layers = vec![16];
        let other = NeuralNetwork::new(&other_spec);

        let err = net.check_compatible(&other.manifest()).unwrap_err();
        assert!(matches!(err, NetworkError::ArchitectureMismatch { .. }));
        assert!(net.check_compatible(&net.manifest()).is_ok());
    }

    #[test]
    fn manifest_counts_parameters() {
        let net = NeuralNetwork::new(&toy_spec(6));
        // 4*8 + 8 + 8*2 + 2
        assert_eq!(net.manifest().parameter_count, 58);
        assert_eq!(net.manifest().hidden_layers, vec![8]);
    }

    #[test]
    fn seeded_networks_pin_the_manifest_timestamp() {
        let net = NeuralNetwork::new(&toy_spec(11));
        assert_eq!(net.manifest().created_at_unix, 0);
    }
}
