//! A denoising autoencoder over one-hot encoded transaction vectors.
//!
//! Topology:
//! - The encoder compresses the input width through two intermediate widths down to a
//!   bottleneck (roughly ÷8, ÷32, ÷128 of the input size, floored so narrow inputs stay
//!   trainable), the decoder mirrors the widths back up.
//! - A saturating tanh nonlinearity sits between layers; the last layer of each stack is
//!   linear.
//! - Weights are initialized Xavier-uniform, biases start at zero.
//!
//! Forward contract: given an input vector and its category blocks, the raw decoder output is
//! replaced block by block with a softmax over that block. Every block of the output is a
//! probability distribution (non-negative, summing to 1), which is what lets output values be
//! read as implication probabilities comparable against a similarity threshold.
//!
//! The backward pass is specified at the level of the loss decomposition: the gradient of the
//! summed per-block binary-cross-entropy with respect to the block logits is computed in
//! closed form and then backpropagated through the dense stack. Parameter updates are the
//! optimizer's job (see the trainer module).
//!
//! Encoder and decoder parameters can be saved to and loaded from a content-addressed
//! checkpoint stem. A missing checkpoint is not an error; it signals a cold start.

use super::encoder::CategoryBlock;
use anyhow::{bail, Context, Result};
use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

/// Clamp applied to softmax outputs before they enter logarithms or denominators.
const PROB_EPSILON: f32 = 1e-6;

/// A fully-connected layer with row-major weights (`outputs × inputs`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenseLayer {
    /// Row-major weight matrix, `outputs * inputs` entries.
    pub weights: Vec<f32>,

    /// One bias per output unit.
    pub biases: Vec<f32>,

    /// Input width.
    pub inputs: usize,

    /// Output width.
    pub outputs: usize,
}

impl DenseLayer {
    /// Creates a layer with Xavier-uniform weights and zero biases.
    pub fn xavier(inputs: usize, outputs: usize, rng: &mut StdRng) -> Self {
        let limit = (6.0 / (inputs + outputs) as f32).sqrt();
        let weights = (0..inputs * outputs)
            .map(|_| rng.random::<f32>() * 2.0 * limit - limit)
            .collect();
        Self {
            weights,
            biases: vec![0.0; outputs],
            inputs,
            outputs,
        }
    }

    /// Computes `W·x + b`.
    #[inline]
    pub fn forward(&self, input: &[f32]) -> Vec<f32> {
        (0..self.outputs)
            .map(|o| {
                let row = &self.weights[o * self.inputs..(o + 1) * self.inputs];
                row.iter()
                    .zip(input)
                    .fold(self.biases[o], |acc, (&w, &x)| acc + w * x)
            })
            .collect()
    }
}

/// Cached intermediate state of one forward pass, needed by the backward pass.
#[derive(Debug)]
pub struct Forward {
    /// The input fed into each dense layer, in forward order.
    pub layer_inputs: Vec<Vec<f32>>,

    /// Raw decoder output before the per-block softmax.
    pub logits: Vec<f32>,

    /// Final output after the per-block softmax.
    pub output: Vec<f32>,
}

/// Per-layer parameter gradients, in forward layer order.
#[derive(Debug)]
pub struct Gradients {
    /// `(weight gradients, bias gradients)` per layer.
    pub layers: Vec<(Vec<f32>, Vec<f32>)>,
}

/// The denoising autoencoder: a dense encoder/decoder pair with per-block softmax output.
#[derive(Debug)]
pub struct AutoEncoder {
    /// Width of the input and output vectors.
    pub data_size: usize,

    encoder: Vec<DenseLayer>,
    decoder: Vec<DenseLayer>,
}

/// Intermediate widths for a given input size. The original ÷8/÷32/÷128 reduction is floored
/// so that narrow inputs keep non-trivial layers, and clamped to stay non-increasing.
fn hidden_widths(data_size: usize) -> [usize; 3] {
    let h1 = (data_size / 8).max(4);
    let h2 = (data_size / 32).max(3).min(h1);
    let h3 = (data_size / 128).max(2).min(h2);
    [h1, h2, h3]
}

impl AutoEncoder {
    /// Creates a model for vectors of the given width, Xavier-initialized from the rng.
    pub fn new(data_size: usize, rng: &mut StdRng) -> Self {
        let [h1, h2, h3] = hidden_widths(data_size);
        Self {
            data_size,
            encoder: vec![
                DenseLayer::xavier(data_size, h1, rng),
                DenseLayer::xavier(h1, h2, rng),
                DenseLayer::xavier(h2, h3, rng),
            ],
            decoder: vec![
                DenseLayer::xavier(h3, h2, rng),
                DenseLayer::xavier(h2, h1, rng),
                DenseLayer::xavier(h1, data_size, rng),
            ],
        }
    }

    /// All layers in forward order.
    #[inline]
    fn layers(&self) -> impl Iterator<Item = &DenseLayer> {
        self.encoder.iter().chain(self.decoder.iter())
    }

    /// Mutable access to all layers in forward order, for the optimizer.
    #[inline]
    pub fn layers_mut(&mut self) -> Vec<&mut DenseLayer> {
        self.encoder.iter_mut().chain(self.decoder.iter_mut()).collect()
    }

    /// Number of dense layers in the model.
    #[inline]
    pub fn num_layers(&self) -> usize {
        self.encoder.len() + self.decoder.len()
    }

    /// Whether a tanh follows the layer at the given forward position. The last layer of the
    /// encoder (the bottleneck projection) and of the decoder are linear.
    #[inline]
    fn tanh_after(&self, layer: usize) -> bool {
        layer != self.encoder.len() - 1 && layer != self.num_layers() - 1
    }

    /// Runs the full forward pass, caching the per-layer inputs for backpropagation.
    pub fn forward_cached(&self, input: &[f32], blocks: &[CategoryBlock]) -> Forward {
        let mut layer_inputs = Vec::with_capacity(self.num_layers());
        let mut current = input.to_vec();
        for (index, layer) in self.layers().enumerate() {
            layer_inputs.push(current.clone());
            let mut out = layer.forward(&current);
            if self.tanh_after(index) {
                for v in out.iter_mut() {
                    *v = v.tanh();
                }
            }
            current = out;
        }
        let logits = current;
        let output = block_softmax(&logits, blocks);
        Forward {
            layer_inputs,
            logits,
            output,
        }
    }

    /// Runs a forward pass and returns only the per-block-normalized output.
    #[inline]
    pub fn forward(&self, input: &[f32], blocks: &[CategoryBlock]) -> Vec<f32> {
        self.forward_cached(input, blocks).output
    }

    /// Backpropagates a gradient with respect to the output logits through the dense stack,
    /// producing per-layer parameter gradients.
    pub fn backward(&self, forward: &Forward, grad_logits: &[f32]) -> Gradients {
        let layers: Vec<&DenseLayer> = self.layers().collect();
        let mut gradients: Vec<(Vec<f32>, Vec<f32>)> = layers
            .iter()
            .map(|l| (vec![0.0; l.weights.len()], vec![0.0; l.biases.len()]))
            .collect();

        // Gradient with respect to the pre-activation output of the current layer.
        let mut delta = grad_logits.to_vec();
        for index in (0..layers.len()).rev() {
            let layer = layers[index];
            let input = &forward.layer_inputs[index];

            let (grad_weights, grad_biases) = &mut gradients[index];
            for o in 0..layer.outputs {
                grad_biases[o] = delta[o];
                let row = &mut grad_weights[o * layer.inputs..(o + 1) * layer.inputs];
                for (i, cell) in row.iter_mut().enumerate() {
                    *cell = delta[o] * input[i];
                }
            }

            if index == 0 {
                break;
            }

            // Gradient with respect to this layer's input, then through the preceding tanh.
            // The cached input equals the previous layer's activation, so tanh' is 1 - a².
            let mut grad_input = vec![0.0; layer.inputs];
            for o in 0..layer.outputs {
                let row = &layer.weights[o * layer.inputs..(o + 1) * layer.inputs];
                for (i, &w) in row.iter().enumerate() {
                    grad_input[i] += w * delta[o];
                }
            }
            if self.tanh_after(index - 1) {
                for (g, &a) in grad_input.iter_mut().zip(input.iter()) {
                    *g *= 1.0 - a * a;
                }
            }
            delta = grad_input;
        }

        Gradients { layers: gradients }
    }

    /// Saves encoder and decoder parameters under the given checkpoint stem.
    pub fn save(&self, stem: &Path) -> Result<()> {
        let (encoder_path, decoder_path) = checkpoint_paths(stem);
        write_layers(&encoder_path, &self.encoder)?;
        write_layers(&decoder_path, &self.decoder)?;
        Ok(())
    }

    /// Loads encoder and decoder parameters from the given checkpoint stem.
    ///
    /// Returns `Ok(false)` when either file is absent (a cold start, not an error), and fails
    /// only on unreadable or shape-incompatible checkpoints.
    pub fn load(&mut self, stem: &Path) -> Result<bool> {
        let (encoder_path, decoder_path) = checkpoint_paths(stem);
        if !encoder_path.is_file() || !decoder_path.is_file() {
            return Ok(false);
        }
        let encoder = read_layers(&encoder_path)?;
        let decoder = read_layers(&decoder_path)?;
        let output = decoder.last().map_or(0, |l| l.outputs);
        if encoder.first().map_or(0, |l| l.inputs) != self.data_size || output != self.data_size {
            bail!(
                "checkpoint '{}' does not match the model input width {}",
                stem.display(),
                self.data_size
            );
        }
        self.encoder = encoder;
        self.decoder = decoder;
        Ok(true)
    }
}

fn checkpoint_paths(stem: &Path) -> (PathBuf, PathBuf) {
    let stem_str = stem.to_string_lossy();
    (
        PathBuf::from(format!("{stem_str}_encoder.bin")),
        PathBuf::from(format!("{stem_str}_decoder.bin")),
    )
}

fn write_layers(path: &Path, layers: &[DenseLayer]) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("creating checkpoint file '{}'", path.display()))?;
    bincode::serialize_into(file, layers)
        .with_context(|| format!("serializing checkpoint '{}'", path.display()))
}

fn read_layers(path: &Path) -> Result<Vec<DenseLayer>> {
    let file = File::open(path)
        .with_context(|| format!("opening checkpoint file '{}'", path.display()))?;
    bincode::deserialize_from(BufReader::new(file))
        .with_context(|| format!("deserializing checkpoint '{}'", path.display()))
}

/// Replaces every category-block slice of the logits with a softmax over that slice.
/// Width-1 blocks normalize to exactly 1.
pub fn block_softmax(logits: &[f32], blocks: &[CategoryBlock]) -> Vec<f32> {
    let mut output = logits.to_vec();
    for block in blocks {
        let slice = &mut output[block.start..block.end];
        let max = slice.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let mut sum = 0.0;
        for v in slice.iter_mut() {
            *v = (*v - max).exp();
            sum += *v;
        }
        for v in slice.iter_mut() {
            *v /= sum;
        }
    }
    output
}

/// Sum over category blocks of the mean binary-cross-entropy of that block's cells against
/// the clean target. Averaging within a block before summing keeps blocks of very different
/// widths contributing comparably; a plain cell sum would let wide blocks drown narrow ones.
/// Width-1 blocks are skipped: a softmax over a single cell is constant.
pub fn block_bce_loss(output: &[f32], target: &[f32], blocks: &[CategoryBlock]) -> f32 {
    let mut loss = 0.0;
    for block in blocks {
        if block.width() < 2 {
            continue;
        }
        let mut block_loss = 0.0;
        for index in block.start..block.end {
            let y = output[index].clamp(PROB_EPSILON, 1.0 - PROB_EPSILON);
            let x = target[index];
            block_loss -= x * y.ln() + (1.0 - x) * (1.0 - y).ln();
        }
        loss += block_loss / block.width() as f32;
    }
    loss
}

/// Gradient of `block_bce_loss` with respect to the logits, folding the per-block softmax
/// Jacobian into closed form. For each block of width `w` with outputs `y` and targets `x`,
/// with `g_i = (y_i - x_i) / (1 - y_i)`, the logit gradient is `(g_j - y_j · Σ g_i) / w`,
/// the `1 / w` mirroring the within-block mean of the loss.
/// Width-1 blocks receive a zero gradient: their softmax output is constant.
pub fn block_bce_grad(output: &[f32], target: &[f32], blocks: &[CategoryBlock]) -> Vec<f32> {
    let mut grad = vec![0.0; output.len()];
    for block in blocks {
        if block.width() < 2 {
            continue;
        }
        let mut g = Vec::with_capacity(block.width());
        let mut g_sum = 0.0;
        for index in block.start..block.end {
            let y = output[index].clamp(PROB_EPSILON, 1.0 - PROB_EPSILON);
            let value = (y - target[index]) / (1.0 - y);
            g.push(value);
            g_sum += value;
        }
        let scale = 1.0 / block.width() as f32;
        for (offset, index) in (block.start..block.end).enumerate() {
            let y = output[index].clamp(PROB_EPSILON, 1.0 - PROB_EPSILON);
            grad[index] = (g[offset] - y * g_sum) * scale;
        }
    }
    grad
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn blocks_of(widths: &[usize]) -> Vec<CategoryBlock> {
        let mut start = 0;
        widths
            .iter()
            .map(|&w| {
                let block = CategoryBlock {
                    start,
                    end: start + w,
                };
                start += w;
                block
            })
            .collect()
    }

    #[test]
    fn hidden_widths_floor_narrow_inputs() {
        assert_eq!(hidden_widths(6), [4, 3, 2]);
        assert_eq!(hidden_widths(1024), [128, 32, 8]);
    }

    #[test]
    fn forward_output_is_a_distribution_per_block() {
        let mut rng = StdRng::from_seed([42u8; 32]);
        let blocks = blocks_of(&[3, 2, 4, 1]);
        let model = AutoEncoder::new(10, &mut rng);

        let input: Vec<f32> = (0..10).map(|i| (i % 3) as f32 / 2.0).collect();
        let output = model.forward(&input, &blocks);

        assert_eq!(output.len(), 10);
        assert!(output.iter().all(|&v| v >= 0.0));
        for block in &blocks {
            let sum: f32 = output[block.start..block.end].iter().sum();
            assert!((sum - 1.0).abs() < 1e-5, "block sum was {sum}");
        }
    }

    #[test]
    fn xavier_weights_stay_within_limit_and_biases_are_zero() {
        let mut rng = StdRng::from_seed([7u8; 32]);
        let layer = DenseLayer::xavier(20, 10, &mut rng);
        let limit = (6.0f32 / 30.0).sqrt();

        assert!(layer.weights.iter().all(|w| w.abs() <= limit));
        assert!(layer.biases.iter().all(|&b| b == 0.0));
    }

    #[test]
    fn bce_gradient_matches_finite_differences() {
        let blocks = blocks_of(&[3, 2]);
        let logits = vec![0.2f32, -0.4, 0.9, 0.1, -0.3];
        let target = vec![1.0f32, 0.0, 0.0, 0.0, 1.0];

        let output = block_softmax(&logits, &blocks);
        let grad = block_bce_grad(&output, &target, &blocks);

        let epsilon = 1e-3;
        for index in 0..logits.len() {
            let mut nudged = logits.clone();
            nudged[index] += epsilon;
            let plus = block_bce_loss(&block_softmax(&nudged, &blocks), &target, &blocks);
            nudged[index] -= 2.0 * epsilon;
            let minus = block_bce_loss(&block_softmax(&nudged, &blocks), &target, &blocks);
            let numeric = (plus - minus) / (2.0 * epsilon);
            assert!(
                (grad[index] - numeric).abs() < 1e-2,
                "index {index}: analytic {} vs numeric {numeric}",
                grad[index]
            );
        }
    }

    #[test]
    fn block_loss_averages_within_each_block() {
        let blocks = blocks_of(&[2, 10]);
        let logits: Vec<f32> = (0..12).map(|i| (i as f32 * 0.37).sin()).collect();
        let mut target = vec![0.0f32; 12];
        target[0] = 1.0;
        target[6] = 1.0;

        let output = block_softmax(&logits, &blocks);
        let loss = block_bce_loss(&output, &target, &blocks);

        let cell_bce = |index: usize| {
            let y = output[index].clamp(PROB_EPSILON, 1.0 - PROB_EPSILON);
            -(target[index] * y.ln() + (1.0 - target[index]) * (1.0 - y).ln())
        };
        let mut expected = 0.0;
        for block in &blocks {
            let block_sum: f32 = (block.start..block.end).map(cell_bce).sum();
            expected += block_sum / block.width() as f32;
        }
        assert!((loss - expected).abs() < 1e-5, "loss {loss} vs {expected}");

        // With uneven widths the per-block mean must not collapse into a plain
        // whole-vector cell sum, which would let the wide block dominate.
        let elementwise: f32 = (0..12).map(cell_bce).sum();
        assert!(loss < elementwise - 1.0, "loss {loss} vs cell sum {elementwise}");
    }

    #[test]
    fn width_one_blocks_get_zero_gradient() {
        let blocks = blocks_of(&[1, 2]);
        let output = block_softmax(&[0.5, 0.1, 0.2], &blocks);
        let grad = block_bce_grad(&output, &[0.3, 1.0, 0.0], &blocks);
        assert_eq!(grad[0], 0.0);
    }

    #[test]
    fn checkpoint_roundtrip_reproduces_forward_output() {
        let dir = tempfile::tempdir().unwrap();
        let stem = dir.path().join("model");
        let blocks = blocks_of(&[4, 4]);

        let mut rng = StdRng::from_seed([42u8; 32]);
        let model = AutoEncoder::new(8, &mut rng);
        model.save(&stem).unwrap();

        let mut rng2 = StdRng::from_seed([9u8; 32]);
        let mut restored = AutoEncoder::new(8, &mut rng2);
        assert!(restored.load(&stem).unwrap());

        let input = vec![1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0];
        assert_eq!(model.forward(&input, &blocks), restored.forward(&input, &blocks));
    }

    #[test]
    fn missing_checkpoint_is_a_cold_start() {
        let dir = tempfile::tempdir().unwrap();
        let mut rng = StdRng::from_seed([42u8; 32]);
        let mut model = AutoEncoder::new(8, &mut rng);
        assert!(!model.load(&dir.path().join("absent")).unwrap());
    }
}
