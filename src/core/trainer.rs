//! Stochastic denoising training of the autoencoder.
//!
//! Each epoch shuffles the encoded corpus and performs one gradient step per vector:
//! - The clean vector is corrupted with independent Gaussian noise (standard deviation
//!   `noise_factor`) and clipped back to [0, 1].
//! - The model reconstructs the corrupted vector under the transaction's category blocks.
//! - The loss is the sum over category blocks of the mean binary-cross-entropy of that
//!   block's cells against the *clean* slice. Averaging within a block (instead of one cell
//!   sum over the whole vector) lets blocks of very different widths contribute comparably,
//!   which is what makes the per-block softmax trainable as a multi-class classifier.
//! - Parameters take one Adam step with L2 weight decay.
//!
//! There is no convergence criterion beyond the fixed epoch count, no early stopping, and no
//! validation split: this is an unsupervised representation-learning step.

use super::autoencoder::{block_bce_grad, block_bce_loss, AutoEncoder, Gradients};
use super::encoder::EncodedTransactions;
use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand_distr::{Distribution, Normal};
use tracing::debug;

/// Adam first-moment decay.
const BETA_1: f32 = 0.9;
/// Adam second-moment decay.
const BETA_2: f32 = 0.999;
/// Adam denominator fuzz.
const ADAM_EPSILON: f32 = 1e-8;

/// First and second moment estimates for one parameter tensor.
#[derive(Debug, Clone)]
struct Moments {
    m: Vec<f32>,
    v: Vec<f32>,
}

impl Moments {
    fn zeros(len: usize) -> Self {
        Self {
            m: vec![0.0; len],
            v: vec![0.0; len],
        }
    }
}

/// Adam optimizer state across all model layers.
struct AdamState {
    /// Global step count, used for bias correction.
    step: u64,

    /// `(weight moments, bias moments)` per layer, in forward order.
    layers: Vec<(Moments, Moments)>,
}

impl AdamState {
    fn for_model(model: &mut AutoEncoder) -> Self {
        let layers = model
            .layers_mut()
            .iter()
            .map(|layer| {
                (
                    Moments::zeros(layer.weights.len()),
                    Moments::zeros(layer.biases.len()),
                )
            })
            .collect();
        Self { step: 0, layers }
    }

    /// Applies one Adam step with L2 weight decay folded into the gradient.
    fn apply(
        &mut self,
        model: &mut AutoEncoder,
        gradients: &Gradients,
        learning_rate: f32,
        weight_decay: f32,
    ) {
        self.step += 1;
        let bias_correction_1 = 1.0 - BETA_1.powi(self.step as i32);
        let bias_correction_2 = 1.0 - BETA_2.powi(self.step as i32);

        for (layer, ((grad_w, grad_b), (moments_w, moments_b))) in model
            .layers_mut()
            .into_iter()
            .zip(gradients.layers.iter().zip(self.layers.iter_mut()))
        {
            update_params(
                &mut layer.weights,
                grad_w,
                moments_w,
                learning_rate,
                weight_decay,
                bias_correction_1,
                bias_correction_2,
            );
            update_params(
                &mut layer.biases,
                grad_b,
                moments_b,
                learning_rate,
                0.0,
                bias_correction_1,
                bias_correction_2,
            );
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn update_params(
    params: &mut [f32],
    grads: &[f32],
    moments: &mut Moments,
    learning_rate: f32,
    weight_decay: f32,
    bias_correction_1: f32,
    bias_correction_2: f32,
) {
    for (((p, &g), m), v) in params
        .iter_mut()
        .zip(grads)
        .zip(moments.m.iter_mut())
        .zip(moments.v.iter_mut())
    {
        let g = g + weight_decay * *p;
        *m = BETA_1 * *m + (1.0 - BETA_1) * g;
        *v = BETA_2 * *v + (1.0 - BETA_2) * g * g;
        let m_hat = *m / bias_correction_1;
        let v_hat = *v / bias_correction_2;
        *p -= learning_rate * m_hat / (v_hat.sqrt() + ADAM_EPSILON);
    }
}

/// Drives the per-vector denoising gradient updates.
pub struct Trainer {
    /// Fixed number of passes over the corpus.
    pub epochs: usize,

    /// Adam learning rate.
    pub learning_rate: f32,

    /// L2 weight decay applied to layer weights (not biases).
    pub weight_decay: f32,

    /// Standard deviation of the additive Gaussian input noise.
    pub noise_factor: f32,
}

impl Trainer {
    /// Creates a trainer with the given hyperparameters.
    #[inline]
    pub fn new(epochs: usize, learning_rate: f32, weight_decay: f32, noise_factor: f32) -> Self {
        Self {
            epochs,
            learning_rate,
            weight_decay,
            noise_factor,
        }
    }

    /// Trains the model on the encoded corpus and returns the mean per-vector loss of the
    /// final epoch.
    pub fn train(
        &self,
        model: &mut AutoEncoder,
        corpus: &EncodedTransactions,
        rng: &mut StdRng,
    ) -> Result<f32> {
        let noise = Normal::new(0.0f32, self.noise_factor)
            .context("noise_factor must be finite and non-negative")?;
        let mut adam = AdamState::for_model(model);
        let mut order: Vec<usize> = (0..corpus.len()).collect();
        let mut epoch_loss = 0.0;

        for epoch in 0..self.epochs {
            order.shuffle(rng);
            epoch_loss = 0.0;
            for &index in &order {
                let clean = &corpus.vectors[index];
                let blocks = &corpus.category_indices[index];

                let noisy: Vec<f32> = clean
                    .iter()
                    .map(|&v| (v + noise.sample(rng)).clamp(0.0, 1.0))
                    .collect();

                let forward = model.forward_cached(&noisy, blocks);
                epoch_loss += block_bce_loss(&forward.output, clean, blocks);

                let grad_logits = block_bce_grad(&forward.output, clean, blocks);
                let gradients = model.backward(&forward, &grad_logits);
                adam.apply(model, &gradients, self.learning_rate, self.weight_decay);
            }
            epoch_loss /= corpus.len().max(1) as f32;
            debug!(epoch, mean_loss = epoch_loss, "finished training epoch");
        }

        Ok(epoch_loss)
    }
}
