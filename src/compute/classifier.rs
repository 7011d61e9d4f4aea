//! Neighborhood classifier used as a predictability probe.
//!
//! A fixed one-hidden-layer network predicts a cell's state from its
//! neighbors: bias + neighbor states -> ReLU hidden layer -> softmax over
//! states, trained with mini-batch SGD, Nesterov momentum and an optional L2
//! penalty. Every training session starts from fresh parameters.

use rand::Rng;
use rand::seq::SliceRandom;
use rand_distr::StandardNormal;

use super::automaton::Grid;
use super::matrix::Matrix;
use super::rule::RuleSpace;
use crate::schema::TrainingConfig;

/// Width of the hidden layer.
pub const HIDDEN_UNITS: usize = 10;

/// Smallest probability fed to the logarithm of the loss.
pub const PROBABILITY_FLOOR: f64 = f64::MIN_POSITIVE;

/// Negative log-likelihood of a predicted probability, floored to stay finite.
#[inline]
pub fn cross_entropy(probability: f64) -> f64 {
    -probability.max(PROBABILITY_FLOOR).ln()
}

/// Classifier errors.
#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("Input has {found} columns, the network expects {expected}")]
    ShapeMismatch { expected: usize, found: usize },
    #[error("Target {value} at example {index} is out of range for {classes} classes")]
    InvalidTarget {
        index: usize,
        value: u8,
        classes: usize,
    },
    #[error("Training interrupted during epoch {epoch}")]
    Interrupted { epoch: usize },
}

/// Labeled examples: a bias column followed by neighbor states, and the center state.
#[derive(Debug, Clone)]
pub struct Dataset {
    inputs: Matrix,
    targets: Vec<u8>,
    classes: usize,
}

impl Dataset {
    /// Build from explicit inputs (bias column included) and targets.
    pub fn new(inputs: Matrix, targets: Vec<u8>, classes: usize) -> Result<Self, ClassifierError> {
        if inputs.rows() != targets.len() {
            return Err(ClassifierError::ShapeMismatch {
                expected: targets.len(),
                found: inputs.rows(),
            });
        }
        if let Some((index, &value)) = targets
            .iter()
            .enumerate()
            .find(|(_, t)| **t as usize >= classes)
        {
            return Err(ClassifierError::InvalidTarget {
                index,
                value,
                classes,
            });
        }
        Ok(Self {
            inputs,
            targets,
            classes,
        })
    }

    /// One example per cell: neighbors (toroidal) as inputs, the cell itself as target.
    pub fn from_grid(grid: &Grid, space: &RuleSpace) -> Self {
        let offsets = space.neighbor_offsets();
        let size = grid.size();
        let mut inputs = Matrix::zeros(size * size, offsets.len() + 1);
        let mut targets = Vec::with_capacity(size * size);

        for row in 0..size {
            for col in 0..size {
                let example = inputs.row_mut(row * size + col);
                example[0] = 1.0;
                for (x, &(dr, dc)) in example[1..].iter_mut().zip(&offsets) {
                    *x = grid.wrapped(row, col, dr, dc) as f64;
                }
                targets.push(grid.get(row, col));
            }
        }

        Self {
            inputs,
            targets,
            classes: space.states() as usize,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    #[inline]
    pub fn inputs(&self) -> &Matrix {
        &self.inputs
    }

    #[inline]
    pub fn targets(&self) -> &[u8] {
        &self.targets
    }

    #[inline]
    pub fn classes(&self) -> usize {
        self.classes
    }
}

/// Weights (each with an explicit bias row) and their momentum buffers.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkParameters {
    /// (inputs + 1) x hidden
    pub weight_ih: Matrix,
    /// (hidden + 1) x outputs
    pub weight_ho: Matrix,
    /// Accumulated update for `weight_ih`.
    pub momentum_ih: Matrix,
    /// Accumulated update for `weight_ho`.
    pub momentum_ho: Matrix,
}

impl NetworkParameters {
    /// Gaussian weights with standard deviation `sqrt(1 / (fan_in + fan_out))`.
    ///
    /// Bias rows start at zero; momentum buffers start at zero.
    pub fn initialize<R: Rng + ?Sized>(
        num_input: usize,
        num_hidden: usize,
        num_output: usize,
        rng: &mut R,
    ) -> Self {
        let std_ih = (1.0 / (num_input + num_hidden) as f64).sqrt();
        let std_ho = (1.0 / (num_hidden + num_output) as f64).sqrt();

        let mut gaussian = |rows: usize, cols: usize, std: f64| {
            Matrix::from_fn(rows, cols, |r, _| {
                if r == 0 {
                    0.0
                } else {
                    std * rng.sample::<f64, _>(StandardNormal)
                }
            })
        };

        let weight_ih = gaussian(num_input + 1, num_hidden, std_ih);
        let weight_ho = gaussian(num_hidden + 1, num_output, std_ho);

        Self {
            momentum_ih: Matrix::zeros(num_input + 1, num_hidden),
            momentum_ho: Matrix::zeros(num_hidden + 1, num_output),
            weight_ih,
            weight_ho,
        }
    }

    /// Input width including the bias column.
    #[inline]
    pub fn input_width(&self) -> usize {
        self.weight_ih.rows()
    }

    #[inline]
    pub fn num_hidden(&self) -> usize {
        self.weight_ih.cols()
    }

    #[inline]
    pub fn num_output(&self) -> usize {
        self.weight_ho.cols()
    }

    /// Sum of squared weights (momentum excluded).
    pub fn squared_norm(&self) -> f64 {
        self.weight_ih.squared_norm() + self.weight_ho.squared_norm()
    }
}

/// Outcome of a training session.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingReport {
    /// Mean batch error of every epoch.
    pub epoch_errors: Vec<f64>,
    /// Mean batch error of the final epoch.
    pub final_error: f64,
}

/// Activations of one forward pass.
struct Activations {
    /// Pre-activation of the hidden layer (batch x hidden).
    pre: Matrix,
    /// Bias column followed by ReLU outputs (batch x (hidden + 1)).
    hidden: Matrix,
    /// Softmax probabilities (batch x outputs).
    output: Matrix,
}

impl Activations {
    fn new(batch: usize, params: &NetworkParameters) -> Self {
        Self {
            pre: Matrix::zeros(batch, params.num_hidden()),
            hidden: Matrix::zeros(batch, params.num_hidden() + 1),
            output: Matrix::zeros(batch, params.num_output()),
        }
    }
}

/// One-hidden-layer softmax classifier.
#[derive(Debug, Clone)]
pub struct Classifier {
    params: NetworkParameters,
    config: TrainingConfig,
}

impl Classifier {
    /// Fresh classifier for `num_input` features and `num_output` classes.
    pub fn new<R: Rng + ?Sized>(
        num_input: usize,
        num_output: usize,
        config: TrainingConfig,
        rng: &mut R,
    ) -> Self {
        Self {
            params: NetworkParameters::initialize(num_input, HIDDEN_UNITS, num_output, rng),
            config,
        }
    }

    /// Fresh classifier sized for a rule space (neighbors in, states out).
    pub fn for_space<R: Rng + ?Sized>(
        space: &RuleSpace,
        config: TrainingConfig,
        rng: &mut R,
    ) -> Self {
        Self::new(
            space.neighborhood_size(),
            space.states() as usize,
            config,
            rng,
        )
    }

    /// Current parameters.
    pub fn parameters(&self) -> &NetworkParameters {
        &self.params
    }

    fn check_width(&self, inputs: &Matrix) -> Result<(), ClassifierError> {
        if inputs.cols() != self.params.input_width() {
            return Err(ClassifierError::ShapeMismatch {
                expected: self.params.input_width(),
                found: inputs.cols(),
            });
        }
        Ok(())
    }

    fn check_dataset(&self, data: &Dataset) -> Result<(), ClassifierError> {
        self.check_width(data.inputs())?;
        if data.classes() != self.params.num_output() {
            return Err(ClassifierError::ShapeMismatch {
                expected: self.params.num_output(),
                found: data.classes(),
            });
        }
        Ok(())
    }

    /// Class probabilities for each input row (bias column included).
    pub fn forward(&self, inputs: &Matrix) -> Result<Matrix, ClassifierError> {
        self.check_width(inputs)?;
        let mut act = Activations::new(inputs.rows(), &self.params);
        self.forward_into(inputs, &mut act);
        Ok(act.output)
    }

    /// Affine, ReLU, affine, then a max-subtracted softmax per row.
    fn forward_into(&self, inputs: &Matrix, act: &mut Activations) {
        inputs.matmul_into(&self.params.weight_ih, &mut act.pre);

        for p in 0..inputs.rows() {
            let hidden = act.hidden.row_mut(p);
            hidden[0] = 1.0;
            for (h, &z) in hidden[1..].iter_mut().zip(act.pre.row(p)) {
                *h = z.max(0.0);
            }
        }

        act.hidden.matmul_into(&self.params.weight_ho, &mut act.output);

        for p in 0..inputs.rows() {
            let row = act.output.row_mut(p);
            let max = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let mut total = 0.0;
            for v in row.iter_mut() {
                *v = (*v - max).exp();
                total += *v;
            }
            for v in row.iter_mut() {
                *v /= total;
            }
        }
    }

    /// Mean cross-entropy over a dataset. Parameters are not modified.
    pub fn evaluate(&self, data: &Dataset) -> Result<f64, ClassifierError> {
        self.check_dataset(data)?;
        if data.is_empty() {
            return Ok(0.0);
        }
        let output = self.forward(data.inputs())?;
        let total: f64 = data
            .targets()
            .iter()
            .enumerate()
            .map(|(p, &t)| cross_entropy(output[(p, t as usize)]))
            .sum();
        Ok(total / data.len() as f64)
    }

    /// Train on `data` with reshuffled mini-batches every epoch.
    ///
    /// `interrupted` is polled once per batch.
    pub fn train<R: Rng + ?Sized>(
        &mut self,
        data: &Dataset,
        rng: &mut R,
        interrupted: &dyn Fn() -> bool,
    ) -> Result<TrainingReport, ClassifierError> {
        self.check_dataset(data)?;

        let batch_size = self.config.batch_size.max(1);
        let num_batches = data.len() / batch_size;
        let mut order: Vec<usize> = (0..data.len()).collect();

        let mut batch = Matrix::zeros(batch_size, self.params.input_width());
        let mut act = Activations::new(batch_size, &self.params);
        let mut prev_ih = self.params.momentum_ih.clone();
        let mut prev_ho = self.params.momentum_ho.clone();
        let mut delta_out = vec![0.0; self.params.num_output()];
        let mut delta_h = vec![0.0; self.params.num_hidden()];

        let mut epoch_errors = Vec::with_capacity(self.config.epochs);

        for epoch in 0..self.config.epochs {
            order.shuffle(rng);
            let mut error = 0.0;

            for chunk in order.chunks_exact(batch_size) {
                if interrupted() {
                    return Err(ClassifierError::Interrupted { epoch });
                }

                for (b, &p) in chunk.iter().enumerate() {
                    batch.row_mut(b).copy_from_slice(data.inputs().row(p));
                }
                self.forward_into(&batch, &mut act);

                // Nesterov look-ahead: keep the previous update, then decay it.
                let momentum = self.config.momentum;
                prev_ih.clone_from(&self.params.momentum_ih);
                prev_ho.clone_from(&self.params.momentum_ho);
                self.params.momentum_ih.scale(momentum);
                self.params.momentum_ho.scale(momentum);

                let mut batch_error = self.accumulate_gradients(
                    &batch,
                    chunk,
                    data.targets(),
                    &act,
                    &mut delta_out,
                    &mut delta_h,
                );
                batch_error += self.apply_update(&prev_ih, &prev_ho);
                error += batch_error;
            }

            let error = if num_batches > 0 {
                error / num_batches as f64
            } else {
                0.0
            };
            if epoch % 5 == 0 {
                log::debug!("Epoch {}: error = {:.6}", epoch, error);
            }
            epoch_errors.push(error);
        }

        let final_error = epoch_errors.last().copied().unwrap_or(0.0);
        Ok(TrainingReport {
            epoch_errors,
            final_error,
        })
    }

    /// Backpropagate one batch into the momentum buffers. Returns the mean batch loss.
    fn accumulate_gradients(
        &mut self,
        batch: &Matrix,
        indices: &[usize],
        targets: &[u8],
        act: &Activations,
        delta_out: &mut [f64],
        delta_h: &mut [f64],
    ) -> f64 {
        let step = self.config.learning_rate / indices.len() as f64;
        let num_hidden = self.params.num_hidden();
        let mut loss = 0.0;

        for (b, &p) in indices.iter().enumerate() {
            let target = targets[p] as usize;
            let probs = act.output.row(b);
            loss += cross_entropy(probs[target]);

            for (k, d) in delta_out.iter_mut().enumerate() {
                *d = probs[k] - if k == target { 1.0 } else { 0.0 };
            }

            let hidden = act.hidden.row(b);
            for (j, &h) in hidden.iter().enumerate() {
                let row = self.params.momentum_ho.row_mut(j);
                for (m, &d) in row.iter_mut().zip(delta_out.iter()) {
                    *m -= step * h * d;
                }
            }

            // Hidden gradients skip the bias row of weight_ho.
            for (j, dh) in delta_h.iter_mut().enumerate() {
                *dh = if hidden[j + 1] > 0.0 {
                    self.params
                        .weight_ho
                        .row(j + 1)
                        .iter()
                        .zip(delta_out.iter())
                        .map(|(w, d)| w * d)
                        .sum()
                } else {
                    0.0
                };
            }

            let input = batch.row(b);
            for (i, &x) in input.iter().enumerate() {
                let row = self.params.momentum_ih.row_mut(i);
                for (m, &dh) in row[..num_hidden].iter_mut().zip(delta_h.iter()) {
                    *m -= step * x * dh;
                }
            }
        }

        loss / indices.len() as f64
    }

    /// Apply `(1 + mu) * (delta + l2 * w) - mu * delta_prev` to every weight.
    ///
    /// Returns the L2 penalty `0.5 * l2 * sum(w^2)` evaluated before the update.
    fn apply_update(&mut self, prev_ih: &Matrix, prev_ho: &Matrix) -> f64 {
        let mu = self.config.momentum;
        let l2 = self.config.l2;
        let mut penalty = 0.0;

        let layers = [
            (&mut self.params.weight_ih, &self.params.momentum_ih, prev_ih),
            (&mut self.params.weight_ho, &self.params.momentum_ho, prev_ho),
        ];
        for (weights, delta, prev) in layers {
            for ((w, &d), &dp) in weights
                .as_mut_slice()
                .iter_mut()
                .zip(delta.as_slice())
                .zip(prev.as_slice())
            {
                penalty += 0.5 * l2 * *w * *w;
                *w += (1.0 + mu) * (d + l2 * *w) - mu * dp;
            }
        }

        penalty
    }
}
