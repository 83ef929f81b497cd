use burn::{
    module::{Ignored, Module, Param, RunningState},
    nn::{Dropout, DropoutConfig},
    tensor::{activation, backend::Backend, Int, Tensor, TensorData},
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use super::config::MaskActivation;

/// Deterministic initialisation context.
///
/// Every parameter tensor is drawn from a `StdRng` seeded with
/// `seed + offset`, so a model built twice from the same parameters has
/// identical weights on every backend. Never seeded from entropy.
#[derive(Debug, Clone)]
pub struct SeededInit<B: Backend> {
    pub seed: u64,
    device: B::Device,
}

impl<B: Backend> SeededInit<B> {
    pub fn new(seed: u64, device: B::Device) -> Self {
        Self { seed, device }
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    /// A context whose seed is shifted by `offset`; used to give each component its own stream.
    pub fn fork(&self, offset: u64) -> Self {
        Self::new(self.seed.wrapping_add(offset), self.device.clone())
    }

    fn rng(&self, offset: u64) -> StdRng {
        StdRng::seed_from_u64(self.seed.wrapping_add(offset))
    }

    pub fn normal_tensor<const D: usize>(
        &self,
        shape: [usize; D],
        rng: &mut StdRng,
        mean: f32,
        std: f32,
    ) -> Tensor<B, D> {
        let total_elements: usize = shape.iter().product();
        let data: Vec<f32> = (0..total_elements)
            .map(|_| {
                let z: f32 = rng.sample(StandardNormal);
                mean + std * z
            })
            .collect();

        Tensor::from_data(TensorData::new(data, shape), &self.device)
    }

    /// Xavier/Glorot-normal weights, small normal bias
    pub fn linear(&self, input_dim: usize, output_dim: usize, bias: bool, offset: u64) -> Linear<B> {
        let mut rng = self.rng(offset);
        let std = (2.0 / (input_dim + output_dim) as f32).sqrt();
        let weight = self.normal_tensor([output_dim, input_dim], &mut rng, 0.0, std);
        let bias = bias.then(|| self.normal_tensor([output_dim], &mut rng, 0.0, 0.01));
        Linear::new(weight, bias)
    }

    pub fn embedding(&self, vocab_size: usize, embedding_dim: usize, offset: u64) -> ColumnEmbedding<B> {
        let mut rng = self.rng(offset);
        let std = (1.0 / embedding_dim as f32).sqrt();
        let weight = self.normal_tensor([vocab_size.max(1), embedding_dim], &mut rng, 0.0, std);
        ColumnEmbedding::new(weight)
    }

    pub fn batch_norm(&self, num_features: usize, momentum: f64) -> FeatureBatchNorm<B> {
        FeatureBatchNorm::new(num_features, momentum, 1e-5, &self.device)
    }
}

/// Dense layer with weights of shape `[output_dim, input_dim]`
#[derive(Module, Debug)]
pub struct Linear<B: Backend> {
    pub weight: Param<Tensor<B, 2>>,
    pub bias: Option<Param<Tensor<B, 1>>>,
}

impl<B: Backend> Linear<B> {
    pub fn new(weight: Tensor<B, 2>, bias: Option<Tensor<B, 1>>) -> Self {
        Self {
            weight: Param::from_tensor(weight),
            bias: bias.map(Param::from_tensor),
        }
    }

    pub fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        let output = input.matmul(self.weight.val().transpose());
        match &self.bias {
            Some(bias) => output.add(bias.val().unsqueeze()),
            None => output,
        }
    }
}

/// Lookup table mapping the ordinal codes of one categorical column to dense vectors
#[derive(Module, Debug)]
pub struct ColumnEmbedding<B: Backend> {
    weight: Param<Tensor<B, 2>>,
}

impl<B: Backend> ColumnEmbedding<B> {
    pub fn new(weight: Tensor<B, 2>) -> Self {
        Self {
            weight: Param::from_tensor(weight),
        }
    }

    /// `[batch]` ordinals to `[batch, embedding_dim]`
    pub fn forward(&self, indices: Tensor<B, 1, Int>) -> Tensor<B, 2> {
        self.weight.val().select(0, indices)
    }

    pub fn embedding_dim(&self) -> usize {
        self.weight.dims()[1]
    }
}

/// Batch normalisation over the feature axis of a `[batch, features]` tensor.
///
/// Batch statistics are used and the running estimates updated whenever the
/// backend tracks gradients; otherwise the running estimates are used.
/// Running estimates follow `running = momentum * running + (1 - momentum) * batch`.
#[derive(Module, Debug)]
pub struct FeatureBatchNorm<B: Backend> {
    gamma: Param<Tensor<B, 1>>,
    beta: Param<Tensor<B, 1>>,
    running_mean: RunningState<Tensor<B, 1>>,
    running_var: RunningState<Tensor<B, 1>>,
    momentum: Ignored<f64>,
    epsilon: Ignored<f64>,
}

impl<B: Backend> FeatureBatchNorm<B> {
    pub fn new(num_features: usize, momentum: f64, epsilon: f64, device: &B::Device) -> Self {
        Self {
            gamma: Param::from_tensor(Tensor::ones([num_features], device)),
            beta: Param::from_tensor(Tensor::zeros([num_features], device)),
            running_mean: RunningState::new(Tensor::zeros([num_features], device)),
            running_var: RunningState::new(Tensor::ones([num_features], device)),
            momentum: Ignored(momentum),
            epsilon: Ignored(epsilon),
        }
    }

    pub fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        let (mean, var) = if B::ad_enabled() {
            let mean = input.clone().mean_dim(0);
            let var = input.clone().var_bias(0);
            self.update_running(mean.clone().detach(), var.clone().detach());
            (mean, var)
        } else {
            (
                self.running_mean.value().unsqueeze::<2>(),
                self.running_var.value().unsqueeze::<2>(),
            )
        };

        let normalized = (input - mean).div(var.add_scalar(*self.epsilon).sqrt());
        normalized
            .mul(self.gamma.val().unsqueeze())
            .add(self.beta.val().unsqueeze())
    }

    fn update_running(&self, mean: Tensor<B, 2>, var: Tensor<B, 2>) {
        let [_, features] = mean.dims();
        let momentum = *self.momentum;
        let running_mean = self
            .running_mean
            .value_sync()
            .mul_scalar(momentum)
            .add(mean.reshape([features]).mul_scalar(1.0 - momentum));
        let running_var = self
            .running_var
            .value_sync()
            .mul_scalar(momentum)
            .add(var.reshape([features]).mul_scalar(1.0 - momentum));
        self.running_mean.update(running_mean.detach());
        self.running_var.update(running_var.detach());
    }
}

/// Fully connected layer, batch norm, then a gated linear unit halving the width
#[derive(Module, Debug)]
pub struct GluLayer<B: Backend> {
    fc: Linear<B>,
    bn: FeatureBatchNorm<B>,
    output_dim: Ignored<usize>,
}

impl<B: Backend> GluLayer<B> {
    pub fn new(init: &SeededInit<B>, input_dim: usize, output_dim: usize, momentum: f64, offset: u64) -> Self {
        Self {
            fc: init.linear(input_dim, 2 * output_dim, false, offset),
            bn: init.batch_norm(2 * output_dim, momentum),
            output_dim: Ignored(output_dim),
        }
    }

    pub fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        let hidden = self.bn.forward(self.fc.forward(input));
        let [batch, width] = hidden.dims();
        let out = *self.output_dim;
        let value = hidden.clone().slice([0..batch, 0..out]);
        let gate = hidden.slice([0..batch, out..width]);
        value.mul(activation::sigmoid(gate))
    }
}

/// Stack of GLU layers with scaled residual connections.
///
/// The layers shared across decision steps are owned by the model and passed
/// in, so a single set of weights receives gradients from every step.
#[derive(Module, Debug)]
pub struct FeatureTransformer<B: Backend> {
    layers: Vec<GluLayer<B>>,
}

impl<B: Backend> FeatureTransformer<B> {
    pub fn new(
        init: &SeededInit<B>,
        n_layers: usize,
        width: usize,
        momentum: f64,
        offset: u64,
    ) -> Self {
        let layers = (0..n_layers)
            .map(|i| GluLayer::new(init, width, width, momentum, offset + i as u64))
            .collect();
        Self { layers }
    }

    pub fn forward(&self, input: Tensor<B, 2>, shared: &[GluLayer<B>]) -> Tensor<B, 2> {
        let scale = std::f32::consts::FRAC_1_SQRT_2;
        let mut hidden = input;
        for (position, layer) in shared.iter().chain(self.layers.iter()).enumerate() {
            hidden = if position == 0 {
                layer.forward(hidden)
            } else {
                hidden.clone().add(layer.forward(hidden)).mul_scalar(scale)
            };
        }
        hidden
    }
}

/// Produces the feature-selection mask of one decision step
#[derive(Module, Debug)]
pub struct AttentiveTransformer<B: Backend> {
    fc: Linear<B>,
    bn: FeatureBatchNorm<B>,
    activation: Ignored<MaskActivation>,
}

impl<B: Backend> AttentiveTransformer<B> {
    pub fn new(
        init: &SeededInit<B>,
        attention_dim: usize,
        n_input_dims: usize,
        momentum: f64,
        activation: MaskActivation,
        offset: u64,
    ) -> Self {
        Self {
            fc: init.linear(attention_dim, n_input_dims, false, offset),
            bn: init.batch_norm(n_input_dims, momentum),
            activation: Ignored(activation),
        }
    }

    pub fn forward(&self, attention: Tensor<B, 2>, prior: Tensor<B, 2>) -> Tensor<B, 2> {
        let scores = self.bn.forward(self.fc.forward(attention)).mul(prior);
        match *self.activation {
            MaskActivation::Sparsemax => sparsemax(scores),
            MaskActivation::Softmax => activation::softmax(scores, 1),
        }
    }
}

/// Sparsemax over the last axis of a `[batch, features]` tensor.
///
/// Euclidean projection onto the probability simplex: rows sum to one and
/// low-scoring entries are exactly zero. The support is found on detached
/// sorted scores; the threshold is then recomputed from the live scores so
/// gradients follow the sparsemax Jacobian.
pub fn sparsemax<B: Backend>(input: Tensor<B, 2>) -> Tensor<B, 2> {
    let [batch, features] = input.dims();
    let device = input.device();
    if features == 0 {
        return input;
    }

    let detached = input.clone().detach();
    let sorted = detached.clone().sort_descending(1);

    let upper: Vec<f32> = (0..features * features)
        .map(|i| if i / features <= i % features { 1.0 } else { 0.0 })
        .collect();
    let upper = Tensor::<B, 2>::from_data(TensorData::new(upper, [features, features]), &device);
    let cumulative = sorted.clone().matmul(upper);

    let ranks: Vec<f32> = (1..=features).map(|k| k as f32).collect();
    let ranks = Tensor::<B, 2>::from_data(TensorData::new(ranks, [1, features]), &device);

    let in_support = sorted
        .clone()
        .mul(ranks)
        .add_scalar(1.0)
        .greater(cumulative)
        .float();
    let outside = in_support.clone().neg().add_scalar(1.0);
    let threshold = sorted
        .mul(in_support)
        .add(outside.mul_scalar(f32::MAX))
        .min_dim(1)
        .repeat_dim(1, features);

    let support = detached.greater_equal(threshold).float();
    let support_size = support.clone().sum_dim(1);
    let tau = input
        .clone()
        .mul(support)
        .sum_dim(1)
        .sub_scalar(1.0)
        .div(support_size);

    input.sub(tau.reshape([batch, 1])).clamp_min(0.0)
}

pub fn dropout(p: f64) -> Dropout {
    DropoutConfig::new(p).init()
}
