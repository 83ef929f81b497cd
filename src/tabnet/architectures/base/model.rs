use burn::{
    module::{Ignored, Module},
    nn::Dropout,
    tensor::{activation, backend::Backend, Int, Tensor},
};

use super::{
    config::ModelParams,
    layer::{dropout, AttentiveTransformer, ColumnEmbedding, FeatureBatchNorm, FeatureTransformer, GluLayer, Linear, SeededInit},
};

const SHARED_LAYERS: usize = 2;
const STEP_LAYERS: usize = 2;

// Seed offsets per component
const EMBEDDING_SEED: u64 = 100;
const SHARED_SEED: u64 = 200;
const INITIAL_SEED: u64 = 300;
const STEP_SEED: u64 = 1000;
const FINAL_SEED: u64 = 5000;

/// Everything the training engine reads from one forward pass
#[derive(Debug, Clone)]
pub struct TabNetOutput<B: Backend> {
    /// `[batch, n_input_dims]` continuous columns followed by categorical embeddings
    pub embedded: Tensor<B, 2>,
    /// `[batch, n_output_dims]`
    pub logits: Tensor<B, 2>,
    /// `[batch, n_input_dims]`
    pub reconstruction: Tensor<B, 2>,
    /// One `[batch, n_input_dims]` attention mask per decision step
    pub step_masks: Vec<Tensor<B, 2>>,
}

#[derive(Module, Debug)]
pub struct DecisionStep<B: Backend> {
    attentive: AttentiveTransformer<B>,
    transformer: FeatureTransformer<B>,
    reconstruction: Linear<B>,
}

/// TabNet encoder with a task head and a per-step feature reconstruction decoder
#[derive(Module, Debug)]
pub struct TabNetModel<B: Backend> {
    embeddings: Vec<ColumnEmbedding<B>>,
    input_bn: FeatureBatchNorm<B>,
    shared: Vec<GluLayer<B>>,
    initial: FeatureTransformer<B>,
    steps: Vec<DecisionStep<B>>,
    final_mapping: Linear<B>,
    dropout: Dropout,
    n_dims_d: Ignored<usize>,
    n_input_dims: Ignored<usize>,
    n_continuous: Ignored<usize>,
    gamma: Ignored<f64>,
}

impl<B: Backend> TabNetModel<B> {
    /// Build the network for parameters whose data-derived dimensions are already filled in.
    pub fn new(params: &ModelParams, device: &B::Device) -> Self {
        let init = SeededInit::<B>::new(params.seed, device.clone());
        let momentum = params.batch_norm_momentum;
        let n_input = params.n_input_dims;
        let width = params.n_dims_d + params.n_dims_a;

        let embeddings = params
            .categorical_config
            .iter()
            .enumerate()
            .map(|(i, column)| init.embedding(column.n_dims, params.embedding_dim, EMBEDDING_SEED + i as u64))
            .collect();

        let shared = (0..SHARED_LAYERS)
            .map(|i| {
                let input_dim = if i == 0 { n_input } else { width };
                GluLayer::new(&init, input_dim, width, momentum, SHARED_SEED + i as u64)
            })
            .collect();

        let steps = (0..params.n_steps)
            .map(|step| {
                let step_init = init.fork(STEP_SEED * (step as u64 + 1));
                DecisionStep {
                    attentive: AttentiveTransformer::new(
                        &step_init,
                        params.n_dims_a,
                        n_input,
                        momentum,
                        params.mask_type,
                        0,
                    ),
                    transformer: FeatureTransformer::new(&step_init, STEP_LAYERS, width, momentum, 10),
                    reconstruction: step_init.linear(params.n_dims_d, n_input, false, 20),
                }
            })
            .collect();

        Self {
            embeddings,
            input_bn: init.batch_norm(n_input, momentum),
            shared,
            initial: FeatureTransformer::new(&init, STEP_LAYERS, width, momentum, INITIAL_SEED),
            steps,
            final_mapping: init.linear(params.n_dims_d, params.n_output_dims.max(1), true, FINAL_SEED),
            dropout: dropout(params.dropout_p),
            n_dims_d: Ignored(params.n_dims_d),
            n_input_dims: Ignored(n_input),
            n_continuous: Ignored(params.n_continuous_input_dims),
            gamma: Ignored(params.gamma),
        }
    }

    /// Continuous columns followed by one embedding block per categorical column
    pub fn embed(&self, continuous: Tensor<B, 2>, categorical: Tensor<B, 2, Int>) -> Tensor<B, 2> {
        let [batch, n_cont] = continuous.dims();
        let mut parts = Vec::with_capacity(self.embeddings.len() + 1);
        if n_cont > 0 {
            parts.push(continuous);
        }
        for (column, embedding) in self.embeddings.iter().enumerate() {
            let codes = categorical
                .clone()
                .slice([0..batch, column..column + 1])
                .reshape([batch]);
            parts.push(embedding.forward(codes));
        }
        Tensor::cat(parts, 1)
    }

    /// Forward pass.
    ///
    /// With `mask_input` the embedded features are multiplied by
    /// `feature_mask` before the first layer and the attention prior starts at
    /// the mask, so hidden features can neither be read nor attended. Without
    /// it the mask is ignored.
    pub fn forward(
        &self,
        continuous: Tensor<B, 2>,
        categorical: Tensor<B, 2, Int>,
        feature_mask: Tensor<B, 2>,
        mask_input: bool,
    ) -> TabNetOutput<B> {
        let embedded = self.embed(continuous, categorical);
        let [batch, n_input] = embedded.dims();
        let n_d = *self.n_dims_d;

        let (features, mut prior) = if mask_input {
            (embedded.clone().mul(feature_mask.clone()), feature_mask)
        } else {
            (embedded.clone(), Tensor::ones([batch, n_input], &embedded.device()))
        };
        let features = self.input_bn.forward(features);

        let hidden = self.initial.forward(features.clone(), &self.shared);
        let [_, hidden_width] = hidden.dims();
        let mut attention = hidden.slice([0..batch, n_d..hidden_width]);

        let mut aggregated = Tensor::<B, 2>::zeros([batch, n_d], &embedded.device());
        let mut reconstruction = Tensor::<B, 2>::zeros([batch, n_input], &embedded.device());
        let mut step_masks = Vec::with_capacity(self.steps.len());

        for step in &self.steps {
            let mask = step.attentive.forward(attention, prior.clone());
            prior = prior.mul(mask.clone().neg().add_scalar(*self.gamma));

            let hidden = step.transformer.forward(features.clone().mul(mask.clone()), &self.shared);
            let decision = activation::relu(hidden.clone().slice([0..batch, 0..n_d]));
            attention = hidden.slice([0..batch, n_d..hidden_width]);

            reconstruction = reconstruction.add(step.reconstruction.forward(decision.clone()));
            aggregated = aggregated.add(decision);
            step_masks.push(mask);
        }

        let logits = self.final_mapping.forward(self.dropout.forward(aggregated));

        TabNetOutput {
            embedded,
            logits,
            reconstruction,
            step_masks,
        }
    }

    /// Embedded input width, also the width of every feature mask
    pub fn n_input_dims(&self) -> usize {
        *self.n_input_dims
    }

    pub fn n_continuous(&self) -> usize {
        *self.n_continuous
    }

    pub fn n_steps(&self) -> usize {
        self.steps.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tabnet::architectures::base::config::{CategoricalColumnConfig, CategoryMap};
    use burn::backend::Autodiff;
    use burn::module::AutodiffModule;
    use burn_ndarray::NdArray;

    type TestBackend = Autodiff<NdArray<f32>>;

    fn params() -> ModelParams {
        let mut params = ModelParams {
            n_steps: 3,
            n_dims_d: 4,
            n_dims_a: 4,
            embedding_dim: 2,
            discrete_outputs: true,
            ..Default::default()
        };
        params.categorical_config = vec![CategoricalColumnConfig {
            identifier: "color".to_string(),
            idx: 2,
            n_dims: 3,
            map: CategoryMap::from_values(["r", "g", "b"]),
        }];
        params.derive_dimensions(3, 2);
        params
    }

    #[test]
    fn test_forward_shapes() {
        let device = Default::default();
        let params = params();
        let model = TabNetModel::<TestBackend>::new(&params, &device);

        let continuous = Tensor::<TestBackend, 2>::random([6, 2], burn::tensor::Distribution::Default, &device);
        let categorical = Tensor::<TestBackend, 2, Int>::from_ints([[0], [1], [2], [0], [1], [2]], &device);
        let mask = Tensor::<TestBackend, 2>::ones([6, 4], &device);

        let out = model.forward(continuous, categorical, mask, false);
        assert_eq!(out.embedded.dims(), [6, 4]);
        assert_eq!(out.logits.dims(), [6, 2]);
        assert_eq!(out.reconstruction.dims(), [6, 4]);
        assert_eq!(out.step_masks.len(), 3);
        for mask in &out.step_masks {
            assert_eq!(mask.dims(), [6, 4]);
            let sums = mask.clone().sum_dim(1).into_data().to_vec::<f32>().unwrap();
            assert!(sums.iter().all(|s| (s - 1.0).abs() < 1e-4));
        }
    }

    #[test]
    fn test_embedded_output_is_unmasked_input() {
        let device = Default::default();
        let params = params();
        let model = TabNetModel::<TestBackend>::new(&params, &device);

        let continuous = Tensor::<TestBackend, 2>::from_floats([[1.0, 2.0], [3.0, 4.0]], &device);
        let categorical = Tensor::<TestBackend, 2, Int>::from_ints([[0], [1]], &device);
        let mask = Tensor::<TestBackend, 2>::zeros([2, 4], &device);

        let out = model.forward(continuous, categorical, mask, true);
        let head = out.embedded.slice([0..2, 0..2]).into_data().to_vec::<f32>().unwrap();
        assert_eq!(head, vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(out.step_masks.len(), model.n_steps());
    }

    #[test]
    fn test_same_seed_builds_identical_models() {
        let device = Default::default();
        let params = params();
        let a = TabNetModel::<TestBackend>::new(&params, &device);
        let b = TabNetModel::<TestBackend>::new(&params, &device);

        let continuous = Tensor::<TestBackend, 2>::ones([2, 2], &device);
        let categorical = Tensor::<TestBackend, 2, Int>::from_ints([[0], [2]], &device);
        let mask = Tensor::<TestBackend, 2>::ones([2, 4], &device);

        let la = a.valid().forward(continuous.clone().inner(), categorical.clone().inner(), mask.clone().inner(), false);
        let lb = b.valid().forward(continuous.inner(), categorical.inner(), mask.inner(), false);
        assert_eq!(
            la.logits.into_data().to_vec::<f32>().unwrap(),
            lb.logits.into_data().to_vec::<f32>().unwrap()
        );
    }
}
