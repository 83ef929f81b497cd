use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::time::Duration;

use burn::backend::Autodiff;
use burn_ndarray::NdArray;

use tabnet_rs::tabnet::architectures::base::data::{Frame, TrainingDataset};
use tabnet_rs::tabnet::architectures::base::loss_utils::{reconstruction_loss, sparsity_loss};
use tabnet_rs::tabnet::architectures::base::masking::{FeatureMasker, MaskLayout};
use tabnet_rs::tabnet::architectures::base::model::TabNetModel;
use tabnet_rs::test_utils::{regression_array, small_model_params};
use tabnet_rs::{TabularInput, TargetInput};

type BenchBackend = NdArray<f32>;

/// Mask generation for batch sizes typical of pretraining
fn benchmark_mask_generation(c: &mut Criterion) {
    let device = Default::default();
    let configs = vec![
        // (name, columns, categorical columns, embedding dim)
        ("continuous_only", 54, 0, 1),
        ("mixed", 54, 10, 2),
        ("wide_embeddings", 54, 10, 8),
    ];

    let mut group = c.benchmark_group("generate_mask");
    group.measurement_time(Duration::from_secs(5));

    for (name, n_columns, n_categorical, embedding_dim) in configs {
        let layout = MaskLayout::new(n_columns, (0..n_categorical).collect(), embedding_dim);
        for batch_size in [1024usize, 8192] {
            let mut masker = FeatureMasker::new(layout.clone(), 0);
            group.bench_with_input(BenchmarkId::new(name, batch_size), &batch_size, |b, &batch_size| {
                b.iter(|| black_box(masker.generate_mask::<BenchBackend>(black_box(0.2), batch_size, &device)))
            });
        }
    }

    group.finish();
}

/// Self-supervised loss terms on one masked forward pass
fn benchmark_self_supervised_losses(c: &mut Criterion) {
    let device = Default::default();
    let (x, y) = regression_array(1024, 16, 0);
    let frame = Frame::from_input(&TabularInput::Array(x)).expect("bench data");

    let mut params = small_model_params(false, &[]);
    params.column_index_map = frame.column_index_map().clone();
    let dataset = TrainingDataset::new(&frame, &TargetInput::Values(y), None, &[], &params.column_index_map)
        .expect("bench dataset");
    params.derive_dimensions(frame.n_columns(), dataset.n_output_dims());

    let model = TabNetModel::<Autodiff<BenchBackend>>::new(&params, &device);
    let mut masker = FeatureMasker::new(MaskLayout::from_params(&params), 1);
    let batch = dataset.batch::<Autodiff<BenchBackend>>(&(0..1024).collect::<Vec<_>>(), &device);

    let mut group = c.benchmark_group("self_supervised_loss");
    group.sample_size(20);
    group.bench_function("forward_and_losses", |b| {
        b.iter(|| {
            let mask = masker.generate_mask(0.2, 1024, &device);
            let output = model.forward(batch.continuous.clone(), batch.categorical.clone(), mask.clone(), true);
            let recon = reconstruction_loss(output.embedded, output.reconstruction, mask);
            black_box(recon.add(sparsity_loss(&output.step_masks, 1e-7)))
        })
    });
    group.finish();
}

criterion_group!(benches, benchmark_mask_generation, benchmark_self_supervised_losses);
criterion_main!(benches);
