use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use neural_style as ns;
use rand::{Rng, SeedableRng};
use std::time::{Duration, Instant};

fn noise(dim: u32, seed: u64) -> ns::image::RgbImage {
    let mut rng = rand_pcg::Pcg32::seed_from_u64(seed);
    ns::image::RgbImage::from_fn(dim, dim, |_, _| {
        ns::image::Rgb([rng.gen(), rng.gen(), rng.gen()])
    })
}

fn extractor(base_channels: usize) -> ns::FeatureExtractor<ns::DefaultBackend> {
    let device = Default::default();
    let network = ns::Vgg19Config::new()
        .with_base_channels(base_channels)
        .init::<ns::DefaultBackend>(&device);
    ns::FeatureExtractor::from_model(network, &ns::ExtractorConfig::default(), &device).unwrap()
}

fn short_render(c: &mut Criterion) {
    static DIM: u32 = 16;

    // Build the network and images once, only the render itself is timed
    let extractor = extractor(8);
    let content = noise(8 * DIM, 1);
    let style = noise(8 * DIM, 2);

    let mut group = c.benchmark_group("short_render");
    group.sample_size(10);

    for dim in [DIM, 2 * DIM, 4 * DIM, 8 * DIM].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(dim), dim, |b, &dim| {
            b.iter_custom(|iters| {
                let mut total_elapsed = Duration::new(0, 0);
                for _i in 0..iters {
                    let sess = ns::Session::builder()
                        .content(content.clone())
                        .style(style.clone())
                        .max_dimension(dim)
                        .epochs_without_variation(1)
                        .epochs_with_variation(1)
                        .steps_per_epoch(5)
                        .build(&extractor)
                        .unwrap();

                    let start = Instant::now();
                    black_box(sess.run(None).unwrap());
                    total_elapsed += start.elapsed();
                }

                total_elapsed
            });
        });
    }
    group.finish();
}

fn extract(c: &mut Criterion) {
    let extractor = extractor(16);
    let device = extractor.device().clone();
    let codec = ns::ImageCodec::new(64);
    let image = noise(64, 3);

    c.bench_function("extract_64", |b| {
        b.iter(|| {
            let input = codec.encode::<ns::DefaultBackend>(&image, &device).unwrap();
            black_box(extractor.extract(input))
        });
    });
}

criterion_group!(benches, short_render, extract);
criterion_main!(benches);
