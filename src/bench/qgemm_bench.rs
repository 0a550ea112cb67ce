use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use rand::Rng;
use std::hint::black_box;
use tlgemm::dispatch::BITNET_SHAPES;
use tlgemm::{DispatchConfig, Dispatcher, lut_len, pack_ternary};

fn bench_qgemm(c: &mut Criterion) {
    let dispatcher = Dispatcher::new(DispatchConfig::default()).unwrap();
    let mut rng = rand::thread_rng();
    let mut group = c.benchmark_group("qgemm");
    group.sample_size(20);

    for shape in BITNET_SHAPES {
        let (m, k) = (shape.m, shape.k);
        let weights: Vec<i8> = (0..m * k).map(|_| rng.gen_range(-1..=1)).collect();
        let activations: Vec<f32> = (0..k).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let packed = pack_ternary(&weights, m, k).unwrap();
        let mut lut = vec![0i16; lut_len(k)];
        let (scale, _) = dispatcher.preprocess(m, &activations, &mut lut).unwrap();
        let mut out = vec![0.0f32; m];
        let label = format!("{}x{}", m, k);

        group.bench_with_input(BenchmarkId::new("serial", &label), &(), |b, _| {
            b.iter(|| {
                dispatcher
                    .qgemm_serial(m, k, black_box(&packed), black_box(&lut), 1.0, scale, &mut out)
                    .unwrap()
            })
        });
        group.bench_with_input(BenchmarkId::new("k_blocks", &label), &(), |b, _| {
            b.iter(|| {
                dispatcher
                    .qgemm(m, k, black_box(&packed), black_box(&lut), 1.0, scale, &mut out)
                    .unwrap()
            })
        });
        group.bench_with_input(BenchmarkId::new("tiles", &label), &(), |b, _| {
            b.iter(|| {
                dispatcher
                    .qgemm_tiled(m, k, black_box(&packed), black_box(&lut), 1.0, scale, &mut out)
                    .unwrap()
            })
        });
        group.bench_with_input(BenchmarkId::new("preprocess", &label), &(), |b, _| {
            b.iter(|| dispatcher.preprocess(m, black_box(&activations), &mut lut).unwrap())
        });
    }

    group.finish();
}

criterion_group!(benches, bench_qgemm);
criterion_main!(benches);
