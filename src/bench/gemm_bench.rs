use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use rand::Rng;
use tilegemm::{
    ElementType, GemmConfig, GemmDescriptor, GemmPlan, GroupedMatmul, KernelSerial, ProblemShape,
    Workspace,
};

fn random_matrix(len: usize) -> Vec<f32> {
    let mut rng = rand::rng();
    (0..len).map(|_| rng.random_range(-1.0..1.0)).collect()
}

fn bench_variants(c: &mut Criterion) {
    let mut group = c.benchmark_group("gemm_f32");
    for size in [128, 256, 512] {
        let shape = ProblemShape::new(size, size, size);
        let desc = GemmDescriptor::row_major(ElementType::F32, shape);
        let a = random_matrix(size * size);
        let b = random_matrix(size * size);
        let mut out = vec![0.0f32; size * size];
        group.throughput(Throughput::Elements(shape.flops() as u64));

        for serial in [KernelSerial::Common, KernelSerial::SplitK] {
            let mut config = GemmConfig::default();
            config.tiling.kernel = Some(serial);
            let Ok(plan) = GemmPlan::<f32>::exact(&desc, &config) else {
                continue;
            };
            let mut workspace = Workspace::allocate(plan.workspace_size()).unwrap();
            group.bench_with_input(BenchmarkId::new(serial.name(), size), &size, |bench, _| {
                bench.iter(|| plan.run(&a, &b, &mut out, &mut workspace).unwrap())
            });
        }
    }
    group.finish();
}

fn bench_pipeline_stages(c: &mut Criterion) {
    let mut group = c.benchmark_group("stages");
    let size = 512;
    let desc = GemmDescriptor::row_major(ElementType::F32, ProblemShape::new(size, size, size));
    let a = random_matrix(size * size);
    let b = random_matrix(size * size);
    let mut out = vec![0.0f32; size * size];

    for stages in [1, 2, 3] {
        let mut config = GemmConfig::default();
        config.pipeline.stages = stages;
        config.tiling.kernel = Some(KernelSerial::Common);
        let plan = GemmPlan::<f32>::exact(&desc, &config).unwrap();
        let mut workspace = Workspace::allocate(plan.workspace_size()).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(stages), &stages, |bench, _| {
            bench.iter(|| plan.run(&a, &b, &mut out, &mut workspace).unwrap())
        });
    }
    group.finish();
}

fn bench_grouped(c: &mut Criterion) {
    let shapes: Vec<_> = [(64, 256, 128), (200, 256, 128), (17, 256, 128), (300, 256, 128)]
        .into_iter()
        .map(|(m, n, k)| ProblemShape::new(m, n, k))
        .collect();
    let grouped = GroupedMatmul::from_shapes(&shapes);
    let a_len: usize = shapes.iter().map(|s| s.m * s.k).sum();
    let b_len: usize = shapes.iter().map(|s| s.k * s.n).sum();
    let c_len: usize = shapes.iter().map(|s| s.m * s.n).sum();
    let a = random_matrix(a_len);
    let b = random_matrix(b_len);
    let mut out = vec![0.0f32; c_len];
    let config = GemmConfig::default();

    c.bench_function("grouped_4", |bench| {
        bench.iter(|| grouped.run(&a, &b, &mut out, &config).unwrap())
    });
}

criterion_group!(benches, bench_variants, bench_pipeline_stages, bench_grouped);
criterion_main!(benches);
