use half::f16;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tilegemm::matrix::naive_ikj::matmul_naive_row_major;
use tilegemm::matrix::{MatrixMut, MatrixRef};
use tilegemm::padding::policy::PaddingTag;
use tilegemm::{
    BatchedMatmul, Element, ElementType, ErrorKind, GemmConfig, GemmDescriptor, GemmError,
    GemmPlan, KernelSerial, Layout, LayoutTag, ProblemShape, TileShape, Workspace,
    matmul_naive_ikj, multiply,
};

fn config(units: usize, kernel: Option<KernelSerial>, shuffle_k: bool) -> GemmConfig {
    let mut config = GemmConfig::default();
    config.platform.compute_units = Some(units);
    config.platform.vector_units = Some(2);
    config.tiling.kernel = kernel;
    config.pipeline.shuffle_k = shuffle_k;
    config
}

fn random_data<T: Element>(len: usize, seed: u64) -> Vec<T> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len).map(|_| T::from_f64(rng.random_range(-1.0..1.0))).collect()
}

/// Small integers: every partial sum is exact, whatever the summation order.
fn integer_data<T: Element>(len: usize, seed: u64) -> Vec<T> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len).map(|_| T::from_f64(rng.random_range(-4..=4) as f64)).collect()
}

fn reference<T: Element>(desc: &GemmDescriptor, a: &[T], b: &[T], c_init: &[T]) -> Vec<T> {
    let mut c = c_init.to_vec();
    let a = MatrixRef::new(a, desc.layout_a, 'A').unwrap();
    let b = MatrixRef::new(b, desc.layout_b, 'B').unwrap();
    let mut c_view = MatrixMut::new(&mut c, desc.layout_c, 'C').unwrap();
    matmul_naive_ikj(&a, &b, &mut c_view);
    c
}

fn run_plan<T: Element>(
    desc: &GemmDescriptor,
    config: &GemmConfig,
    a: &[T],
    b: &[T],
    c_init: &[T],
) -> (Vec<T>, GemmPlan<T>) {
    let plan = GemmPlan::<T>::new(desc, config).unwrap();
    let mut workspace = Workspace::allocate(plan.workspace_size()).unwrap();
    let mut c = c_init.to_vec();
    plan.run(a, b, &mut c, &mut workspace).unwrap();
    (c, plan)
}

fn assert_bits_equal<T: Element>(expected: &[T], actual: &[T], name: &str) {
    assert_eq!(expected.len(), actual.len(), "{}: length mismatch", name);
    for i in 0..expected.len() {
        assert_eq!(
            expected[i].to_f64().to_bits(),
            actual[i].to_f64().to_bits(),
            "{}: mismatch at index {}: expected {:?}, got {:?}",
            name,
            i,
            expected[i],
            actual[i]
        );
    }
}

/// Runs `desc` under `config` on random data and checks it bit for bit against the naive reference.
fn check_bit_identical<T: Element>(desc: &GemmDescriptor, config: &GemmConfig, seed: u64) -> GemmPlan<T> {
    let a = random_data::<T>(desc.layout_a.capacity(), seed);
    let b = random_data::<T>(desc.layout_b.capacity(), seed + 1);
    let c_init = vec![T::default(); desc.layout_c.capacity()];
    let expected = reference(desc, &a, &b, &c_init);
    let (actual, plan) = run_plan(desc, config, &a, &b, &c_init);
    assert_bits_equal(&expected, &actual, &format!("{} {}", desc.shape, plan.kernel_name()));
    plan
}

fn check_exact<T: Element>(desc: &GemmDescriptor, config: &GemmConfig, seed: u64) -> GemmPlan<T> {
    let a = integer_data::<T>(desc.layout_a.capacity(), seed);
    let b = integer_data::<T>(desc.layout_b.capacity(), seed + 1);
    let c_init = vec![T::default(); desc.layout_c.capacity()];
    let expected = reference(desc, &a, &b, &c_init);
    let (actual, plan) = run_plan(desc, config, &a, &b, &c_init);
    assert_bits_equal(&expected, &actual, &format!("{} {}", desc.shape, plan.kernel_name()));
    plan
}

fn row_major<T: Element>(m: usize, n: usize, k: usize) -> GemmDescriptor {
    GemmDescriptor::row_major(T::TYPE, ProblemShape::new(m, n, k))
}

// ============================================================
// Small matrix tests
// ============================================================

#[test]
fn test_2x2_multiply() {
    let a = vec![1.0f64, 2.0, 3.0, 4.0];
    let b = vec![5.0f64, 6.0, 7.0, 8.0];
    let mut c = vec![0.0f64; 4];

    multiply(&a, &b, &mut c, 2, 2, 2).unwrap();

    assert_eq!(c, vec![19.0, 22.0, 43.0, 50.0]);
}

#[test]
fn test_multiply_matches_row_major_reference() {
    let (m, n, k) = (33, 65, 129);
    let a = random_data::<f64>(m * k, 3);
    let b = random_data::<f64>(k * n, 4);
    let mut expected = vec![0.0f64; m * n];
    let mut actual = vec![0.0f64; m * n];

    matmul_naive_row_major(&a, &b, &mut expected, m, n, k);
    multiply(&a, &b, &mut actual, m, n, k).unwrap();

    for (e, x) in expected.iter().zip(&actual) {
        assert!((e - x).abs() < 1e-9, "expected {}, got {}", e, x);
    }
}

#[test]
fn test_2x3_times_3x2() {
    let a = vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0]; // 2x3
    let b = vec![7.0f32, 8.0, 9.0, 10.0, 11.0, 12.0]; // 3x2
    let desc = row_major::<f32>(2, 2, 3);

    let (c, _) = run_plan(&desc, &config(4, None, true), &a, &b, &[0.0; 4]);

    assert_eq!(c, vec![58.0, 64.0, 139.0, 154.0]);
}

#[test]
fn test_small_odd_sizes() {
    let test_sizes = [
        (3, 3, 3),
        (5, 5, 5),
        (7, 7, 7),
        (3, 5, 7),
        (7, 3, 5),
        (11, 13, 17),
    ];

    for (m, n, k) in test_sizes {
        check_exact::<f32>(&row_major::<f32>(m, n, k), &config(4, None, true), 7);
    }
}

// ============================================================
// Bit identity against the naive reference (shuffle-K off)
// ============================================================

#[test]
fn test_bit_identical_reference_shapes() {
    let config = config(4, Some(KernelSerial::Common), false);
    for (m, n, k) in [(1, 1, 1), (127, 129, 33), (128, 4096, 256), (1024, 1024, 1024)] {
        check_bit_identical::<f32>(&row_major::<f32>(m, n, k), &config, 11);
    }
}

#[test]
fn test_bit_identical_aligned_and_unaligned() {
    let config = config(3, Some(KernelSerial::Common), false);
    for (m, n, k) in [(16, 16, 16), (128, 128, 512), (17, 31, 600), (200, 8, 9), (33, 300, 129)] {
        check_bit_identical::<f32>(&row_major::<f32>(m, n, k), &config, 23);
    }
}

#[test]
fn test_bit_identical_many_k_tiles() {
    // Small L1 tiles force several K sub-tiles and a partial last one per block.
    let mut config = config(4, Some(KernelSerial::Common), false);
    config.tiling.l1_tile = Some(TileShape::new(32, 48, 40));
    for stages in [1, 2, 3] {
        config.pipeline.stages = stages;
        check_bit_identical::<f32>(&row_major::<f32>(70, 100, 333), &config, 5);
    }
}

#[test]
fn test_bit_identical_all_layout_orders() {
    let config = config(4, Some(KernelSerial::Common), false);
    let shape = ProblemShape::new(37, 45, 70);
    let orders = [LayoutTag::RowMajor, LayoutTag::ColumnMajor];
    for a in orders {
        for b in orders {
            for c in orders {
                let desc = GemmDescriptor::dense(ElementType::F32, shape, a, b, c);
                let plan = check_bit_identical::<f32>(&desc, &config, 3);
                assert_eq!(plan.key().layout_a, a);
                assert_eq!(plan.key().layout_c, c);
            }
        }
    }
}

#[test]
fn test_bit_identical_f16_and_f64() {
    let config = config(4, Some(KernelSerial::Common), false);
    check_bit_identical::<f16>(&row_major::<f16>(65, 70, 300), &config, 13);
    check_bit_identical::<f64>(&row_major::<f64>(65, 70, 300), &config, 13);
    check_bit_identical::<f64>(&row_major::<f64>(130, 3, 77), &config, 17);
}

#[test]
fn test_bit_identical_padding_pass() {
    let mut config = config(4, None, false);
    config.tiling.padding_a = Some(PaddingTag::Nd);
    config.tiling.padding_b = Some(PaddingTag::BlockNd);
    config.tiling.padding_c = Some(PaddingTag::Nd);

    let plan = check_bit_identical::<f32>(&row_major::<f32>(100, 90, 77), &config, 31);

    assert_eq!(plan.key().kernel, KernelSerial::PaddingCommon);
    assert_eq!(plan.key().padding_a, PaddingTag::Nd);
    assert_eq!(plan.key().padding_b, PaddingTag::BlockNd);
    assert_eq!(plan.key().padding_c, PaddingTag::Nd);
    assert!(plan.workspace_size().a > 0 && plan.workspace_size().c > 0);
}

#[test]
fn test_bit_identical_fractal_padding() {
    let mut config = config(2, None, false);
    config.tiling.padding_a = Some(PaddingTag::Nz);
    config.tiling.padding_b = Some(PaddingTag::Nz);
    let desc = GemmDescriptor::dense(
        ElementType::F32,
        ProblemShape::new(40, 50, 60),
        LayoutTag::ColumnMajor,
        LayoutTag::RowMajor,
        LayoutTag::RowMajor,
    );

    let plan = check_bit_identical::<f32>(&desc, &config, 37);

    assert_eq!(plan.key().padding_a, PaddingTag::Nz);
    assert_eq!(plan.params().padding_a.layout.tag, LayoutTag::Zn);
    assert_eq!(plan.params().padding_b.layout.tag, LayoutTag::Nz);
}

// ============================================================
// Shuffle-K and split-K (exact with integer data)
// ============================================================

#[test]
fn test_shuffle_k_exact_with_integer_data() {
    let mut config = config(4, Some(KernelSerial::Common), true);
    config.tiling.l1_tile = Some(TileShape::new(32, 32, 64));
    check_exact::<f32>(&row_major::<f32>(64, 64, 1000), &config, 41);
    check_exact::<f64>(&row_major::<f64>(50, 90, 333), &config, 43);
}

#[test]
fn test_split_k_exact_with_integer_data() {
    let mut config = config(16, Some(KernelSerial::SplitK), true);
    config.tiling.l1_tile = Some(TileShape::new(32, 32, 64));

    let plan = check_exact::<f32>(&row_major::<f32>(20, 20, 900), &config, 47);

    assert_eq!(plan.key().kernel, KernelSerial::SplitK);
    assert_eq!(plan.params().split_k, 15);
    assert_eq!(plan.workspace_size().partial, 15 * 20 * 20);
}

#[test]
fn test_split_k_uneven_slices() {
    // 2 tiles, 8 units: split 4 over 7 K tiles of which the last is partial.
    let mut config = config(8, Some(KernelSerial::SplitK), false);
    config.tiling.l1_tile = Some(TileShape::new(16, 16, 16));
    let desc = GemmDescriptor::dense(
        ElementType::F64,
        ProblemShape::new(30, 16, 100),
        LayoutTag::ColumnMajor,
        LayoutTag::RowMajor,
        LayoutTag::ColumnMajor,
    );

    let plan = check_exact::<f64>(&desc, &config, 53);

    assert_eq!(plan.params().split_k, 4);
}

#[test]
fn test_split_k_selected_automatically() {
    let mut config = config(8, None, true);
    config.tiling.l1_tile = Some(TileShape::new(32, 32, 32));

    let plan = check_exact::<f32>(&row_major::<f32>(32, 32, 512), &config, 59);

    assert_eq!(plan.key().kernel, KernelSerial::SplitK);
    assert_eq!(plan.params().split_k, 8);
    assert_eq!(plan.params().block_dim, 8);
}

#[test]
fn test_small_kernel_one_tile_per_unit() {
    let plan = check_exact::<f32>(&row_major::<f32>(200, 130, 70), &config(8, None, true), 61);

    assert_eq!(plan.key().kernel, KernelSerial::Small);
    assert_eq!(plan.params().block_dim, 4);
}

#[test]
fn test_common_kernel_more_tiles_than_units() {
    let plan = check_exact::<f32>(&row_major::<f32>(300, 300, 40), &config(2, None, true), 67);

    assert_eq!(plan.key().kernel, KernelSerial::Common);
    assert_eq!(plan.params().block_dim, 2);
}

// ============================================================
// Edge cases
// ============================================================

#[test]
fn test_zero_k_writes_zeros() {
    let desc = row_major::<f32>(5, 6, 0);
    let (c, _) = run_plan::<f32>(&desc, &config(4, None, true), &[], &[], &[9.0; 30]);

    assert!(c.iter().all(|&x| x == 0.0));
}

#[test]
fn test_zero_k_split_k_writes_zeros() {
    let desc = row_major::<f64>(5, 6, 0);
    let (c, _) = run_plan::<f64>(&desc, &config(4, Some(KernelSerial::SplitK), true), &[], &[], &[9.0; 30]);

    assert!(c.iter().all(|&x| x == 0.0));
}

#[test]
fn test_empty_output_is_noop() {
    let desc = row_major::<f32>(0, 6, 4);
    let b = vec![1.0f32; 24];
    let (c, _) = run_plan(&desc, &config(4, None, true), &[], &b, &[]);

    assert!(c.is_empty());
}

#[test]
fn test_vector_operands_are_normalized() {
    // m == 1 with a column-major A, n == 1 with a row-major B.
    let desc = GemmDescriptor::dense(
        ElementType::F32,
        ProblemShape::new(1, 40, 300),
        LayoutTag::ColumnMajor,
        LayoutTag::RowMajor,
        LayoutTag::ColumnMajor,
    );
    let plan = check_exact::<f32>(&desc, &config(4, None, true), 71);
    assert_eq!(plan.key().layout_a, LayoutTag::RowMajor);
    assert_eq!(plan.key().layout_c, LayoutTag::RowMajor);

    let desc = GemmDescriptor::dense(
        ElementType::F32,
        ProblemShape::new(40, 1, 300),
        LayoutTag::RowMajor,
        LayoutTag::RowMajor,
        LayoutTag::RowMajor,
    );
    let plan = check_exact::<f32>(&desc, &config(4, None, true), 73);
    assert_eq!(plan.key().layout_b, LayoutTag::ColumnMajor);
    assert_eq!(plan.key().layout_c, LayoutTag::ColumnMajor);
}

#[test]
fn test_strided_output_keeps_gaps() {
    let shape = ProblemShape::new(20, 10, 30);
    let desc = GemmDescriptor::new(
        ElementType::F32,
        shape,
        Layout::row_major_with_stride(20, 30, 35),
        Layout::column_major_with_stride(30, 10, 33),
        Layout::row_major_with_stride(20, 10, 16),
    );
    let a = integer_data::<f32>(desc.layout_a.capacity(), 79);
    let b = integer_data::<f32>(desc.layout_b.capacity(), 83);
    let c_init = vec![-7.5f32; desc.layout_c.capacity()];

    let expected = reference(&desc, &a, &b, &c_init);
    let (actual, _) = run_plan(&desc, &config(3, None, true), &a, &b, &c_init);

    assert_eq!(expected, actual);
    assert_eq!(actual[10], -7.5, "gap between rows was overwritten");
}

#[test]
fn test_unaddressable_stride_takes_padding_path() {
    let shape = ProblemShape::new(3, 8, 16);
    let desc = GemmDescriptor::new(
        ElementType::F32,
        shape,
        Layout::row_major_with_stride(3, 16, 70_000),
        Layout::row_major(16, 8),
        Layout::row_major(3, 8),
    );

    let plan = check_exact::<f32>(&desc, &config(4, None, true), 89);

    assert_eq!(plan.key().kernel, KernelSerial::PaddingCommon);
    assert_ne!(plan.key().padding_a, PaddingTag::None);
}

#[test]
fn test_wide_output_beyond_stride_limit() {
    // B and C rows are 70000 elements long; only B has to be padded.
    let (m, n, k) = (2, 70_000, 1);
    let a = vec![3.0f32, -2.0];
    let b: Vec<f32> = (0..n).map(|j| (j % 97) as f32).collect();
    let mut expected = vec![0.0f32; m * n];
    let mut actual = vec![1.0f32; m * n];

    matmul_naive_row_major(&a, &b, &mut expected, m, n, k);
    multiply(&a, &b, &mut actual, m, n, k).unwrap();
    assert_bits_equal(&expected, &actual, "2x70000x1");

    let plan = GemmPlan::<f32>::new(&row_major::<f32>(m, n, k), &config(4, None, true)).unwrap();
    assert_eq!(plan.key().kernel, KernelSerial::PaddingCommon);
    assert_eq!(plan.key().padding_b, PaddingTag::BlockNd);
    assert_eq!(plan.key().padding_c, PaddingTag::None);
}

#[test]
fn test_unaddressable_output_stride_is_written_directly() {
    let desc = GemmDescriptor::new(
        ElementType::F32,
        ProblemShape::new(3, 8, 16),
        Layout::row_major(3, 16),
        Layout::row_major(16, 8),
        Layout::row_major_with_stride(3, 8, 70_000),
    );
    let mut config = config(2, Some(KernelSerial::Common), true);
    config.tiling.padding_c = Some(PaddingTag::None);

    let plan = check_exact::<f32>(&desc, &config, 91);
    assert_eq!(plan.key().kernel, KernelSerial::Common);
}

#[test]
fn test_fallback_reports_the_selected_kernel_error() {
    // Blocked A is never repacked, so every fallback rejects its stride too.
    let desc = GemmDescriptor::new(
        ElementType::F32,
        ProblemShape::new(48, 48, 16),
        Layout::zn(48, 16, 16, 70_000),
        Layout::row_major(16, 48),
        Layout::row_major(48, 48),
    );
    let config = config(2, Some(KernelSerial::Small), true);

    let err = GemmPlan::<f32>::new(&desc, &config).unwrap_err();
    assert!(matches!(err, GemmError::Unsupported { kernel: "small", .. }), "{err}");
}

#[test]
fn test_forced_common_falls_back_to_padding() {
    let desc = GemmDescriptor::new(
        ElementType::F32,
        ProblemShape::new(3, 8, 16),
        Layout::row_major_with_stride(3, 16, 70_000),
        Layout::row_major(16, 8),
        Layout::row_major(3, 8),
    );
    let config = config(4, Some(KernelSerial::Common), true);

    let exact = GemmPlan::<f32>::exact(&desc, &config).unwrap_err();
    assert_eq!(exact.kind(), ErrorKind::Capability);

    let plan = check_exact::<f32>(&desc, &config, 97);
    assert_eq!(plan.key().kernel, KernelSerial::PaddingCommon);
    assert_eq!(plan.key().padding_a, PaddingTag::BlockNd);
}

// ============================================================
// Batched
// ============================================================

#[test]
fn test_batched_matches_per_entry_reference() {
    let shape = ProblemShape::new(45, 70, 50);
    let batched = BatchedMatmul::new(3, shape);
    let a = integer_data::<f32>(3 * 45 * 50, 101);
    let b = integer_data::<f32>(3 * 50 * 70, 103);
    let mut c = vec![0.0f32; 3 * 45 * 70];

    batched.run(&a, &b, &mut c, &config(4, None, true)).unwrap();

    let desc = row_major::<f32>(45, 70, 50);
    for i in 0..3 {
        let expected = reference(
            &desc,
            &a[i * 45 * 50..(i + 1) * 45 * 50],
            &b[i * 50 * 70..(i + 1) * 50 * 70],
            &[0.0; 45 * 70],
        );
        assert_eq!(&c[i * 45 * 70..(i + 1) * 45 * 70], &expected[..], "batch {}", i);
    }
}

#[test]
fn test_batched_rejects_overlapping_outputs() {
    let mut batched = BatchedMatmul::new(2, ProblemShape::new(4, 4, 4));
    batched.stride_c = 8;
    let err = batched
        .run(&[0.0f32; 32], &[0.0f32; 32], &mut [0.0f32; 32], &config(2, None, true))
        .unwrap_err();
    assert!(matches!(err, GemmError::OverlappingOutput { .. }));
}

// ============================================================
// Argument and resource errors
// ============================================================

#[test]
fn test_element_mismatch() {
    let desc = row_major::<f64>(4, 4, 4);
    let err = GemmPlan::<f32>::new(&desc, &config(2, None, true)).unwrap_err();
    assert!(matches!(err, GemmError::ElementMismatch { .. }));
    assert_eq!(err.kind(), ErrorKind::Argument);
}

#[test]
fn test_shape_mismatch() {
    let desc = GemmDescriptor::new(
        ElementType::F32,
        ProblemShape::new(4, 4, 4),
        Layout::row_major(4, 5),
        Layout::row_major(4, 4),
        Layout::row_major(4, 4),
    );
    let err = GemmPlan::<f32>::new(&desc, &config(2, None, true)).unwrap_err();
    assert!(matches!(err, GemmError::ShapeMismatch { operand: 'A', .. }));
}

#[test]
fn test_overlapping_output_layout_rejected() {
    // Stride 1 folds every row of C onto its neighbours.
    let layout_c = Layout {
        stride: 1,
        ..Layout::row_major(64, 64)
    };
    let desc = GemmDescriptor::new(
        ElementType::F32,
        ProblemShape::new(64, 64, 64),
        Layout::row_major(64, 64),
        Layout::row_major(64, 64),
        layout_c,
    );
    let mut config = config(8, None, true);
    config.tiling.l1_tile = Some(TileShape::new(16, 16, 16));

    let err = GemmPlan::<f32>::new(&desc, &config).unwrap_err();
    assert!(matches!(err, GemmError::InvalidLayout { operand: 'C', .. }), "{err}");
    assert_eq!(err.kind(), ErrorKind::Argument);
}

#[test]
fn test_blocked_layout_with_foreign_stride_rejected() {
    let layout_a = Layout {
        stride: 3,
        ..Layout::padding_row_major(32, 32, 16, 16)
    };
    assert!(Layout::padding_row_major(32, 32, 16, 16).validate('A').is_ok());
    assert!(matches!(layout_a.validate('A'), Err(GemmError::InvalidLayout { operand: 'A', .. })));

    let zn = Layout {
        stride: 8,
        ..Layout::zn(32, 32, 16, 8)
    };
    assert!(zn.validate('A').is_err());
    assert!(Layout::column_major_with_stride(4, 4, 9).validate('B').is_ok());

    let batched = BatchedMatmul {
        layout_b: Layout {
            stride: 3,
            ..Layout::column_major(4, 4)
        },
        ..BatchedMatmul::new(2, ProblemShape::new(4, 4, 4))
    };
    let err = batched.can_implement().unwrap_err();
    assert!(matches!(err, GemmError::InvalidLayout { operand: 'B', .. }), "{err}");
}

#[test]
fn test_buffer_too_small() {
    let desc = row_major::<f32>(4, 4, 4);
    let plan = GemmPlan::<f32>::new(&desc, &config(2, None, true)).unwrap();
    let mut workspace = Workspace::allocate(plan.workspace_size()).unwrap();
    let err = plan
        .run(&[1.0; 15], &[1.0; 16], &mut [0.0; 16], &mut workspace)
        .unwrap_err();
    assert!(matches!(err, GemmError::BufferTooSmall { operand: 'A', required: 16, len: 15 }));
}

#[test]
fn test_workspace_too_small() {
    let mut config = config(16, Some(KernelSerial::SplitK), true);
    config.tiling.l1_tile = Some(TileShape::new(16, 16, 16));
    let desc = row_major::<f32>(16, 16, 64);
    let plan = GemmPlan::<f32>::new(&desc, &config).unwrap();
    assert!(plan.workspace_size().partial > 0);

    let err = plan
        .run(&[1.0; 1024], &[1.0; 1024], &mut [0.0; 256], &mut Workspace::empty())
        .unwrap_err();
    assert!(matches!(err, GemmError::WorkspaceTooSmall { .. }));
    assert_eq!(err.kind(), ErrorKind::Resource);
}
