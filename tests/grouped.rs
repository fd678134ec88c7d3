use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use tilegemm::matrix::{MatrixMut, MatrixRef};
use tilegemm::threaded::grouped::{GroupDesc, GroupedSchedule};
use tilegemm::{
    ErrorKind, GemmConfig, GemmError, GroupList, GroupedMatmul, Layout, ProblemShape,
    matmul_naive_ikj,
};

fn config(units: usize) -> GemmConfig {
    let mut config = GemmConfig::default();
    config.platform.compute_units = Some(units);
    config.platform.vector_units = Some(2);
    config
}

fn integer_data(len: usize, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len).map(|_| rng.random_range(-3..=3) as f32).collect()
}

/// Naive product of one group, read from and written to the shared buffers.
fn reference_group(desc: &GroupDesc, a: &[f32], b: &[f32], c: &mut [f32]) {
    let a = MatrixRef::new(&a[desc.offset_a..], desc.layout_a, 'A').unwrap();
    let b = MatrixRef::new(&b[desc.offset_b..], desc.layout_b, 'B').unwrap();
    let mut c = MatrixMut::new(&mut c[desc.offset_c..], desc.layout_c, 'C').unwrap();
    matmul_naive_ikj(&a, &b, &mut c);
}

fn check_grouped(grouped: &GroupedMatmul, a_len: usize, b_len: usize, c_len: usize, units: usize) {
    let a = integer_data(a_len, 1);
    let b = integer_data(b_len, 2);
    let mut expected = vec![5.0f32; c_len];
    for desc in grouped.groups() {
        reference_group(desc, &a, &b, &mut expected);
    }

    let mut actual = vec![5.0f32; c_len];
    grouped.run(&a, &b, &mut actual, &config(units)).unwrap();

    assert_eq!(expected, actual);
}

// ============================================================
// Unit rotation across groups
// ============================================================

#[test]
fn test_start_core_carries_over() {
    let schedule = GroupedSchedule::new(vec![6, 3, 5], 4);

    let starts: Vec<usize> = (0..3).map(|g| schedule.start_core(g)).collect();
    assert_eq!(starts, vec![0, 2, 1]);

    let unit0: Vec<(usize, usize)> = schedule.unit_tasks(0).collect();
    assert_eq!(unit0, vec![(0, 0), (0, 4), (1, 2), (2, 3)]);
    let unit2: Vec<(usize, usize)> = schedule.unit_tasks(2).collect();
    assert_eq!(unit2, vec![(0, 2), (1, 0), (2, 1)]);
}

#[test]
fn test_many_single_tile_groups_spread_over_units() {
    // Without carry-over every group would start on unit 0.
    let schedule = GroupedSchedule::new(vec![1; 10], 4);
    let counts: Vec<usize> = (0..4).map(|u| schedule.assigned(u)).collect();
    assert_eq!(counts, vec![3, 3, 2, 2]);
}

proptest! {
    #[test]
    fn schedule_is_balanced_round_robin(
        loops in prop::collection::vec(0usize..20, 1..8),
        units in 1usize..12,
    ) {
        let schedule = GroupedSchedule::new(loops.clone(), units);
        let total: usize = loops.iter().sum();
        prop_assert_eq!(schedule.total_loops(), total);

        for g in 0..loops.len() - 1 {
            prop_assert_eq!(schedule.start_core(g + 1), (schedule.start_core(g) + loops[g]) % units);
        }

        let prefix: Vec<usize> = loops.iter().scan(0, |acc, &l| { let start = *acc; *acc += l; Some(start) }).collect();
        let mut seen = HashSet::new();
        let mut counts = Vec::with_capacity(units);
        for unit in 0..units {
            let tasks: Vec<(usize, usize)> = schedule.unit_tasks(unit).collect();
            prop_assert_eq!(tasks.len(), schedule.assigned(unit));
            for &(g, t) in &tasks {
                prop_assert!(t < loops[g]);
                prop_assert_eq!((prefix[g] + t) % units, unit);
                prop_assert!(seen.insert((g, t)));
            }
            counts.push(tasks.len());
        }
        prop_assert_eq!(seen.len(), total);

        let max = counts.iter().copied().max().unwrap_or(0);
        let min = counts.iter().copied().min().unwrap_or(0);
        prop_assert!(max - min <= 1, "counts {:?}", counts);
    }
}

// ============================================================
// Group lists
// ============================================================

#[test]
fn test_group_list_ranges() {
    let list = GroupList::new(vec![3, 3, 10], 3, 10).unwrap();
    assert_eq!(list.range(0), 0..3);
    assert_eq!(list.range(1), 3..3);
    assert_eq!(list.range(2), 3..10);
    assert_eq!(list.sizes().collect::<Vec<_>>(), vec![3, 0, 7]);
    assert_eq!(GroupList::from_sizes(&[3, 0, 7]), list);
}

#[test]
fn test_group_list_rejections() {
    let err = GroupList::new(vec![3, 10], 3, 10).unwrap_err();
    assert!(matches!(err, GemmError::GroupListLength { expected: 3, actual: 2 }));

    let err = GroupList::new(vec![4, 2, 10], 3, 10).unwrap_err();
    assert!(matches!(err, GemmError::GroupListNotMonotonic { index: 1, previous: 4, current: 2 }));

    let err = GroupList::new(vec![2, 4, 9], 3, 10).unwrap_err();
    assert!(matches!(err, GemmError::GroupListTotal { expected: 10, actual: 9 }));
    assert_eq!(err.kind(), ErrorKind::Argument);
}

// ============================================================
// Grouped correctness
// ============================================================

#[test]
fn test_grouped_mixed_shapes() {
    let shapes = [
        ProblemShape::new(130, 40, 70),
        ProblemShape::new(1, 1, 1),
        ProblemShape::new(17, 300, 9),
        ProblemShape::new(64, 64, 600),
    ];
    let grouped = GroupedMatmul::from_shapes(&shapes);
    let a_len = shapes.iter().map(|s| s.m * s.k).sum();
    let b_len = shapes.iter().map(|s| s.k * s.n).sum();
    let c_len = shapes.iter().map(|s| s.m * s.n).sum();

    for units in [1, 3, 8] {
        check_grouped(&grouped, a_len, b_len, c_len, units);
    }
}

#[test]
fn test_grouped_zero_k_group_is_zeroed() {
    let shapes = [ProblemShape::new(8, 8, 8), ProblemShape::new(4, 5, 0)];
    let grouped = GroupedMatmul::from_shapes(&shapes);
    let mut c = vec![5.0f32; 64 + 20];

    grouped
        .run(&integer_data(64, 3), &integer_data(64, 4), &mut c, &config(2))
        .unwrap();

    assert!(c[64..].iter().all(|&x| x == 0.0));
}

#[test]
fn test_slice_m_groups() {
    let (n, k) = (50, 37);
    let list = GroupList::new(vec![10, 10, 45, 200], 4, 200).unwrap();
    let grouped = GroupedMatmul::slice_m(&list, n, k);
    grouped.can_implement().unwrap();

    check_grouped(&grouped, 200 * k, 4 * k * n, 200 * n, 4);
}

#[test]
fn test_slice_k_groups() {
    let (m, n) = (33, 70);
    let list = GroupList::new(vec![100, 100, 129], 3, 129).unwrap();
    let grouped = GroupedMatmul::slice_k(&list, m, n);
    grouped.can_implement().unwrap();

    let mut c = vec![5.0f32; 3 * m * n];
    grouped
        .run(&integer_data(m * 129, 5), &integer_data(129 * n, 6), &mut c, &config(3))
        .unwrap();
    assert!(c[m * n..2 * m * n].iter().all(|&x| x == 0.0), "empty K slice must be zeroed");

    check_grouped(&grouped, m * 129, 129 * n, 3 * m * n, 3);
}

#[test]
fn test_uniform_groups_keep_their_layouts() {
    let shape = ProblemShape::new(19, 23, 29);
    let grouped = GroupedMatmul::uniform(
        3,
        shape,
        Layout::column_major(19, 29),
        Layout::row_major_with_stride(29, 23, 30),
        Layout::column_major(19, 23),
    );
    grouped.can_implement().unwrap();
    assert_eq!(grouped.groups()[2].offset_b, 2 * (28 * 30 + 23));
    assert_eq!(grouped.groups()[1].layout_c, Layout::column_major(19, 23));

    check_grouped(&grouped, 3 * 19 * 29, 3 * (28 * 30 + 23), 3 * 19 * 23, 4);
}

// ============================================================
// Argument checks
// ============================================================

#[test]
fn test_overlapping_outputs_rejected() {
    let shape = ProblemShape::new(4, 4, 4);
    let group = |offset_c| GroupDesc {
        shape,
        layout_a: Layout::row_major(4, 4),
        layout_b: Layout::row_major(4, 4),
        layout_c: Layout::row_major(4, 4),
        offset_a: 0,
        offset_b: 0,
        offset_c,
    };

    let grouped = GroupedMatmul::new(vec![group(0), group(16), group(10)]);
    let err = grouped.can_implement().unwrap_err();
    assert!(matches!(err, GemmError::OverlappingOutput { .. }));

    // Shared A and B are fine.
    GroupedMatmul::new(vec![group(0), group(16)]).can_implement().unwrap();
}

#[test]
fn test_group_shape_mismatch() {
    let grouped = GroupedMatmul::new(vec![GroupDesc {
        shape: ProblemShape::new(4, 4, 4),
        layout_a: Layout::row_major(4, 3),
        layout_b: Layout::row_major(4, 4),
        layout_c: Layout::row_major(4, 4),
        offset_a: 0,
        offset_b: 0,
        offset_c: 0,
    }]);
    let err = grouped.can_implement().unwrap_err();
    assert!(matches!(err, GemmError::ShapeMismatch { operand: 'A', .. }));
}

#[test]
fn test_grouped_output_too_small() {
    let grouped = GroupedMatmul::from_shapes(&[ProblemShape::new(4, 4, 4), ProblemShape::new(4, 4, 4)]);
    let err = grouped
        .run(&[1.0f32; 32], &[1.0f32; 32], &mut [0.0f32; 20], &config(2))
        .unwrap_err();
    assert!(matches!(err, GemmError::BufferTooSmall { operand: 'C', .. }));
}
