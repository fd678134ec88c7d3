use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use tilegemm::blocked::block_mmad::{BlockMmad, BlockTask, OperandSet};
use tilegemm::blocked::swizzle::{BlockSwizzle, SplitkBlockSwizzle, SwizzleConfig, SwizzleDirection};
use tilegemm::matrix::MatrixRef;
use tilegemm::matrix::shape::BlockCoord;
use tilegemm::threaded::launch::launch_units;
use tilegemm::{ErrorKind, GemmError, Layout, ProblemShape, TileShape};

fn direction() -> impl Strategy<Value = SwizzleDirection> {
    prop_oneof![Just(SwizzleDirection::RowBand), Just(SwizzleDirection::ColumnBand)]
}

/// Task order of a `rows × cols` grid of unit tiles, as a grid of task indices.
fn task_grid(rows: usize, cols: usize, swizzle: SwizzleConfig) -> Vec<Vec<usize>> {
    let sched = BlockSwizzle::new(
        ProblemShape::new(rows, cols, 1),
        TileShape::new(1, 1, 1),
        swizzle,
    )
    .unwrap();
    let mut grid = vec![vec![usize::MAX; cols]; rows];
    for task in 0..sched.core_loops() {
        let coord = sched.block_coord(task);
        grid[coord.row][coord.col] = task;
    }
    grid
}

// ============================================================
// Block swizzle
// ============================================================

#[test]
fn test_row_band_serpentine_order() {
    let grid = task_grid(5, 4, SwizzleConfig::new(2, SwizzleDirection::RowBand));
    assert_eq!(
        grid,
        vec![
            vec![0, 2, 4, 6],
            vec![1, 3, 5, 7],
            vec![14, 12, 10, 8],
            vec![15, 13, 11, 9],
            vec![16, 17, 18, 19],
        ]
    );
}

#[test]
fn test_column_band_serpentine_order() {
    let grid = task_grid(4, 5, SwizzleConfig::new(2, SwizzleDirection::ColumnBand));
    assert_eq!(
        grid,
        vec![
            vec![0, 1, 14, 15, 16],
            vec![2, 3, 12, 13, 17],
            vec![4, 5, 10, 11, 18],
            vec![6, 7, 8, 9, 19],
        ]
    );
}

#[test]
fn test_identity_swizzle_is_row_major() {
    let grid = task_grid(3, 4, SwizzleConfig::identity());
    assert_eq!(grid[0], vec![0, 1, 2, 3]);
    assert_eq!(grid[2], vec![8, 9, 10, 11]);
}

#[test]
fn test_edge_tiles_are_clipped() {
    let sched = BlockSwizzle::new(
        ProblemShape::new(130, 70, 33),
        TileShape::new(64, 32, 16),
        SwizzleConfig::identity(),
    )
    .unwrap();

    assert_eq!(sched.loops(), (3, 3));
    assert_eq!(sched.actual_block_shape(BlockCoord::new(0, 0, 0)), TileShape::new(64, 32, 33));
    assert_eq!(sched.actual_block_shape(BlockCoord::new(2, 2, 0)), TileShape::new(2, 6, 33));
}

#[test]
fn test_empty_problem_has_no_tasks() {
    let sched = BlockSwizzle::new(
        ProblemShape::new(0, 70, 33),
        TileShape::new(64, 32, 16),
        SwizzleConfig::default(),
    )
    .unwrap();
    assert_eq!(sched.core_loops(), 0);
}

#[test]
fn test_rejects_zero_offset_and_degenerate_tile() {
    let problem = ProblemShape::new(8, 8, 8);
    assert!(BlockSwizzle::new(problem, TileShape::new(4, 4, 4), SwizzleConfig::new(0, SwizzleDirection::RowBand)).is_err());
    assert!(BlockSwizzle::new(problem, TileShape::new(4, 0, 4), SwizzleConfig::identity()).is_err());
}

proptest! {
    #[test]
    fn swizzle_is_a_bijection(
        m in 1usize..400,
        n in 1usize..400,
        tile_m in 1usize..48,
        tile_n in 1usize..48,
        offset in 1usize..6,
        direction in direction(),
    ) {
        let problem = ProblemShape::new(m, n, 8);
        let sched = BlockSwizzle::new(problem, TileShape::new(tile_m, tile_n, 8), SwizzleConfig::new(offset, direction)).unwrap();
        let (loops_m, loops_n) = sched.loops();
        prop_assert_eq!(sched.core_loops(), loops_m * loops_n);

        let mut seen = HashSet::new();
        let mut covered = 0;
        for task in 0..sched.core_loops() {
            let coord = sched.block_coord(task);
            prop_assert!(coord.row < loops_m && coord.col < loops_n);
            prop_assert!(seen.insert((coord.row, coord.col)), "tile {:?} produced twice", coord);
            let shape = sched.actual_block_shape(coord);
            prop_assert!(shape.m >= 1 && shape.m <= tile_m);
            prop_assert!(shape.n >= 1 && shape.n <= tile_n);
            covered += shape.m * shape.n;
        }
        prop_assert_eq!(covered, m * n);
    }

    #[test]
    fn batched_task_indices_repeat_the_schedule(
        m in 1usize..200,
        n in 1usize..200,
        batch in 1usize..4,
        offset in 1usize..5,
        direction in direction(),
    ) {
        let sched = BlockSwizzle::new(ProblemShape::new(m, n, 4), TileShape::new(32, 32, 4), SwizzleConfig::new(offset, direction)).unwrap();
        let loops = sched.core_loops();
        for task in 0..batch * loops {
            prop_assert_eq!(sched.batch_idx(task), task / loops);
            prop_assert_eq!(sched.block_coord(task), sched.block_coord(task % loops));
        }
    }

    #[test]
    fn split_k_slices_cover_k_exactly(
        m in 1usize..100,
        n in 1usize..100,
        k in 1usize..2000,
        tile_k in 1usize..128,
        split in 1usize..20,
    ) {
        let tile = TileShape::new(32, 32, tile_k);
        let sched = SplitkBlockSwizzle::new(ProblemShape::new(m, n, k), tile, SwizzleConfig::identity(), split).unwrap();
        let loops_k = k.div_ceil(tile_k);
        prop_assert!(sched.split_k() >= 1 && sched.split_k() <= loops_k);
        prop_assert_eq!(sched.core_loops(), sched.tiles() * sched.split_k());

        let mut per_tile = std::collections::HashMap::new();
        for task in 0..sched.core_loops() {
            let slice = sched.slice_idx(task);
            let coord = sched.block_coord(task);
            prop_assert_eq!(coord.k, sched.k_idx(slice));
            prop_assert_eq!(sched.slice_at(coord.k), slice);
            let shape = sched.actual_block_shape(coord, slice);
            prop_assert!(shape.k >= 1);
            per_tile.entry((coord.row, coord.col)).or_insert_with(Vec::new).push((coord.k * tile_k, shape.k));
        }

        prop_assert_eq!(per_tile.len(), sched.tiles());
        for (_, mut slices) in per_tile {
            slices.sort();
            let mut next = 0;
            for (start, len) in slices {
                prop_assert_eq!(start, next);
                next = start + len;
            }
            prop_assert_eq!(next, k);
        }
    }
}

// ============================================================
// Split-K slices
// ============================================================

#[test]
fn test_split_k_longer_slices_first() {
    // 7 K tiles over 4 slices: 2, 2, 2, 1.
    let sched = SplitkBlockSwizzle::new(
        ProblemShape::new(16, 16, 100),
        TileShape::new(16, 16, 16),
        SwizzleConfig::identity(),
        4,
    )
    .unwrap();

    let starts: Vec<usize> = (0..4).map(|s| sched.k_idx(s)).collect();
    assert_eq!(starts, vec![0, 2, 4, 6]);
    let lengths: Vec<usize> = (0..4)
        .map(|s| sched.actual_block_shape(sched.block_coord(s), s).k)
        .collect();
    assert_eq!(lengths, vec![32, 32, 32, 4]);
}

#[test]
fn test_split_k_is_clamped_to_k_tiles() {
    let sched = SplitkBlockSwizzle::new(
        ProblemShape::new(16, 16, 40),
        TileShape::new(16, 16, 16),
        SwizzleConfig::identity(),
        64,
    )
    .unwrap();
    assert_eq!(sched.split_k(), 3);
}

// ============================================================
// Pipeline K order
// ============================================================

#[test]
fn test_shuffle_k_start_tile() {
    let l1 = TileShape::new(32, 32, 64);
    let l0 = TileShape::new(32, 32, 32);
    let shuffled = BlockMmad::new(l1, l0, 2, true).unwrap();
    let ordered = BlockMmad::new(l1, l0, 2, false).unwrap();

    assert_eq!(shuffled.k_start(0, 4), 0);
    assert_eq!(shuffled.k_start(5, 4), 1);
    assert_eq!(shuffled.k_start(7, 1), 0);
    assert_eq!(ordered.k_start(5, 4), 0);
}

#[test]
fn test_pipeline_rejects_bad_tiles() {
    let l1 = TileShape::new(32, 32, 64);
    assert!(BlockMmad::new(l1, TileShape::new(32, 32, 128), 2, false).is_err());
    assert!(BlockMmad::new(l1, TileShape::new(16, 32, 32), 2, false).is_err());
    assert!(BlockMmad::new(l1, TileShape::new(32, 32, 32), 0, false).is_err());
}

// ============================================================
// Execution faults
// ============================================================

#[test]
fn test_panicking_unit_fails_the_whole_launch() {
    let (m, n, k) = (32, 16, 48);
    let a = vec![1.0f32; m * k];
    let b = vec![2.0f32; k * n];
    let operands = [OperandSet {
        a: MatrixRef::new(&a, Layout::row_major(m, k), 'A').unwrap(),
        b: MatrixRef::new(&b, Layout::row_major(k, n), 'B').unwrap(),
    }];
    let l1 = TileShape::new(16, 16, 16);
    let mmad = BlockMmad::new(l1, TileShape::new(16, 16, 8), 2, true).unwrap();
    let finished = AtomicUsize::new(0);

    let result = launch_units(4, "faulty", |unit| {
        let tasks = (0..2).map(|row| {
            BlockTask::new(0, BlockCoord::new(row, 0, 0), TileShape::new(16, 16, k), &l1)
        });
        let stats = mmad.run_unit(unit, tasks, &operands, |_, acc| {
            if unit == 2 {
                panic!("unit {unit} lost its accumulator");
            }
            assert!(acc.iter().all(|&x| x == 2.0 * k as f32));
        })?;
        assert_eq!(stats.tiles, 2);
        finished.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    let err = result.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Execution);
    assert!(matches!(err, GemmError::ExecutionFault { unit: 2, .. }), "{err}");
    assert_eq!(finished.load(Ordering::SeqCst), 3, "the other units run to completion");
}
