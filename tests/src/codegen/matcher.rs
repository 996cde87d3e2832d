use std::ptr;

use bitsift_codegen::{
    compile, CodeBuffer, CompileError, CompiledMatcher, MatchParams, MatchRecord, RegisterMap,
    RowExpr,
};
use bumpalo::Bump;

/// Build a slice buffer: quadword 0 holds the canonical slice object
/// pointer (here the buffer's own base address), followed by each
/// row's quadwords.
fn make_slice(iterations: usize, rows: &[Vec<u64>]) -> Vec<u64> {
    let mut data = vec![0u64; 1 + rows.len() * iterations];
    for (r, row) in rows.iter().enumerate() {
        assert_eq!(row.len(), iterations);
        for (i, &quad) in row.iter().enumerate() {
            data[1 + r * iterations + i] = quad;
        }
    }
    data[0] = data.as_ptr() as u64;
    data
}

/// Byte offsets of each row relative to the slice base.
fn row_offsets(iterations: usize, rows: usize) -> Vec<i64> {
    (0..rows)
        .map(|r| (8 * (1 + r * iterations)) as i64)
        .collect()
}

struct RunResult {
    returned: usize,
    matches: Vec<MatchRecord>,
    slice_count: u64,
    /// Entries the slice-buffer cursor advanced by.
    buffers_advanced: usize,
    dedupe: [u64; 65],
}

fn run(
    matcher: &CompiledMatcher,
    slices: &[Vec<u64>],
    iterations: usize,
    offsets: &[i64],
    capacity: usize,
) -> RunResult {
    let bases: Vec<*const u64> = slices.iter().map(|s| s.as_ptr()).collect();
    let mut matches = vec![
        MatchRecord {
            slice: ptr::null(),
            doc: 0
        };
        capacity
    ];
    let mut params = MatchParams::new(
        slices.len() as u64,
        bases.as_ptr(),
        iterations as u64,
        offsets.as_ptr(),
        capacity as u64,
        matches.as_mut_ptr(),
    );
    let returned = unsafe { matcher.invoke(&mut params) };
    let buffers_advanced =
        (params.slice_buffers as usize - bases.as_ptr() as usize) / 8;
    matches.truncate(params.match_count as usize);
    RunResult {
        returned,
        matches,
        slice_count: params.slice_count,
        buffers_advanced,
        dedupe: params.dedupe,
    }
}

fn compile_single_row() -> CompiledMatcher {
    let arena = Bump::new();
    let tree = RowExpr::row(&arena, 0);
    let registers = RegisterMap::new(vec![0]);
    compile(CodeBuffer::with_default_size().unwrap(), tree, &registers).unwrap()
}

fn docs(result: &RunResult) -> Vec<u64> {
    result.matches.iter().map(|m| m.doc).collect()
}

// -- Basic scanning --

#[test]
fn single_bit_single_row() {
    let matcher = compile_single_row();
    let slices = vec![make_slice(1, &[vec![0b1]])];
    let result = run(&matcher, &slices, 1, &row_offsets(1, 1), 100);

    assert_eq!(result.returned, 1);
    assert_eq!(result.matches.len(), 1);
    assert_eq!(result.matches[0].doc, 0);
    assert_eq!(result.matches[0].slice, slices[0].as_ptr());
}

#[test]
fn matches_ascend_within_a_quadword() {
    let matcher = compile_single_row();
    let quad = (1 << 0) | (1 << 3) | (1 << 5) | (1 << 63);
    let slices = vec![make_slice(1, &[vec![quad]])];
    let result = run(&matcher, &slices, 1, &row_offsets(1, 1), 100);

    assert_eq!(docs(&result), vec![0, 3, 5, 63]);
}

#[test]
fn matches_ascend_across_iterations() {
    let matcher = compile_single_row();
    let slices = vec![make_slice(2, &[vec![0b1, 0b10]])];
    let result = run(&matcher, &slices, 2, &row_offsets(2, 1), 100);

    // Second iteration lands in bucket 1: doc = (1 << 3) + 1.
    assert_eq!(docs(&result), vec![0, 9]);
}

#[test]
fn slice_bookkeeping_updated_in_place() {
    let matcher = compile_single_row();
    let slices = vec![
        make_slice(1, &[vec![0b1]]),
        make_slice(1, &[vec![0b1]]),
        make_slice(1, &[vec![0b1]]),
    ];
    let result = run(&matcher, &slices, 1, &row_offsets(1, 1), 100);

    assert_eq!(result.slice_count, 0);
    assert_eq!(result.buffers_advanced, 3);
}

#[test]
fn dedupe_is_zero_after_return() {
    let matcher = compile_single_row();
    let slices = vec![make_slice(2, &[vec![u64::MAX, 0b1010]])];
    let result = run(&matcher, &slices, 2, &row_offsets(2, 1), 100);

    assert!(!result.matches.is_empty());
    assert!(result.dedupe.iter().all(|&q| q == 0));
}

#[test]
fn slices_processed_in_input_order() {
    let matcher = compile_single_row();
    let slices = vec![
        make_slice(1, &[vec![0b1]]),
        make_slice(1, &[vec![0b100]]),
    ];
    let result = run(&matcher, &slices, 1, &row_offsets(1, 1), 100);

    assert_eq!(result.matches.len(), 2);
    assert_eq!(result.matches[0].slice, slices[0].as_ptr());
    assert_eq!(result.matches[0].doc, 0);
    assert_eq!(result.matches[1].slice, slices[1].as_ptr());
    assert_eq!(result.matches[1].doc, 2);
}

// -- Row expressions --

fn compile_tree(rows: Vec<u32>, tree: &RowExpr<'_>) -> CompiledMatcher {
    let registers = RegisterMap::new(rows);
    compile(CodeBuffer::with_default_size().unwrap(), tree, &registers).unwrap()
}

#[test]
fn and_intersects_rows() {
    let a = Bump::new();
    let tree = RowExpr::and(&a, &[RowExpr::row(&a, 0), RowExpr::row(&a, 1)]);
    let matcher = compile_tree(vec![0, 1], tree);
    let slices = vec![make_slice(1, &[vec![0b0110], vec![0b0011]])];
    let result = run(&matcher, &slices, 1, &row_offsets(1, 2), 100);

    assert_eq!(docs(&result), vec![1]);
}

#[test]
fn or_unions_rows() {
    let a = Bump::new();
    let tree = RowExpr::or(&a, &[RowExpr::row(&a, 0), RowExpr::row(&a, 1)]);
    let matcher = compile_tree(vec![0, 1], tree);
    let slices = vec![make_slice(1, &[vec![0b0100], vec![0b0001]])];
    let result = run(&matcher, &slices, 1, &row_offsets(1, 2), 100);

    assert_eq!(docs(&result), vec![0, 2]);
}

#[test]
fn and_not_excludes_rows() {
    let a = Bump::new();
    let tree = RowExpr::and(
        &a,
        &[RowExpr::row(&a, 0), RowExpr::not(&a, RowExpr::row(&a, 1))],
    );
    let matcher = compile_tree(vec![0, 1], tree);
    let slices = vec![make_slice(1, &[vec![0b0110], vec![0b0011]])];
    let result = run(&matcher, &slices, 1, &row_offsets(1, 2), 100);

    assert_eq!(docs(&result), vec![2]);
}

#[test]
fn nested_expression() {
    // (row0 | row1) & row2
    let a = Bump::new();
    let tree = RowExpr::and(
        &a,
        &[
            RowExpr::or(&a, &[RowExpr::row(&a, 0), RowExpr::row(&a, 1)]),
            RowExpr::row(&a, 2),
        ],
    );
    let matcher = compile_tree(vec![0, 1, 2], tree);
    let slices = vec![make_slice(
        1,
        &[vec![0b1000], vec![0b0010], vec![0b1010]],
    )];
    let result = run(&matcher, &slices, 1, &row_offsets(1, 3), 100);

    assert_eq!(docs(&result), vec![1, 3]);
}

// -- Capacity --

#[test]
fn capacity_overflow_drops_silently() {
    let matcher = compile_single_row();
    let quad = (1 << 1) | (1 << 2) | (1 << 4) | (1 << 8);
    let slices = vec![make_slice(1, &[vec![quad]])];
    let result = run(&matcher, &slices, 1, &row_offsets(1, 1), 2);

    assert_eq!(result.returned, 2);
    assert_eq!(docs(&result), vec![1, 2]);
    // The scan still completes and cleans up.
    assert_eq!(result.slice_count, 0);
    assert!(result.dedupe.iter().all(|&q| q == 0));
}

#[test]
fn zero_capacity_records_nothing() {
    let matcher = compile_single_row();
    let slices = vec![make_slice(1, &[vec![u64::MAX]])];
    let result = run(&matcher, &slices, 1, &row_offsets(1, 1), 0);

    assert_eq!(result.returned, 0);
    assert!(result.matches.is_empty());
}

// -- Degenerate shapes --

#[test]
fn zero_slices_is_a_noop() {
    let matcher = compile_single_row();
    let result = run(&matcher, &[], 1, &row_offsets(1, 1), 100);

    assert_eq!(result.returned, 0);
    assert_eq!(result.slice_count, 0);
    assert_eq!(result.buffers_advanced, 0);
}

#[test]
fn zero_iterations_skips_the_scan() {
    let matcher = compile_single_row();
    let slices = vec![make_slice(0, &[vec![]])];
    let result = run(&matcher, &slices, 0, &row_offsets(0, 1), 100);

    assert_eq!(result.returned, 0);
    assert_eq!(result.slice_count, 0);
    assert_eq!(result.buffers_advanced, 1);
}

#[test]
fn no_rows_is_a_noop_over_the_iteration_space() {
    let arena = Bump::new();
    let tree = RowExpr::row(&arena, 0);
    let registers = RegisterMap::new(vec![]);
    let matcher =
        compile(CodeBuffer::with_default_size().unwrap(), tree, &registers).unwrap();

    let slices = vec![make_slice(4, &[])];
    let result = run(&matcher, &slices, 4, &[], 100);

    assert_eq!(result.returned, 0);
    assert!(result.matches.is_empty());
    assert_eq!(result.slice_count, 0);
}

#[test]
fn fabricated_dedupe_bit_drains_once() {
    // With no rows the inner loop leaves the dedupe untouched, so a
    // fabricated bitmap is drained on the first iteration.
    let arena = Bump::new();
    let tree = RowExpr::row(&arena, 0);
    let registers = RegisterMap::new(vec![]);
    let matcher =
        compile(CodeBuffer::with_default_size().unwrap(), tree, &registers).unwrap();

    let slices = vec![make_slice(1, &[])];
    let bases: Vec<*const u64> = slices.iter().map(|s| s.as_ptr()).collect();
    let mut matches = vec![MatchRecord { slice: ptr::null(), doc: 0 }; 4];
    let mut params = MatchParams::new(1, bases.as_ptr(), 1, ptr::null(), 4, matches.as_mut_ptr());
    let (q, b) = (5u64, 7u64);
    params.dedupe[0] = 1 << q;
    params.dedupe[1 + q as usize] = 1 << b;

    let returned = unsafe { matcher.invoke(&mut params) };

    assert_eq!(returned, 1);
    assert_eq!(params.match_count, 1);
    assert_eq!(matches[0].doc, (q << 3) + b);
    assert_eq!(matches[0].slice, slices[0].as_ptr());
    assert!(params.dedupe.iter().all(|&quad| quad == 0));
}

// -- Concurrency --

#[test]
fn concurrent_disjoint_invocations_match_serial() {
    let matcher = compile_single_row();

    let serial = {
        let slices = vec![make_slice(2, &[vec![0b1011, 0b0110]])];
        let result = run(&matcher, &slices, 2, &row_offsets(2, 1), 100);
        docs(&result)
    };

    std::thread::scope(|scope| {
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let matcher = &matcher;
                scope.spawn(move || {
                    let slices = vec![make_slice(2, &[vec![0b1011, 0b0110]])];
                    let result = run(matcher, &slices, 2, &row_offsets(2, 1), 100);
                    docs(&result)
                })
            })
            .collect();
        for worker in workers {
            assert_eq!(worker.join().unwrap(), serial);
        }
    });
}

// -- Compile errors --

#[test]
fn too_many_rows_is_rejected() {
    let arena = Bump::new();
    let tree = RowExpr::row(&arena, 0);
    let registers = RegisterMap::new((0..8).collect());
    let err = compile(CodeBuffer::with_default_size().unwrap(), tree, &registers)
        .err()
        .unwrap();
    assert!(matches!(err, CompileError::TooManyRows(8)));
}

#[test]
fn deep_nesting_is_rejected() {
    let arena = Bump::new();
    // Each non-leaf sibling needs one more scratch register.
    let tree = RowExpr::and(
        &arena,
        &[
            RowExpr::row(&arena, 0),
            RowExpr::or(
                &arena,
                &[
                    RowExpr::row(&arena, 0),
                    RowExpr::and(
                        &arena,
                        &[
                            RowExpr::row(&arena, 0),
                            RowExpr::or(
                                &arena,
                                &[RowExpr::row(&arena, 0), RowExpr::row(&arena, 0)],
                            ),
                        ],
                    ),
                ],
            ),
        ],
    );
    let registers = RegisterMap::new(vec![0]);
    let err = compile(CodeBuffer::with_default_size().unwrap(), tree, &registers)
        .err()
        .unwrap();
    assert!(matches!(err, CompileError::ExpressionTooDeep));
}

#[test]
fn unallocated_row_is_rejected() {
    let arena = Bump::new();
    let tree = RowExpr::row(&arena, 3);
    let registers = RegisterMap::new(vec![0]);
    let err = compile(CodeBuffer::with_default_size().unwrap(), tree, &registers)
        .err()
        .unwrap();
    assert!(matches!(err, CompileError::UnallocatedRow(3)));
}

#[test]
fn exhausted_buffer_is_rejected() {
    let arena = Bump::new();
    let tree = RowExpr::row(&arena, 0);
    let registers = RegisterMap::new(vec![0]);
    let mut code = CodeBuffer::new(4096).unwrap();
    code.set_offset(code.capacity() - 8);
    let err = compile(code, tree, &registers).err().unwrap();
    assert!(matches!(err, CompileError::BufferExhausted));
}

// -- The run wrapper --

#[test]
fn run_returns_the_match_count() {
    let matcher = compile_single_row();
    let slices = vec![make_slice(1, &[vec![0b101]])];
    let bases: Vec<*const u64> = slices.iter().map(|s| s.as_ptr()).collect();
    let offsets = row_offsets(1, 1);

    let returned =
        unsafe { matcher.run(1, bases.as_ptr(), 1, offsets.as_ptr()) };
    assert_eq!(returned, 2);
}
