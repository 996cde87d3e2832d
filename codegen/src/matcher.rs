//! The match-tree emitter: lays down the two-level scan loop, the
//! dedupe drain, and the match-record writer around a compiled row
//! expression, then seals the result into a callable function.

use std::mem::offset_of;
use std::ptr;

use log::debug;

use crate::code_buffer::CodeBuffer;
use crate::error::CompileError;
use crate::label::LabelTable;
use crate::rows::{emit_row_expression, RegisterMap, RowExpr};
use crate::x86_64::emitter::{
    emit_arith_load, emit_arith_ri, emit_arith_rr, emit_arith_store, emit_bsf, emit_btr_rr,
    emit_dec_mem, emit_inc_mem, emit_jcc_label, emit_jmp_label, emit_load, emit_load_sib,
    emit_mov_ri, emit_mov_rr, emit_pop, emit_push, emit_ret, emit_shift_ri, emit_store,
    emit_store_sib, emit_test_rr, ArithOp, Cc, ShiftOp,
};
use crate::x86_64::regs::{
    Reg, CALLEE_SAVED, CURSOR, DRAIN_BIT, DRAIN_BUCKET, DRAIN_DOC, DRAIN_MATCHES, DRAIN_MATCH_IDX,
    DRAIN_QUAD, DRAIN_SAVED, DRAIN_SLICE_OBJ, DRAIN_SUMMARY, HOST_ARG0, MAX_ROW_REGS, PARAMS,
    ROW_BASE, ROW_OFFSETS, SLICE,
};

/// Callback slot in the parameters block. Wired through to the emitted
/// function but not invoked by the drain.
pub type MatchCallback = extern "C" fn(usize) -> usize;

/// Number of dedupe buckets; the summary quadword indexes them.
pub const DEDUPE_BUCKETS: usize = 64;

/// Default match-record capacity used by `CompiledMatcher::run`.
pub const DEFAULT_CAPACITY: usize = 100;

/// One recorded match: the canonical slice object pointer and the
/// document's position within the slice. Written by the emitted code
/// as two 8-byte stores.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchRecord {
    pub slice: *const u64,
    pub doc: u64,
}

/// Argument block handed to the emitted matcher. Field offsets are
/// baked into the generated code, hence the fixed C layout.
#[repr(C)]
pub struct MatchParams {
    /// Remaining slices; decremented in place.
    pub slice_count: u64,
    /// Array of slice base pointers; advanced in place.
    pub slice_buffers: *const *const u64,
    /// Quadwords to scan per slice.
    pub iterations_per_slice: u64,
    /// Per-row byte offsets relative to the slice base.
    pub row_offsets: *const i64,
    pub callback: MatchCallback,
    /// Summary quadword followed by 64 buckets; summary bit i is set
    /// iff bucket i is nonzero. Zero again whenever the emitted
    /// function returns.
    pub dedupe: [u64; DEDUPE_BUCKETS + 1],
    /// Maximum number of match records that may be written.
    pub capacity: u64,
    /// Records written so far; updated in place.
    pub match_count: u64,
    pub matches: *mut MatchRecord,
}

impl MatchParams {
    pub fn new(
        slice_count: u64,
        slice_buffers: *const *const u64,
        iterations_per_slice: u64,
        row_offsets: *const i64,
        capacity: u64,
        matches: *mut MatchRecord,
    ) -> Self {
        Self {
            slice_count,
            slice_buffers,
            iterations_per_slice,
            row_offsets,
            callback: unused_callback,
            dedupe: [0; DEDUPE_BUCKETS + 1],
            capacity,
            match_count: 0,
            matches,
        }
    }
}

/// Placeholder for the callback slot; the drain never calls it.
extern "C" fn unused_callback(_value: usize) -> usize {
    1234567
}

const SLICE_COUNT_OFF: i32 = offset_of!(MatchParams, slice_count) as i32;
const SLICE_BUFFERS_OFF: i32 = offset_of!(MatchParams, slice_buffers) as i32;
const ITERATIONS_OFF: i32 = offset_of!(MatchParams, iterations_per_slice) as i32;
const ROW_OFFSETS_OFF: i32 = offset_of!(MatchParams, row_offsets) as i32;
const DEDUPE_OFF: i32 = offset_of!(MatchParams, dedupe) as i32;
const CAPACITY_OFF: i32 = offset_of!(MatchParams, capacity) as i32;
const MATCH_COUNT_OFF: i32 = offset_of!(MatchParams, match_count) as i32;
const MATCHES_OFF: i32 = offset_of!(MatchParams, matches) as i32;

/// Compile a row plan into an executable matcher.
///
/// `code` must be freshly writable; on success it is sealed executable
/// and owned by the returned matcher.
pub fn compile(
    mut code: CodeBuffer,
    tree: &RowExpr<'_>,
    registers: &RegisterMap,
) -> Result<CompiledMatcher, CompileError> {
    if registers.allocated_count() > MAX_ROW_REGS {
        return Err(CompileError::TooManyRows(registers.allocated_count()));
    }

    let mut gen = MatcherCodeGen {
        buf: &mut code,
        labels: LabelTable::new(),
        registers,
        tree,
    };
    gen.emit()?;
    debug_assert_eq!(gen.labels.unplaced(), 0, "unplaced branch target");

    if code.exhausted() {
        return Err(CompileError::BufferExhausted);
    }
    let bytes = code.offset();
    code.set_executable()?;
    debug!(
        "matcher compiled: {} bytes, {} row registers",
        bytes,
        registers.allocated_count()
    );
    Ok(CompiledMatcher { code })
}

/// An executable matcher and the code memory backing it.
pub struct CompiledMatcher {
    code: CodeBuffer,
}

// SAFETY: the code buffer is sealed executable at construction and
// never written afterwards; invocation is read-only with respect to
// the buffer.
unsafe impl Sync for CompiledMatcher {}

impl CompiledMatcher {
    /// Invoke the matcher on a caller-owned parameters block.
    ///
    /// # Safety
    ///
    /// Every pointer reachable from `params` must be valid:
    /// `slice_buffers` must hold `slice_count` readable slice pointers,
    /// each slice must span `iterations_per_slice` quadwords past every
    /// row offset, and `matches` must have room for `capacity` records.
    pub unsafe fn invoke(&self, params: *mut MatchParams) -> usize {
        let entry: unsafe extern "C" fn(*mut MatchParams) -> usize =
            std::mem::transmute(self.code.ptr_at(0));
        entry(params)
    }

    /// Scan the given slices with a default parameters block
    /// (capacity 100) and a function-local match buffer, returning the
    /// emitted function's return value.
    ///
    /// # Safety
    ///
    /// Same pointer validity requirements as [`CompiledMatcher::invoke`].
    pub unsafe fn run(
        &self,
        slice_count: u64,
        slice_buffers: *const *const u64,
        iterations_per_slice: u64,
        row_offsets: *const i64,
    ) -> usize {
        let mut matches = vec![
            MatchRecord {
                slice: ptr::null(),
                doc: 0
            };
            DEFAULT_CAPACITY
        ];
        let mut params = MatchParams::new(
            slice_count,
            slice_buffers,
            iterations_per_slice,
            row_offsets,
            DEFAULT_CAPACITY as u64,
            matches.as_mut_ptr(),
        );
        let result = self.invoke(&mut params);
        debug!("{} matches", params.match_count);
        result
    }
}

/// Emission state for one matcher function.
struct MatcherCodeGen<'e> {
    buf: &'e mut CodeBuffer,
    labels: LabelTable,
    registers: &'e RegisterMap,
    tree: &'e RowExpr<'e>,
}

impl MatcherCodeGen<'_> {
    fn emit(&mut self) -> Result<(), CompileError> {
        self.emit_prologue();
        self.emit_row_preload();
        self.emit_outer_loop()?;
        self.emit_epilogue();
        Ok(())
    }

    /// Save callee-saved registers, normalize the host ABI so the
    /// parameters pointer is always in PARAMS, and reserve one 8-byte
    /// stack slot for the inner-loop limit.
    fn emit_prologue(&mut self) {
        for &reg in CALLEE_SAVED {
            emit_push(self.buf, reg);
        }
        if HOST_ARG0 != PARAMS {
            emit_mov_rr(self.buf, true, PARAMS, HOST_ARG0);
        }
        emit_arith_ri(self.buf, ArithOp::Sub, true, Reg::Rsp, 8);
    }

    /// Return the final match count, release the spill slot, restore
    /// registers.
    fn emit_epilogue(&mut self) {
        emit_load(self.buf, true, Reg::Rax, PARAMS, MATCH_COUNT_OFF);
        emit_arith_ri(self.buf, ArithOp::Add, true, Reg::Rsp, 8);
        for &reg in CALLEE_SAVED.iter().rev() {
            emit_pop(self.buf, reg);
        }
        emit_ret(self.buf);
    }

    /// Load the row-offset table pointer, then each allocated row's
    /// offset into r8..r8+K-1.
    fn emit_row_preload(&mut self) {
        emit_load(self.buf, true, ROW_OFFSETS, PARAMS, ROW_OFFSETS_OFF);
        // TODO: address the row registers through
        // RegisterMap::physical_register instead of r8..r8+K-1
        // directly, so the allocation policy has a single source of
        // truth. The row-expression emitter already goes through the
        // map.
        for r in 0..self.registers.allocated_count() {
            let dst = Reg::from_u8(ROW_BASE + r as u8);
            emit_load(
                self.buf,
                true,
                dst,
                ROW_OFFSETS,
                8 * self.registers.row_id(r) as i32,
            );
        }
    }

    /// Iterate over slices: test the remaining count, scan one slice,
    /// decrement the count and advance the slice-buffer cursor.
    fn emit_outer_loop(&mut self) -> Result<(), CompileError> {
        let top = self.labels.alloc();
        let bottom = self.labels.alloc();

        self.labels.place(top, self.buf);
        emit_load(self.buf, true, Reg::Rax, PARAMS, SLICE_COUNT_OFF);
        emit_test_rr(self.buf, true, Reg::Rax, Reg::Rax);
        emit_jcc_label(self.buf, &mut self.labels, Cc::Eq, bottom);

        self.emit_inner_loop()?;

        emit_dec_mem(self.buf, PARAMS, SLICE_COUNT_OFF);
        // Advance to the next slice buffer; the encoder set has no
        // memory-immediate add, so go through rax.
        emit_mov_ri(self.buf, true, Reg::Rax, 8);
        emit_arith_store(self.buf, ArithOp::Add, true, Reg::Rax, PARAMS, SLICE_BUFFERS_OFF);
        emit_jmp_label(self.buf, &mut self.labels, top);

        self.labels.place(bottom, self.buf);
        Ok(())
    }

    /// Iterate over the quadwords of one slice, evaluating the row
    /// expression and draining the dedupe bitmap once per quadword.
    fn emit_inner_loop(&mut self) -> Result<(), CompileError> {
        // Dereference to the slice base.
        emit_load(self.buf, true, SLICE, PARAMS, SLICE_BUFFERS_OFF);
        emit_load(self.buf, true, SLICE, SLICE, 0);

        // Limit = slice base + 8 * iterations, spilled to the stack slot.
        emit_load(self.buf, true, Reg::Rax, PARAMS, ITERATIONS_OFF);
        emit_shift_ri(self.buf, ShiftOp::Shl, true, Reg::Rax, 3);
        emit_arith_rr(self.buf, ArithOp::Add, true, Reg::Rax, SLICE);
        emit_store(self.buf, true, Reg::Rax, Reg::Rsp, 0);

        emit_mov_rr(self.buf, true, CURSOR, SLICE);

        let top = self.labels.alloc();
        let exit = self.labels.alloc();

        self.labels.place(top, self.buf);
        emit_arith_load(self.buf, ArithOp::Cmp, true, CURSOR, Reg::Rsp, 0);
        emit_jcc_label(self.buf, &mut self.labels, Cc::Eq, exit);

        emit_row_expression(
            self.buf,
            &mut self.labels,
            self.tree,
            self.registers,
            DEDUPE_OFF,
        )?;
        self.emit_finish_iteration();

        emit_arith_ri(self.buf, ArithOp::Add, true, CURSOR, 8);
        emit_jmp_label(self.buf, &mut self.labels, top);

        self.labels.place(exit, self.buf);
        Ok(())
    }

    /// Drain the dedupe bitmap into match records. Runs only when the
    /// summary is nonzero; on exit the summary and every visited bucket
    /// are zero, ready for the next iteration.
    fn emit_finish_iteration(&mut self) {
        let no_matches = self.labels.alloc();

        emit_load(self.buf, true, DRAIN_SUMMARY, PARAMS, DEDUPE_OFF);
        emit_test_rr(self.buf, true, DRAIN_SUMMARY, DRAIN_SUMMARY);
        emit_jcc_label(self.buf, &mut self.labels, Cc::Eq, no_matches);

        for &reg in DRAIN_SAVED {
            emit_push(self.buf, reg);
        }

        // Loop invariants: match array base and the canonical slice
        // object pointer at offset 0 of the slice buffer.
        emit_load(self.buf, true, DRAIN_MATCHES, PARAMS, MATCHES_OFF);
        emit_load(self.buf, true, DRAIN_SLICE_OBJ, SLICE, 0);
        emit_load(self.buf, true, DRAIN_SUMMARY, PARAMS, DEDUPE_OFF);

        let quad_top = self.labels.alloc();
        let quad_exit = self.labels.alloc();

        self.labels.place(quad_top, self.buf);
        emit_bsf(self.buf, true, DRAIN_QUAD, DRAIN_SUMMARY);
        emit_jcc_label(self.buf, &mut self.labels, Cc::Eq, quad_exit);

        emit_load_sib(
            self.buf,
            true,
            DRAIN_BUCKET,
            PARAMS,
            DRAIN_QUAD,
            3,
            DEDUPE_OFF + 8,
        );

        let bit_top = self.labels.alloc();
        let bit_exit = self.labels.alloc();

        self.labels.place(bit_top, self.buf);
        emit_bsf(self.buf, true, DRAIN_BIT, DRAIN_BUCKET);
        emit_jcc_label(self.buf, &mut self.labels, Cc::Eq, bit_exit);

        self.emit_store_match();

        emit_btr_rr(self.buf, true, DRAIN_BUCKET, DRAIN_BIT);
        emit_jmp_label(self.buf, &mut self.labels, bit_top);

        self.labels.place(bit_exit, self.buf);
        // Write the emptied bucket back and clear its summary bit.
        emit_store_sib(
            self.buf,
            true,
            DRAIN_BUCKET,
            PARAMS,
            DRAIN_QUAD,
            3,
            DEDUPE_OFF + 8,
        );
        emit_btr_rr(self.buf, true, DRAIN_SUMMARY, DRAIN_QUAD);
        emit_jmp_label(self.buf, &mut self.labels, quad_top);

        self.labels.place(quad_exit, self.buf);
        // The summary register is zero here; store it back so the next
        // iteration starts clean.
        emit_store(self.buf, true, DRAIN_SUMMARY, PARAMS, DEDUPE_OFF);

        for &reg in DRAIN_SAVED.iter().rev() {
            emit_pop(self.buf, reg);
        }

        self.labels.place(no_matches, self.buf);
    }

    /// Record one match, unless the output array is full (the match is
    /// silently dropped).
    ///
    /// Assumes DRAIN_QUAD holds the quadword index, DRAIN_BIT the bit
    /// index, DRAIN_MATCHES the output base, and DRAIN_SLICE_OBJ the
    /// slice object pointer.
    fn emit_store_match(&mut self) {
        let out_of_space = self.labels.alloc();

        emit_load(self.buf, true, DRAIN_MATCH_IDX, PARAMS, MATCH_COUNT_OFF);
        emit_arith_load(
            self.buf,
            ArithOp::Cmp,
            true,
            DRAIN_MATCH_IDX,
            PARAMS,
            CAPACITY_OFF,
        );
        emit_jcc_label(self.buf, &mut self.labels, Cc::Eq, out_of_space);

        // Records are 16 bytes; index -> byte offset.
        emit_shift_ri(self.buf, ShiftOp::Shl, true, DRAIN_MATCH_IDX, 4);

        // Document index within the slice: (quadword << 3) + bit.
        emit_mov_rr(self.buf, true, DRAIN_DOC, DRAIN_QUAD);
        emit_shift_ri(self.buf, ShiftOp::Shl, true, DRAIN_DOC, 3);
        emit_arith_rr(self.buf, ArithOp::Add, true, DRAIN_DOC, DRAIN_BIT);

        emit_store_sib(
            self.buf,
            true,
            DRAIN_SLICE_OBJ,
            DRAIN_MATCHES,
            DRAIN_MATCH_IDX,
            0,
            0,
        );
        emit_store_sib(
            self.buf,
            true,
            DRAIN_DOC,
            DRAIN_MATCHES,
            DRAIN_MATCH_IDX,
            0,
            8,
        );
        emit_inc_mem(self.buf, PARAMS, MATCH_COUNT_OFF);

        self.labels.place(out_of_space, self.buf);
    }
}
