//! Row plans: the compiled boolean expression the inner loop evaluates
//! once per quadword, and the register assignment it consumes.

use bumpalo::Bump;

use crate::code_buffer::CodeBuffer;
use crate::error::CompileError;
use crate::label::LabelTable;
use crate::x86_64::emitter::{
    emit_arith_load_sib, emit_arith_ri, emit_arith_rr, emit_arith_store_sib, emit_bts_rr,
    emit_jcc_label, emit_load, emit_load_sib, emit_mov_rr, emit_not, emit_shift_ri, emit_store,
    emit_test_rr, ArithOp, Cc, ShiftOp,
};
use crate::x86_64::regs::{Reg, CURSOR, PARAMS, ROW_BASE, SLICE};

/// The register assignment produced by the planner: allocator register
/// index -> row id. Row ids index the caller's row-offset table.
#[derive(Debug, Clone, Default)]
pub struct RegisterMap {
    row_ids: Vec<u32>,
}

impl RegisterMap {
    pub fn new(row_ids: Vec<u32>) -> Self {
        Self { row_ids }
    }

    /// Number of allocated row registers (K).
    pub fn allocated_count(&self) -> usize {
        self.row_ids.len()
    }

    /// Row id held by allocator register `reg`.
    pub fn row_id(&self, reg: usize) -> u32 {
        self.row_ids[reg]
    }

    /// Physical register backing allocator register `reg`.
    pub fn physical_register(&self, reg: usize) -> Reg {
        Reg::from_u8(ROW_BASE + reg as u8)
    }
}

/// Compile-node tree for a row intersection plan. Leaves name
/// allocator register indices, not row ids.
#[derive(Debug, PartialEq, Eq)]
pub enum RowExpr<'a> {
    Row(usize),
    And(&'a [&'a RowExpr<'a>]),
    Or(&'a [&'a RowExpr<'a>]),
    Not(&'a RowExpr<'a>),
}

impl<'a> RowExpr<'a> {
    pub fn row(arena: &'a Bump, reg: usize) -> &'a RowExpr<'a> {
        arena.alloc(RowExpr::Row(reg))
    }

    pub fn and(arena: &'a Bump, children: &[&'a RowExpr<'a>]) -> &'a RowExpr<'a> {
        arena.alloc(RowExpr::And(arena.alloc_slice_copy(children)))
    }

    pub fn or(arena: &'a Bump, children: &[&'a RowExpr<'a>]) -> &'a RowExpr<'a> {
        arena.alloc(RowExpr::Or(arena.alloc_slice_copy(children)))
    }

    pub fn not(arena: &'a Bump, child: &'a RowExpr<'a>) -> &'a RowExpr<'a> {
        arena.alloc(RowExpr::Not(child))
    }
}

/// Scratch registers available to the expression evaluator. All are
/// caller-scratch and outside the matcher's reserved set
/// {PARAMS, SLICE, CURSOR, the limit spill, r8..r8+K-1}.
const SCRATCH: [Reg; 3] = [Reg::Rax, Reg::R10, Reg::R11];

fn scratch(depth: usize) -> Result<Reg, CompileError> {
    SCRATCH
        .get(depth)
        .copied()
        .ok_or(CompileError::ExpressionTooDeep)
}

/// Emit the per-iteration row evaluation: compute the combined match
/// quadword for the cursor position, then fold a nonzero result into
/// the dedupe bitmap (bucket = quadword index & 63, plus its summary
/// bit).
///
/// With no allocated rows this emits nothing; the drain then sees
/// whatever the dedupe already holds.
pub(crate) fn emit_row_expression(
    buf: &mut CodeBuffer,
    labels: &mut LabelTable,
    expr: &RowExpr<'_>,
    registers: &RegisterMap,
    dedupe_off: i32,
) -> Result<(), CompileError> {
    if registers.allocated_count() == 0 {
        return Ok(());
    }
    emit_eval(buf, expr, registers, 0)?;

    let no_match = labels.alloc();
    emit_test_rr(buf, true, Reg::Rax, Reg::Rax);
    emit_jcc_label(buf, labels, Cc::Eq, no_match);

    // Bucket index = ((cursor - slice base) >> 3) & 63.
    emit_mov_rr(buf, true, Reg::R11, CURSOR);
    emit_arith_rr(buf, ArithOp::Sub, true, Reg::R11, SLICE);
    emit_shift_ri(buf, ShiftOp::Shr, true, Reg::R11, 3);
    emit_arith_ri(buf, ArithOp::And, true, Reg::R11, 63);

    // Fold the match word into the bucket and flag it in the summary.
    emit_arith_store_sib(buf, ArithOp::Or, true, Reg::Rax, PARAMS, Reg::R11, 3, dedupe_off + 8);
    emit_load(buf, true, Reg::R10, PARAMS, dedupe_off);
    emit_bts_rr(buf, true, Reg::R10, Reg::R11);
    emit_store(buf, true, Reg::R10, PARAMS, dedupe_off);

    labels.place(no_match, buf);
    Ok(())
}

/// Evaluate `expr` into the scratch register for `depth`. Row operands
/// are read as `[CURSOR + row-offset-register]`; sibling subtrees use
/// the next scratch register.
fn emit_eval(
    buf: &mut CodeBuffer,
    expr: &RowExpr<'_>,
    registers: &RegisterMap,
    depth: usize,
) -> Result<(), CompileError> {
    let dst = scratch(depth)?;
    match expr {
        RowExpr::Row(reg) => {
            let row = row_register(registers, *reg)?;
            emit_load_sib(buf, true, dst, CURSOR, row, 0, 0);
        }
        RowExpr::And(children) | RowExpr::Or(children) => {
            let op = match expr {
                RowExpr::And(_) => ArithOp::And,
                _ => ArithOp::Or,
            };
            let (first, rest) = children.split_first().ok_or(CompileError::EmptyExpression)?;
            emit_eval(buf, first, registers, depth)?;
            for child in rest {
                if let RowExpr::Row(reg) = child {
                    let row = row_register(registers, *reg)?;
                    emit_arith_load_sib(buf, op, true, dst, CURSOR, row, 0, 0);
                } else {
                    emit_eval(buf, child, registers, depth + 1)?;
                    emit_arith_rr(buf, op, true, dst, scratch(depth + 1)?);
                }
            }
        }
        RowExpr::Not(child) => {
            emit_eval(buf, child, registers, depth)?;
            emit_not(buf, true, dst);
        }
    }
    Ok(())
}

fn row_register(registers: &RegisterMap, reg: usize) -> Result<Reg, CompileError> {
    if reg >= registers.allocated_count() {
        return Err(CompileError::UnallocatedRow(reg));
    }
    Ok(registers.physical_register(reg))
}
