//! x86-64 instruction encoders for the matcher code generator.
//!
//! Each function appends one instruction to the code buffer. Memory
//! operands follow the full ModR/M rules: rsp/r12 bases force a SIB
//! byte, rbp/r13 bases force an explicit displacement.

use crate::code_buffer::CodeBuffer;
use crate::label::{Label, LabelTable};
use crate::x86_64::regs::Reg;

/// Two-operand ALU operations, addressed by their 0x00-row base opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ArithOp {
    Add = 0x00,
    Or = 0x08,
    And = 0x20,
    Sub = 0x28,
    Xor = 0x30,
    Cmp = 0x38,
}

impl ArithOp {
    /// ModR/M extension digit for the 0x81/0x83 immediate forms.
    #[inline]
    const fn ext(self) -> u8 {
        (self as u8) >> 3
    }
}

/// Shift operations, addressed by their 0xC1 ModR/M extension digit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ShiftOp {
    Shl = 4,
    Shr = 5,
    Sar = 7,
}

/// Condition codes (low nibble of the 0F 8x long-Jcc opcode).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Cc {
    Below = 0x2,
    Ae = 0x3,
    Eq = 0x4,
    Ne = 0x5,
}

/// Emit a REX prefix when any of W / reg / index / base need one.
fn emit_rex(buf: &mut CodeBuffer, w: bool, reg: u8, index: u8, base: u8) {
    let mut rex: u8 = 0x40;
    if w {
        rex |= 0x08;
    }
    if reg >= 8 {
        rex |= 0x04;
    }
    if index >= 8 {
        rex |= 0x02;
    }
    if base >= 8 {
        rex |= 0x01;
    }
    if rex != 0x40 {
        buf.emit_u8(rex);
    }
}

/// ModR/M (+ SIB) (+ disp) for a `[base + disp]` memory operand, with
/// `reg` in the reg field.
fn emit_modrm_disp(buf: &mut CodeBuffer, reg: Reg, base: Reg, disp: i32) {
    let r = reg.low3();
    let b = base.low3();
    if b == 4 {
        // rsp/r12 base: the rm encoding is taken by SIB, so emit an
        // index-less SIB byte.
        if disp == 0 {
            buf.emit_u8(r << 3 | 4);
            buf.emit_u8(0x24);
        } else if (-128..=127).contains(&disp) {
            buf.emit_u8(0x40 | r << 3 | 4);
            buf.emit_u8(0x24);
            buf.emit_u8(disp as u8);
        } else {
            buf.emit_u8(0x80 | r << 3 | 4);
            buf.emit_u8(0x24);
            buf.emit_u32(disp as u32);
        }
    } else if disp == 0 && b != 5 {
        // rbp/r13 cannot use mod=00 (that encoding is rip-relative).
        buf.emit_u8(r << 3 | b);
    } else if (-128..=127).contains(&disp) {
        buf.emit_u8(0x40 | r << 3 | b);
        buf.emit_u8(disp as u8);
    } else {
        buf.emit_u8(0x80 | r << 3 | b);
        buf.emit_u32(disp as u32);
    }
}

/// ModR/M + SIB (+ disp) for a `[base + index * 2^shift + disp]`
/// memory operand, with `reg` in the reg field.
fn emit_modrm_sib_disp(buf: &mut CodeBuffer, reg: Reg, base: Reg, index: Reg, shift: u8, disp: i32) {
    debug_assert!(index != Reg::Rsp, "rsp cannot be an index register");
    debug_assert!(shift <= 3);
    let sib = shift << 6 | index.low3() << 3 | base.low3();
    if disp == 0 && base.low3() != 5 {
        buf.emit_u8(reg.low3() << 3 | 4);
        buf.emit_u8(sib);
    } else if (-128..=127).contains(&disp) {
        buf.emit_u8(0x40 | reg.low3() << 3 | 4);
        buf.emit_u8(sib);
        buf.emit_u8(disp as u8);
    } else {
        buf.emit_u8(0x80 | reg.low3() << 3 | 4);
        buf.emit_u8(sib);
        buf.emit_u32(disp as u32);
    }
}

// -- Stack --

/// Emit `push reg` (64-bit).
pub fn emit_push(buf: &mut CodeBuffer, reg: Reg) {
    if reg.needs_rex() {
        buf.emit_u8(0x41); // REX.B
    }
    buf.emit_u8(0x50 + reg.low3());
}

/// Emit `pop reg` (64-bit).
pub fn emit_pop(buf: &mut CodeBuffer, reg: Reg) {
    if reg.needs_rex() {
        buf.emit_u8(0x41); // REX.B
    }
    buf.emit_u8(0x58 + reg.low3());
}

// -- Data movement --

/// Emit `mov dst, src` (register to register).
pub fn emit_mov_rr(buf: &mut CodeBuffer, rexw: bool, dst: Reg, src: Reg) {
    emit_rex(buf, rexw, src as u8, 0, dst as u8);
    buf.emit_u8(0x89); // MOV r/m, r
    buf.emit_u8(0xC0 | src.low3() << 3 | dst.low3());
}

/// Emit `mov reg, imm`, picking the shortest encoding.
pub fn emit_mov_ri(buf: &mut CodeBuffer, rexw: bool, reg: Reg, val: u64) {
    if val == 0 {
        // xor reg32, reg32 zero-extends to 64 bits.
        emit_rex(buf, false, reg as u8, 0, reg as u8);
        buf.emit_u8(0x31); // XOR r/m32, r32
        buf.emit_u8(0xC0 | reg.low3() << 3 | reg.low3());
    } else if val <= u32::MAX as u64 {
        // mov reg32, imm32 zero-extends to 64 bits.
        if reg.needs_rex() {
            buf.emit_u8(0x41); // REX.B
        }
        buf.emit_u8(0xB8 + reg.low3());
        buf.emit_u32(val as u32);
    } else if rexw && (i32::MIN as i64..=i32::MAX as i64).contains(&(val as i64)) {
        // mov reg64, simm32 (sign-extended).
        emit_rex(buf, true, 0, 0, reg as u8);
        buf.emit_u8(0xC7);
        buf.emit_u8(0xC0 | reg.low3());
        buf.emit_u32(val as u32);
    } else {
        // movabs reg64, imm64.
        emit_rex(buf, true, 0, 0, reg as u8);
        buf.emit_u8(0xB8 + reg.low3());
        buf.emit_u64(val);
    }
}

/// Emit `mov dst, [base + disp]`.
pub fn emit_load(buf: &mut CodeBuffer, rexw: bool, dst: Reg, base: Reg, disp: i32) {
    emit_rex(buf, rexw, dst as u8, 0, base as u8);
    buf.emit_u8(0x8B); // MOV r, r/m
    emit_modrm_disp(buf, dst, base, disp);
}

/// Emit `mov [base + disp], src`.
pub fn emit_store(buf: &mut CodeBuffer, rexw: bool, src: Reg, base: Reg, disp: i32) {
    emit_rex(buf, rexw, src as u8, 0, base as u8);
    buf.emit_u8(0x89); // MOV r/m, r
    emit_modrm_disp(buf, src, base, disp);
}

/// Emit `mov dst, [base + index * 2^shift + disp]`.
pub fn emit_load_sib(
    buf: &mut CodeBuffer,
    rexw: bool,
    dst: Reg,
    base: Reg,
    index: Reg,
    shift: u8,
    disp: i32,
) {
    emit_rex(buf, rexw, dst as u8, index as u8, base as u8);
    buf.emit_u8(0x8B);
    emit_modrm_sib_disp(buf, dst, base, index, shift, disp);
}

/// Emit `mov [base + index * 2^shift + disp], src`.
pub fn emit_store_sib(
    buf: &mut CodeBuffer,
    rexw: bool,
    src: Reg,
    base: Reg,
    index: Reg,
    shift: u8,
    disp: i32,
) {
    emit_rex(buf, rexw, src as u8, index as u8, base as u8);
    buf.emit_u8(0x89);
    emit_modrm_sib_disp(buf, src, base, index, shift, disp);
}

// -- Arithmetic and logic --

/// Emit `op dst, src` (register to register).
pub fn emit_arith_rr(buf: &mut CodeBuffer, op: ArithOp, rexw: bool, dst: Reg, src: Reg) {
    emit_rex(buf, rexw, dst as u8, 0, src as u8);
    buf.emit_u8(op as u8 | 0x03); // op r, r/m
    buf.emit_u8(0xC0 | dst.low3() << 3 | src.low3());
}

/// Emit `op reg, imm` via the 0x83 (imm8) or 0x81 (imm32) form.
pub fn emit_arith_ri(buf: &mut CodeBuffer, op: ArithOp, rexw: bool, reg: Reg, imm: i32) {
    emit_rex(buf, rexw, 0, 0, reg as u8);
    if (-128..=127).contains(&imm) {
        buf.emit_u8(0x83);
        buf.emit_u8(0xC0 | op.ext() << 3 | reg.low3());
        buf.emit_u8(imm as u8);
    } else {
        buf.emit_u8(0x81);
        buf.emit_u8(0xC0 | op.ext() << 3 | reg.low3());
        buf.emit_u32(imm as u32);
    }
}

/// Emit `op dst, [base + disp]` (memory source).
pub fn emit_arith_load(buf: &mut CodeBuffer, op: ArithOp, rexw: bool, dst: Reg, base: Reg, disp: i32) {
    emit_rex(buf, rexw, dst as u8, 0, base as u8);
    buf.emit_u8(op as u8 | 0x03); // op r, r/m
    emit_modrm_disp(buf, dst, base, disp);
}

/// Emit `op dst, [base + index * 2^shift + disp]` (memory source).
pub fn emit_arith_load_sib(
    buf: &mut CodeBuffer,
    op: ArithOp,
    rexw: bool,
    dst: Reg,
    base: Reg,
    index: Reg,
    shift: u8,
    disp: i32,
) {
    emit_rex(buf, rexw, dst as u8, index as u8, base as u8);
    buf.emit_u8(op as u8 | 0x03);
    emit_modrm_sib_disp(buf, dst, base, index, shift, disp);
}

/// Emit `op [base + disp], src` (memory destination).
pub fn emit_arith_store(buf: &mut CodeBuffer, op: ArithOp, rexw: bool, src: Reg, base: Reg, disp: i32) {
    emit_rex(buf, rexw, src as u8, 0, base as u8);
    buf.emit_u8(op as u8 | 0x01); // op r/m, r
    emit_modrm_disp(buf, src, base, disp);
}

/// Emit `op [base + index * 2^shift + disp], src` (memory destination).
pub fn emit_arith_store_sib(
    buf: &mut CodeBuffer,
    op: ArithOp,
    rexw: bool,
    src: Reg,
    base: Reg,
    index: Reg,
    shift: u8,
    disp: i32,
) {
    emit_rex(buf, rexw, src as u8, index as u8, base as u8);
    buf.emit_u8(op as u8 | 0x01);
    emit_modrm_sib_disp(buf, src, base, index, shift, disp);
}

/// Emit `test a, b`.
pub fn emit_test_rr(buf: &mut CodeBuffer, rexw: bool, a: Reg, b: Reg) {
    emit_rex(buf, rexw, a as u8, 0, b as u8);
    buf.emit_u8(0x85); // TEST r/m, r
    buf.emit_u8(0xC0 | a.low3() << 3 | b.low3());
}

/// Emit `not reg`.
pub fn emit_not(buf: &mut CodeBuffer, rexw: bool, reg: Reg) {
    emit_rex(buf, rexw, 0, 0, reg as u8);
    buf.emit_u8(0xF7);
    buf.emit_u8(0xD0 | reg.low3()); // /2
}

/// Emit `shl/shr/sar reg, imm`.
pub fn emit_shift_ri(buf: &mut CodeBuffer, op: ShiftOp, rexw: bool, reg: Reg, imm: u8) {
    emit_rex(buf, rexw, 0, 0, reg as u8);
    if imm == 1 {
        buf.emit_u8(0xD1);
        buf.emit_u8(0xC0 | (op as u8) << 3 | reg.low3());
    } else {
        buf.emit_u8(0xC1);
        buf.emit_u8(0xC0 | (op as u8) << 3 | reg.low3());
        buf.emit_u8(imm);
    }
}

// -- Bit scanning --

/// Emit `bsf dst, src`. Sets ZF when `src` is zero.
pub fn emit_bsf(buf: &mut CodeBuffer, rexw: bool, dst: Reg, src: Reg) {
    emit_rex(buf, rexw, dst as u8, 0, src as u8);
    buf.emit_u8(0x0F);
    buf.emit_u8(0xBC);
    buf.emit_u8(0xC0 | dst.low3() << 3 | src.low3());
}

/// Emit `btr target, bit` (reset the bit indexed by a register).
pub fn emit_btr_rr(buf: &mut CodeBuffer, rexw: bool, target: Reg, bit: Reg) {
    emit_rex(buf, rexw, bit as u8, 0, target as u8);
    buf.emit_u8(0x0F);
    buf.emit_u8(0xB3);
    buf.emit_u8(0xC0 | bit.low3() << 3 | target.low3());
}

/// Emit `bts target, bit` (set the bit indexed by a register).
pub fn emit_bts_rr(buf: &mut CodeBuffer, rexw: bool, target: Reg, bit: Reg) {
    emit_rex(buf, rexw, bit as u8, 0, target as u8);
    buf.emit_u8(0x0F);
    buf.emit_u8(0xAB);
    buf.emit_u8(0xC0 | bit.low3() << 3 | target.low3());
}

// -- Read-modify-write memory --

/// Emit `inc qword [base + disp]`.
pub fn emit_inc_mem(buf: &mut CodeBuffer, base: Reg, disp: i32) {
    emit_rex(buf, true, 0, 0, base as u8);
    buf.emit_u8(0xFF);
    emit_modrm_disp(buf, Reg::Rax, base, disp); // /0
}

/// Emit `dec qword [base + disp]`.
pub fn emit_dec_mem(buf: &mut CodeBuffer, base: Reg, disp: i32) {
    emit_rex(buf, true, 0, 0, base as u8);
    buf.emit_u8(0xFF);
    emit_modrm_disp(buf, Reg::Rcx, base, disp); // /1
}

// -- Control flow --

/// Emit `ret`.
pub fn emit_ret(buf: &mut CodeBuffer) {
    buf.emit_u8(0xC3);
}

/// Emit `jmp rel32` to a label, recording a fixup if it is unplaced.
pub fn emit_jmp_label(buf: &mut CodeBuffer, labels: &mut LabelTable, label: Label) {
    buf.emit_u8(0xE9);
    emit_rel32(buf, labels, label);
}

/// Emit `jcc rel32` to a label, recording a fixup if it is unplaced.
pub fn emit_jcc_label(buf: &mut CodeBuffer, labels: &mut LabelTable, cc: Cc, label: Label) {
    buf.emit_u8(0x0F);
    buf.emit_u8(0x80 | cc as u8);
    emit_rel32(buf, labels, label);
}

fn emit_rel32(buf: &mut CodeBuffer, labels: &mut LabelTable, label: Label) {
    match labels.value(label) {
        Some(target) => {
            let disp = target as i64 - (buf.offset() as i64 + 4);
            debug_assert!((i32::MIN as i64..=i32::MAX as i64).contains(&disp));
            buf.emit_u32(disp as u32);
        }
        None => {
            labels.record_use(label, buf.offset());
            buf.emit_u32(0);
        }
    }
}
