/// x86-64 general-purpose register indices.
///
/// Encoding matches the x86-64 ModR/M and REX register numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Reg {
    Rax = 0,
    Rcx = 1,
    Rdx = 2,
    Rbx = 3,
    Rsp = 4,
    Rbp = 5,
    Rsi = 6,
    Rdi = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
    R15 = 15,
}

impl Reg {
    /// Low 3 bits of the register encoding (for ModR/M and SIB).
    #[inline]
    pub const fn low3(self) -> u8 {
        (self as u8) & 0x7
    }

    /// Whether this register requires a REX extension bit (R8-R15).
    #[inline]
    pub const fn needs_rex(self) -> bool {
        (self as u8) >= 8
    }

    pub const fn from_u8(val: u8) -> Reg {
        match val {
            0 => Reg::Rax,
            1 => Reg::Rcx,
            2 => Reg::Rdx,
            3 => Reg::Rbx,
            4 => Reg::Rsp,
            5 => Reg::Rbp,
            6 => Reg::Rsi,
            7 => Reg::Rdi,
            8 => Reg::R8,
            9 => Reg::R9,
            10 => Reg::R10,
            11 => Reg::R11,
            12 => Reg::R12,
            13 => Reg::R13,
            14 => Reg::R14,
            15 => Reg::R15,
            _ => panic!("invalid register number"),
        }
    }
}

// -- Matcher register convention --
//
// The emitted matcher uses a fixed internal assignment regardless of
// the host calling convention; the prologue normalizes the incoming
// argument into PARAMS.

/// Parameters-block pointer throughout the emitted function.
pub const PARAMS: Reg = Reg::Rdi;

/// Row-offset table pointer, loaded once in the prologue.
pub const ROW_OFFSETS: Reg = Reg::Rsi;

/// Base pointer of the slice currently being scanned.
pub const SLICE: Reg = Reg::Rdx;

/// Quadword cursor within the current slice. Row quadwords are read
/// as `[CURSOR + row-offset-register]`, so the cursor starts at the
/// slice base and advances by 8 per iteration.
pub const CURSOR: Reg = Reg::Rcx;

/// First register holding a preloaded row offset; a plan with K rows
/// occupies r8..r8+K-1.
pub const ROW_BASE: u8 = 8;

/// Row registers may extend through r14; r15 stays free for the drain.
pub const MAX_ROW_REGS: usize = 7;

/// First-argument register of the host calling convention. The
/// prologue moves it into `PARAMS` when the two differ; the selection
/// happens here at compile time, never in the emitted code.
pub const HOST_ARG0: Reg = if cfg!(windows) { Reg::Rcx } else { Reg::Rdi };

/// Callee-saved registers the matcher prologue saves and the epilogue
/// restores (System V AMD64 ABI).
pub const CALLEE_SAVED: &[Reg] = &[Reg::Rbp, Reg::Rbx, Reg::R12, Reg::R13, Reg::R14, Reg::R15];

// -- Drain scratch assignments --
//
// The drain saves r9..r15 on entry and restores them on exit, so the
// preloaded row offsets in r8.. survive across iterations.

/// Registers the drain saves around itself.
pub const DRAIN_SAVED: &[Reg] = &[Reg::R9, Reg::R10, Reg::R11, Reg::R12, Reg::R13, Reg::R14, Reg::R15];

/// Dedupe summary quadword while it is being scanned.
pub const DRAIN_SUMMARY: Reg = Reg::Rax;
/// Index of the nonempty bucket under scan (bsf over the summary).
pub const DRAIN_QUAD: Reg = Reg::R15;
/// Current bucket contents.
pub const DRAIN_BUCKET: Reg = Reg::R14;
/// Bit index of the match under scan (bsf over the bucket).
pub const DRAIN_BIT: Reg = Reg::R13;
/// Match-record index loaded from the parameters block.
pub const DRAIN_MATCH_IDX: Reg = Reg::R12;
/// Computed document index.
pub const DRAIN_DOC: Reg = Reg::R11;
/// Base pointer of the match-record output array.
pub const DRAIN_MATCHES: Reg = Reg::R10;
/// The canonical slice object pointer, read from the slice base.
pub const DRAIN_SLICE_OBJ: Reg = Reg::R9;
