use crate::code_buffer::CodeBuffer;

/// Handle to a branch target within one emitted function.
///
/// Branches may reference a label before it is placed; placing the
/// label back-patches every pending rel32 displacement field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(u32);

#[derive(Debug, Default)]
struct LabelState {
    /// Resolved offset in the code buffer, once placed.
    value: Option<usize>,
    /// Offsets of rel32 displacement fields awaiting this label.
    uses: Vec<usize>,
}

/// Label allocation and resolution for one function being emitted.
#[derive(Debug, Default)]
pub struct LabelTable {
    labels: Vec<LabelState>,
}

impl LabelTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh, unplaced label.
    pub fn alloc(&mut self) -> Label {
        let id = self.labels.len() as u32;
        self.labels.push(LabelState::default());
        Label(id)
    }

    /// Target offset, if the label has been placed.
    pub fn value(&self, label: Label) -> Option<usize> {
        self.labels[label.0 as usize].value
    }

    /// Record a rel32 displacement field at `patch_offset` that must be
    /// resolved when `label` is placed. The displacement is relative to
    /// the end of the field (`patch_offset + 4`).
    pub fn record_use(&mut self, label: Label, patch_offset: usize) {
        self.labels[label.0 as usize].uses.push(patch_offset);
    }

    /// Place `label` at the buffer's current offset and patch every
    /// pending use.
    pub fn place(&mut self, label: Label, buf: &mut CodeBuffer) {
        let target = buf.offset();
        let state = &mut self.labels[label.0 as usize];
        debug_assert!(state.value.is_none(), "label placed twice");
        state.value = Some(target);
        for &patch_offset in &state.uses {
            let disp = target as i64 - (patch_offset as i64 + 4);
            buf.patch_u32(patch_offset, disp as u32);
        }
        state.uses.clear();
    }

    /// Number of labels that were allocated but never placed. Nonzero
    /// after emission means a branch targets garbage.
    pub fn unplaced(&self) -> usize {
        self.labels.iter().filter(|l| l.value.is_none()).count()
    }
}
