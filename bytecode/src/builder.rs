use crate::op::{NameKind, Op};

/// Sentinel stored in the operand of the last jump of a [`JumpList`].
const LIST_END: u32 = u32::MAX;

/// A single forward jump whose offset has not yet been resolved.
///
/// Resolve it with [`BytecodeBuilder::bind`].
#[derive(Debug)]
pub struct Label {
    /// Position of the i32 offset bytes in the buffer.
    offset_pos: usize,
    /// Position right after the jump instruction (base for relative offset).
    base: usize,
}

/// A chain of unresolved forward jumps to one shared target.
///
/// Each pending jump's operand holds the buffer offset of the previously
/// added jump, the first one holds [`LIST_END`]. Binding walks the chain
/// and rewrites every operand with its real relative offset.
#[derive(Debug, Default)]
pub struct JumpList {
    head: Option<usize>,
}

impl JumpList {
    pub fn new() -> Self {
        Self { head: None }
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }
}

/// Builds a bytecode byte sequence.
pub struct BytecodeBuilder {
    buf: Vec<u8>,
}

impl BytecodeBuilder {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Current byte offset in the bytecode stream.
    pub fn current_offset(&self) -> usize {
        self.buf.len()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Drop every instruction from `pos` on. Used to turn a just emitted
    /// load into a store.
    pub fn truncate(&mut self, pos: usize) {
        self.buf.truncate(pos);
    }

    // ── emit helpers ───────────────────────────────────────────────

    fn emit_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn emit_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Emit a class A instruction. Returns its offset.
    pub fn emit(&mut self, op: Op, small: u16) -> usize {
        debug_assert_eq!(op.wide_operands(), 0, "{op:?} is not class A");
        let pos = self.buf.len();
        self.buf.push(op as u8);
        self.emit_u16(small);
        pos
    }

    /// Emit a class B instruction. Returns its offset.
    pub fn emit_a(&mut self, op: Op, small: u16, a: u32) -> usize {
        debug_assert_eq!(op.wide_operands(), 1, "{op:?} is not class B");
        let pos = self.buf.len();
        self.buf.push(op as u8);
        self.emit_u16(small);
        self.emit_u32(a);
        pos
    }

    /// Emit a class C instruction. Returns its offset.
    pub fn emit_ab(&mut self, op: Op, small: u16, a: u32, b: u32) -> usize {
        debug_assert_eq!(op.wide_operands(), 2, "{op:?} is not class C");
        let pos = self.buf.len();
        self.buf.push(op as u8);
        self.emit_u16(small);
        self.emit_u32(a);
        self.emit_u32(b);
        pos
    }

    pub fn push_int(&mut self, value: i16) -> usize {
        self.emit(Op::PushInt, value as u16)
    }

    pub fn push_const(&mut self, idx: u32) -> usize {
        self.emit_a(Op::PushConst, 0, idx)
    }

    pub fn load_local(&mut self, slot: u16) -> usize {
        self.emit(Op::LoadLocal, slot)
    }

    pub fn store_local(&mut self, slot: u16) -> usize {
        self.emit(Op::StoreLocal, slot)
    }

    pub fn call_method(&mut self, symbol: u32, argc: u16) -> usize {
        self.emit_a(Op::CallMethod, argc, symbol)
    }

    pub fn load_name(&mut self, kind: NameKind, a: u32, b: u32) -> usize {
        self.emit_ab(Op::LoadName, kind as u16, a, b)
    }

    pub fn store_name(&mut self, kind: NameKind, a: u32, b: u32) -> usize {
        self.emit_ab(Op::StoreName, kind as u16, a, b)
    }

    // ── jumps ──────────────────────────────────────────────────────

    /// Emit a forward jump (any class B jump opcode). Returns a [`Label`]
    /// that must be resolved later with [`bind`](Self::bind).
    pub fn jump(&mut self, op: Op) -> Label {
        debug_assert!(op.is_jump(), "{op:?} is not a jump");
        let pos = self.emit_a(op, 0, 0);
        Label {
            offset_pos: pos + 3,
            base: pos + op.len(),
        }
    }

    /// `CatchTest <class> <offset>` with the mismatch offset left open.
    pub fn catch_test(&mut self, class: u32) -> (usize, Label) {
        let pos = self.emit_ab(Op::CatchTest, 0, class, 0);
        let label = Label {
            offset_pos: pos + 7,
            base: pos + Op::CatchTest.len(),
        };
        (pos, label)
    }

    /// Bind a forward jump label to the current position.
    pub fn bind(&mut self, label: Label) {
        let target = self.buf.len();
        self.bind_to(label, target);
    }

    /// Bind a forward jump label to an explicit target.
    pub fn bind_to(&mut self, label: Label, target: usize) {
        let offset = (target as i64 - label.base as i64) as i32;
        self.buf[label.offset_pos..label.offset_pos + 4]
            .copy_from_slice(&offset.to_le_bytes());
    }

    /// Emit a jump whose target is not yet known and chain it onto `list`.
    pub fn jump_to_list(&mut self, op: Op, list: &mut JumpList) {
        debug_assert!(op.is_jump(), "{op:?} is not a jump");
        let prev = list.head.map_or(LIST_END, |p| p as u32);
        let pos = self.emit_a(op, 0, prev);
        list.head = Some(pos);
    }

    /// Resolve every jump chained on `list` to the current position.
    pub fn bind_list(&mut self, list: JumpList) {
        let target = self.buf.len();
        self.bind_list_to(list, target);
    }

    /// Resolve every jump chained on `list` to `target`.
    pub fn bind_list_to(&mut self, list: JumpList, target: usize) {
        let mut cursor = list.head;
        while let Some(pos) = cursor {
            let op = self.op_at(pos);
            let next = self.read_a(pos);
            let offset = (target as i64 - (pos + op.len()) as i64) as i32;
            self.patch_a(pos, offset as u32);
            cursor = (next != LIST_END).then_some(next as usize);
        }
    }

    /// Emit a backward jump to `target` (an offset obtained from
    /// [`current_offset`](Self::current_offset)).
    pub fn jump_back(&mut self, op: Op, target: usize) {
        debug_assert!(op.is_jump(), "{op:?} is not a jump");
        let base = self.buf.len() + op.len();
        let offset = (target as i64 - base as i64) as i32;
        self.emit_a(op, 0, offset as u32);
    }

    // ── patching ───────────────────────────────────────────────────

    pub fn op_at(&self, pos: usize) -> Op {
        // Offsets handed to the patch API always come from emit calls.
        Op::try_from(self.buf[pos]).unwrap_or(Op::Nop)
    }

    pub fn read_small(&self, pos: usize) -> u16 {
        u16::from_le_bytes([self.buf[pos + 1], self.buf[pos + 2]])
    }

    pub fn read_a(&self, pos: usize) -> u32 {
        read_u32(&self.buf, pos + 3)
    }

    pub fn patch_small(&mut self, pos: usize, small: u16) {
        self.buf[pos + 1..pos + 3].copy_from_slice(&small.to_le_bytes());
    }

    pub fn patch_a(&mut self, pos: usize, a: u32) {
        self.buf[pos + 3..pos + 7].copy_from_slice(&a.to_le_bytes());
    }

    pub fn patch_b(&mut self, pos: usize, b: u32) {
        self.buf[pos + 7..pos + 11].copy_from_slice(&b.to_le_bytes());
    }

    /// Replace the opcode at `pos` with another of the same size class.
    pub fn set_op(&mut self, pos: usize, op: Op) {
        debug_assert_eq!(self.op_at(pos).len(), op.len());
        self.buf[pos] = op as u8;
    }
}

impl Default for BytecodeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Rewrite operands of already finished code. Used by the link pass.
pub fn patch_small_in(code: &mut [u8], pos: usize, small: u16) {
    code[pos + 1..pos + 3].copy_from_slice(&small.to_le_bytes());
}

pub fn patch_a_in(code: &mut [u8], pos: usize, a: u32) {
    code[pos + 3..pos + 7].copy_from_slice(&a.to_le_bytes());
}

pub fn patch_b_in(code: &mut [u8], pos: usize, b: u32) {
    code[pos + 7..pos + 11].copy_from_slice(&b.to_le_bytes());
}

fn read_u32(bytes: &[u8], pos: usize) -> u32 {
    u32::from_le_bytes([
        bytes[pos],
        bytes[pos + 1],
        bytes[pos + 2],
        bytes[pos + 3],
    ])
}
