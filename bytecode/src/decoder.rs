use core::fmt;

use crate::instruction::Instruction;
use crate::op::{NameKind, Op};

/// Why a byte sequence did not decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    UnknownOp { pc: usize, byte: u8 },
    Truncated { pc: usize },
    BadNameKind { pc: usize, raw: u16 },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownOp { pc, byte } => {
                write!(f, "unknown opcode 0x{byte:02x} at {pc}")
            }
            Self::Truncated { pc } => {
                write!(f, "truncated instruction at {pc}")
            }
            Self::BadNameKind { pc, raw } => {
                write!(f, "invalid name kind {raw} at {pc}")
            }
        }
    }
}

impl std::error::Error for DecodeError {}

/// Decode the instruction starting at `pc`, returning it with the offset of
/// the next instruction.
#[inline]
pub fn decode_at(
    bytes: &[u8],
    pc: usize,
) -> Result<(Instruction, usize), DecodeError> {
    let byte = *bytes.get(pc).ok_or(DecodeError::Truncated { pc })?;
    let op =
        Op::try_from(byte).map_err(|byte| DecodeError::UnknownOp { pc, byte })?;
    let end = pc + op.len();
    if end > bytes.len() {
        return Err(DecodeError::Truncated { pc });
    }

    let small = read_u16(bytes, pc + 1);
    let a = if op.wide_operands() > 0 { read_u32(bytes, pc + 3) } else { 0 };
    let b = if op.wide_operands() > 1 { read_u32(bytes, pc + 7) } else { 0 };

    let instr = match op {
        Op::Nop => Instruction::Nop,
        Op::PushNil => Instruction::PushNil,
        Op::PushTrue => Instruction::PushTrue,
        Op::PushFalse => Instruction::PushFalse,
        Op::PushInt => Instruction::PushInt { value: small as i16 },
        Op::Pop => Instruction::Pop,
        Op::PopN => Instruction::PopN { count: small },
        Op::Dup => Instruction::Dup,
        Op::Dup2 => Instruction::Dup2,
        Op::Swap => Instruction::Swap,
        Op::LoadLocal => Instruction::LoadLocal { slot: small },
        Op::StoreLocal => Instruction::StoreLocal { slot: small },
        Op::Return => Instruction::Return { has_value: small != 0 },
        Op::GenReturn => Instruction::GenReturn,
        Op::Yield => Instruction::Yield,
        Op::Call => Instruction::Call { argc: small },
        Op::Not => Instruction::Not,
        Op::BuildString => Instruction::BuildString { count: small },
        Op::BuildList => Instruction::BuildList { count: small },
        Op::GetIter => Instruction::GetIter,
        Op::Throw => Instruction::Throw,
        Op::Rethrow => Instruction::Rethrow,
        Op::PopHandler => Instruction::PopHandler,

        Op::PushConst => Instruction::PushConst { idx: a },
        Op::Jump => Instruction::Jump { offset: a as i32 },
        Op::JumpIfFalse => Instruction::JumpIfFalse { offset: a as i32 },
        Op::JumpIfTrue => Instruction::JumpIfTrue { offset: a as i32 },
        Op::JumpIfFalseOrPop => {
            Instruction::JumpIfFalseOrPop { offset: a as i32 }
        }
        Op::JumpIfTrueOrPop => Instruction::JumpIfTrueOrPop { offset: a as i32 },
        Op::JumpIfNotNil => Instruction::JumpIfNotNil { offset: a as i32 },
        Op::PushHandler => Instruction::PushHandler { offset: a as i32 },
        Op::ForNext => Instruction::ForNext { offset: a as i32 },
        Op::CallMethod => Instruction::CallMethod { argc: small, symbol: a },
        Op::GetAttr => Instruction::GetAttr { symbol: a },
        Op::SetAttr => Instruction::SetAttr { symbol: a },
        Op::MakeClosure => Instruction::MakeClosure { captures: small, func: a },
        Op::InitModule => Instruction::InitModule { module: a },
        Op::CallSuperCtor => Instruction::CallSuperCtor { argc: small, class: a },
        Op::CheckType => Instruction::CheckType { slot: small, class: a },

        Op::LoadName | Op::StoreName => {
            let kind = NameKind::try_from(small)
                .map_err(|raw| DecodeError::BadNameKind { pc, raw })?;
            if op == Op::LoadName {
                Instruction::LoadName { kind, a, b }
            } else {
                Instruction::StoreName { kind, a, b }
            }
        }
        Op::CatchTest => Instruction::CatchTest { class: a, offset: b as i32 },
        Op::CallSuper => Instruction::CallSuper { argc: small, symbol: a, class: b },
    };

    Ok((instr, end))
}

/// Decodes a bytecode byte slice into `(offset, Instruction)` pairs.
///
/// Iteration stops after the first [`DecodeError`].
pub struct BytecodeDecoder<'a> {
    bytes: &'a [u8],
    pos: usize,
    failed: bool,
}

impl<'a> BytecodeDecoder<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0, failed: false }
    }

    /// Current byte offset in the stream.
    pub fn offset(&self) -> usize {
        self.pos
    }

    pub fn is_at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }
}

impl Iterator for BytecodeDecoder<'_> {
    type Item = Result<(usize, Instruction), DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.is_at_end() {
            return None;
        }
        let pc = self.pos;
        match decode_at(self.bytes, pc) {
            Ok((instr, next)) => {
                self.pos = next;
                Some(Ok((pc, instr)))
            }
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}

/// Render a listing with one `offset instruction` line per instruction.
/// Relative jumps are annotated with their absolute target.
pub fn disassemble(bytes: &[u8]) -> String {
    use fmt::Write;

    let mut out = String::new();
    for item in BytecodeDecoder::new(bytes) {
        match item {
            Ok((pc, instr)) => {
                let _ = write!(out, "{pc:04} {instr}");
                if let Some(target) = jump_target(pc, &instr) {
                    let _ = write!(out, " (-> {target:04})");
                }
                out.push('\n');
            }
            Err(err) => {
                let _ = writeln!(out, "<{err}>");
            }
        }
    }
    out
}

/// Absolute target of a relative jump instruction at `pc`.
pub fn jump_target(pc: usize, instr: &Instruction) -> Option<usize> {
    let (op, offset) = match *instr {
        Instruction::Jump { offset } => (Op::Jump, offset),
        Instruction::JumpIfFalse { offset } => (Op::JumpIfFalse, offset),
        Instruction::JumpIfTrue { offset } => (Op::JumpIfTrue, offset),
        Instruction::JumpIfFalseOrPop { offset } => (Op::JumpIfFalseOrPop, offset),
        Instruction::JumpIfTrueOrPop { offset } => (Op::JumpIfTrueOrPop, offset),
        Instruction::JumpIfNotNil { offset } => (Op::JumpIfNotNil, offset),
        Instruction::PushHandler { offset } => (Op::PushHandler, offset),
        Instruction::ForNext { offset } => (Op::ForNext, offset),
        Instruction::CatchTest { offset, .. } => (Op::CatchTest, offset),
        _ => return None,
    };
    let base = (pc + op.len()) as i64;
    usize::try_from(base + offset as i64).ok()
}

#[inline(always)]
fn read_u16(bytes: &[u8], pos: usize) -> u16 {
    u16::from_le_bytes([bytes[pos], bytes[pos + 1]])
}

#[inline(always)]
fn read_u32(bytes: &[u8], pos: usize) -> u32 {
    u32::from_le_bytes([
        bytes[pos],
        bytes[pos + 1],
        bytes[pos + 2],
        bytes[pos + 3],
    ])
}
