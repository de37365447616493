/// Bytecode opcodes.
///
/// Every instruction starts with the opcode byte followed by a 16-bit
/// `small` operand. The position of the opcode in this enum decides how
/// many 32-bit operands follow:
///
/// | Range                                     | Class | Trailing | Length |
/// |-------------------------------------------|-------|----------|--------|
/// | `Nop ..< FIRST_WIDE`                      | A     | none     | 3      |
/// | `FIRST_WIDE ..< FIRST_DOUBLE`             | B     | `a:u32`  | 7      |
/// | `FIRST_DOUBLE ..= LAST`                   | C     | `a`, `b` | 11     |
///
/// Jump offsets are signed and relative to the end of the instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Op {
    // ── Class A ─────────────────────────────────────────────────────
    Nop = 0x00,
    PushNil,
    PushTrue,
    PushFalse,

    /// Push an inline integer. Operands: `value:i16` in `small`.
    PushInt,

    /// Release and drop the top of stack.
    Pop,

    /// Drop `small` stack entries (values released, catch markers removed).
    PopN,

    /// Duplicate the top of stack.
    Dup,

    /// Duplicate the top two entries: `a b -> a b a b`.
    Dup2,

    /// Exchange the top two entries: `a b -> b a`.
    Swap,

    /// Push a copy of frame slot `small`.
    LoadLocal,

    /// Pop the top of stack into frame slot `small`.
    StoreLocal,

    /// Return from the current frame. `small` = 1 when a value is on top.
    Return,

    /// Generator exit: marks the generator exhausted and raises StopIteration.
    GenReturn,

    /// Suspend the current generator frame, handing the top of stack to the
    /// resumer.
    Yield,

    /// Call the value below `small` arguments.
    Call,

    /// Logical negation (not overridable).
    Not,

    /// Concatenate the `__str__` of the top `small` values.
    BuildString,

    /// Collect the top `small` values into a new list.
    BuildList,

    /// Replace the top of stack with its iterator (`__iter__`).
    GetIter,

    /// Raise the top of stack.
    Throw,

    /// Re-raise the exception left by a failed catch-test chain.
    Rethrow,

    /// Remove the catch marker on top of the stack.
    PopHandler,

    // ── Class B ─────────────────────────────────────────────────────
    /// Push constant `a` of the current function.
    PushConst,

    /// Unconditional jump. Operands: `offset:i32` in `a`.
    Jump,

    /// Pop; jump when falsy.
    JumpIfFalse,

    /// Pop; jump when truthy.
    JumpIfTrue,

    /// Jump keeping the value when falsy, otherwise pop it.
    JumpIfFalseOrPop,

    /// Jump keeping the value when truthy, otherwise pop it.
    JumpIfTrueOrPop,

    /// Pop; jump when not nil.
    JumpIfNotNil,

    /// Install a catch marker whose handler is at relative offset `a`.
    PushHandler,

    /// Advance the iterator on top of stack, or jump to relative offset `a`
    /// when it is exhausted.
    ForNext,

    /// Call method `a` (symbol) with `small` arguments on the receiver below
    /// them.
    CallMethod,

    /// Replace the receiver on top with field `a` (symbol).
    GetAttr,

    /// `obj value -> ` store `value` into field `a` of `obj`.
    SetAttr,

    /// Build a closure of function `a`, capturing the top `small` values.
    MakeClosure,

    /// Run the init function of module `a` unless it already ran.
    InitModule,

    /// Run the base constructor of class `a` on `this` with `small`
    /// arguments.
    CallSuperCtor,

    /// Check that frame slot `small` (or the top of stack when
    /// `small == CHECK_TOP`) is an instance of class `a`. Bit 15 of `small`
    /// permits nil.
    CheckType,

    // ── Class C ─────────────────────────────────────────────────────
    /// Push a module-level binding. `small` = [`NameKind`], `a`/`b` its
    /// operands.
    LoadName,

    /// Pop into a module global. Same operands as [`LoadName`](Op::LoadName).
    StoreName,

    /// Test the exception on top of stack against class `a`; on mismatch
    /// jump to relative offset `b`.
    CatchTest,

    /// Call method `a` as found in the base of class `b`, `small` arguments.
    CallSuper,
}

/// `small` value of [`Op::CheckType`] naming the top of stack.
pub const CHECK_TOP: u16 = 0x7FFF;

/// Bit of [`Op::CheckType`]'s `small` operand allowing nil.
pub const CHECK_NULLABLE: u16 = 0x8000;

/// Class operand of a [`Op::CheckType`] or [`Op::CatchTest`] whose class
/// the link pass has not supplied. Executing one raises.
pub const UNRESOLVED_CLASS: u32 = u32::MAX;

impl Op {
    pub const COUNT: usize = Op::CallSuper as usize + 1;
    pub const FIRST_WIDE: Op = Op::PushConst;
    pub const FIRST_DOUBLE: Op = Op::LoadName;

    /// Number of trailing 32-bit operands.
    #[inline(always)]
    pub const fn wide_operands(self) -> usize {
        let byte = self as u8;
        if byte < Self::FIRST_WIDE as u8 {
            0
        } else if byte < Self::FIRST_DOUBLE as u8 {
            1
        } else {
            2
        }
    }

    /// Encoded length in bytes.
    #[inline(always)]
    pub const fn len(self) -> usize {
        3 + 4 * self.wide_operands()
    }

    pub const fn is_jump(self) -> bool {
        matches!(
            self,
            Op::Jump
                | Op::JumpIfFalse
                | Op::JumpIfTrue
                | Op::JumpIfFalseOrPop
                | Op::JumpIfTrueOrPop
                | Op::JumpIfNotNil
                | Op::PushHandler
                | Op::ForNext
        )
    }
}

impl TryFrom<u8> for Op {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, u8> {
        if byte < Self::COUNT as u8 {
            // SAFETY: Op is repr(u8) with contiguous variants starting at 0.
            Ok(unsafe { core::mem::transmute::<u8, Op>(byte) })
        } else {
            Err(byte)
        }
    }
}

/// How the operands of [`Op::LoadName`] / [`Op::StoreName`] are read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum NameKind {
    /// Not yet linked. `a` = the name's symbol.
    Unresolved = 0,
    /// `a` = module, `b` = global slot.
    Global,
    /// `a` = function.
    Function,
    /// `a` = native function.
    Native,
    /// `a` = class.
    Class,
    /// `a` = lazily evaluated constant.
    Constant,
    /// `a` = module.
    Module,
}

impl NameKind {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Unresolved => "unresolved",
            Self::Global => "global",
            Self::Function => "function",
            Self::Native => "native",
            Self::Class => "class",
            Self::Constant => "constant",
            Self::Module => "module",
        }
    }
}

impl TryFrom<u16> for NameKind {
    type Error = u16;

    fn try_from(raw: u16) -> Result<Self, u16> {
        Ok(match raw {
            0 => Self::Unresolved,
            1 => Self::Global,
            2 => Self::Function,
            3 => Self::Native,
            4 => Self::Class,
            5 => Self::Constant,
            6 => Self::Module,
            other => return Err(other),
        })
    }
}
