use core::fmt;

use crate::op::{CHECK_NULLABLE, CHECK_TOP, NameKind, UNRESOLVED_CLASS};

/// A decoded instruction with its operands widened to named fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    Nop,
    PushNil,
    PushTrue,
    PushFalse,
    PushInt { value: i16 },
    Pop,
    PopN { count: u16 },
    Dup,
    Dup2,
    Swap,
    LoadLocal { slot: u16 },
    StoreLocal { slot: u16 },
    Return { has_value: bool },
    GenReturn,
    Yield,
    Call { argc: u16 },
    Not,
    BuildString { count: u16 },
    BuildList { count: u16 },
    GetIter,
    Throw,
    Rethrow,
    PopHandler,

    PushConst { idx: u32 },
    Jump { offset: i32 },
    JumpIfFalse { offset: i32 },
    JumpIfTrue { offset: i32 },
    JumpIfFalseOrPop { offset: i32 },
    JumpIfTrueOrPop { offset: i32 },
    JumpIfNotNil { offset: i32 },
    PushHandler { offset: i32 },
    ForNext { offset: i32 },
    CallMethod { argc: u16, symbol: u32 },
    GetAttr { symbol: u32 },
    SetAttr { symbol: u32 },
    MakeClosure { captures: u16, func: u32 },
    InitModule { module: u32 },
    CallSuperCtor { argc: u16, class: u32 },
    CheckType { slot: u16, class: u32 },

    LoadName { kind: NameKind, a: u32, b: u32 },
    StoreName { kind: NameKind, a: u32, b: u32 },
    CatchTest { class: u32, offset: i32 },
    CallSuper { argc: u16, symbol: u32, class: u32 },
}

/// `c<id>`, or `c?` while the link pass still owes the class.
struct ClassOperand(u32);

impl fmt::Display for ClassOperand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            UNRESOLVED_CLASS => f.write_str("c?"),
            id => write!(f, "c{id}"),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nop => write!(f, "Nop"),
            Self::PushNil => write!(f, "PushNil"),
            Self::PushTrue => write!(f, "PushTrue"),
            Self::PushFalse => write!(f, "PushFalse"),
            Self::PushInt { value } => write!(f, "PushInt {value}"),
            Self::Pop => write!(f, "Pop"),
            Self::PopN { count } => write!(f, "PopN {count}"),
            Self::Dup => write!(f, "Dup"),
            Self::Dup2 => write!(f, "Dup2"),
            Self::Swap => write!(f, "Swap"),
            Self::LoadLocal { slot } => write!(f, "LoadLocal s{slot}"),
            Self::StoreLocal { slot } => write!(f, "StoreLocal s{slot}"),
            Self::Return { has_value } => {
                if *has_value {
                    write!(f, "Return value")
                } else {
                    write!(f, "Return nil")
                }
            }
            Self::GenReturn => write!(f, "GenReturn"),
            Self::Yield => write!(f, "Yield"),
            Self::Call { argc } => write!(f, "Call {argc}"),
            Self::Not => write!(f, "Not"),
            Self::BuildString { count } => write!(f, "BuildString {count}"),
            Self::BuildList { count } => write!(f, "BuildList {count}"),
            Self::GetIter => write!(f, "GetIter"),
            Self::Throw => write!(f, "Throw"),
            Self::Rethrow => write!(f, "Rethrow"),
            Self::PopHandler => write!(f, "PopHandler"),
            Self::PushConst { idx } => write!(f, "PushConst #{idx}"),
            Self::Jump { offset } => write!(f, "Jump ~{offset}"),
            Self::JumpIfFalse { offset } => write!(f, "JumpIfFalse ~{offset}"),
            Self::JumpIfTrue { offset } => write!(f, "JumpIfTrue ~{offset}"),
            Self::JumpIfFalseOrPop { offset } => {
                write!(f, "JumpIfFalseOrPop ~{offset}")
            }
            Self::JumpIfTrueOrPop { offset } => {
                write!(f, "JumpIfTrueOrPop ~{offset}")
            }
            Self::JumpIfNotNil { offset } => write!(f, "JumpIfNotNil ~{offset}"),
            Self::PushHandler { offset } => write!(f, "PushHandler ~{offset}"),
            Self::ForNext { offset } => write!(f, "ForNext ~{offset}"),
            Self::CallMethod { argc, symbol } => {
                write!(f, "CallMethod :{symbol} {argc}")
            }
            Self::GetAttr { symbol } => write!(f, "GetAttr :{symbol}"),
            Self::SetAttr { symbol } => write!(f, "SetAttr :{symbol}"),
            Self::MakeClosure { captures, func } => {
                write!(f, "MakeClosure fn{func} {captures}")
            }
            Self::InitModule { module } => write!(f, "InitModule m{module}"),
            Self::CallSuperCtor { argc, class } => {
                write!(f, "CallSuperCtor c{class} {argc}")
            }
            Self::CheckType { slot, class } => {
                let nullable = if slot & CHECK_NULLABLE != 0 { "?" } else { "" };
                let class = ClassOperand(*class);
                match slot & !CHECK_NULLABLE {
                    CHECK_TOP => write!(f, "CheckType top {class}{nullable}"),
                    s => write!(f, "CheckType s{s} {class}{nullable}"),
                }
            }
            Self::LoadName { kind, a, b } => {
                write!(f, "LoadName {} {a} {b}", kind.name())
            }
            Self::StoreName { kind, a, b } => {
                write!(f, "StoreName {} {a} {b}", kind.name())
            }
            Self::CatchTest { class, offset } => {
                write!(f, "CatchTest {} ~{offset}", ClassOperand(*class))
            }
            Self::CallSuper { argc, symbol, class } => {
                write!(f, "CallSuper c{class} :{symbol} {argc}")
            }
        }
    }
}
