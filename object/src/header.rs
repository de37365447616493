use crate::value::ClassId;

bitflags::bitflags! {
    /// Bookkeeping flags of a heap instance.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HeaderFlags: u8 {
        /// The class chain defines `__del__`.
        const HAS_DESTRUCTOR = 1 << 0;
        /// Count reached zero; the destructor chain is queued or running.
        const FINALIZING = 1 << 1;
        /// The destructor chain already ran.
        const FINALIZED = 1 << 2;
    }
}

/// Refcount value of instances that are never freed.
pub const PERMANENT: u32 = u32::MAX;

/// Header of every heap instance.
#[derive(Debug, Clone)]
pub struct Header {
    pub refcount: u32,
    pub class: ClassId,
    pub flags: HeaderFlags,
}

impl Header {
    pub fn new(class: ClassId) -> Self {
        Self {
            refcount: 1,
            class,
            flags: HeaderFlags::empty(),
        }
    }

    pub fn permanent(class: ClassId) -> Self {
        Self {
            refcount: PERMANENT,
            class,
            flags: HeaderFlags::empty(),
        }
    }

    #[inline(always)]
    pub fn is_permanent(&self) -> bool {
        self.refcount == PERMANENT
    }
}
