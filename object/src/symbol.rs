use string_interner::{DefaultStringInterner, DefaultSymbol, Symbol as _};

/// Interned identifier. Method names, field names and module-level names
/// are all compared as symbols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(pub u32);

impl Symbol {
    #[inline(always)]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Process-wide symbol table.
#[derive(Debug, Default)]
pub struct Symbols {
    interner: DefaultStringInterner,
}

impl Symbols {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, name: &str) -> Symbol {
        Symbol(self.interner.get_or_intern(name).to_usize() as u32)
    }

    /// Symbol of an already interned name.
    pub fn lookup(&self, name: &str) -> Option<Symbol> {
        self.interner.get(name).map(|s| Symbol(s.to_usize() as u32))
    }

    pub fn resolve(&self, sym: Symbol) -> &str {
        DefaultSymbol::try_from_usize(sym.index())
            .and_then(|s| self.interner.resolve(s))
            .unwrap_or("<unknown>")
    }

    pub fn len(&self) -> usize {
        self.interner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_stable() {
        let mut symbols = Symbols::new();
        let a = symbols.intern("__add__");
        let b = symbols.intern("next");
        assert_ne!(a, b);
        assert_eq!(symbols.intern("__add__"), a);
        assert_eq!(symbols.resolve(b), "next");
        assert_eq!(symbols.lookup("next"), Some(b));
        assert_eq!(symbols.lookup("missing"), None);
    }
}
