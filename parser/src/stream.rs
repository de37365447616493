//! Token stream with bounded lookahead and statement-termination control.

use std::io::Read;

use crate::lexer::Lexer;
use crate::span::{Pos, Span};
use crate::token::{Token, TokenKind};

/// Maximum `n` accepted by [`TokenStream::peek`] is `LOOKAHEAD - 1`.
pub const LOOKAHEAD: usize = 4;

/// Raw tokens kept unconsumed. Line breaks are collapsed by the lexer, so
/// `LOOKAHEAD` significant tokens never need more than twice as many raw
/// ones.
const RING: usize = 2 * LOOKAHEAD + 2;

#[derive(Debug, Clone, Copy)]
struct NewlineMode {
    enabled: bool,
    /// Group depth at which line breaks count.
    depth: u32,
}

/// A forward-only sequence of classified tokens.
///
/// Line breaks reach the consumer only while the current newline mode is
/// enabled and no `(` / `[` opened after the mode was pushed is still open.
pub struct TokenStream<R: Read> {
    lexer: Lexer<R>,
    ring: [Option<Token>; RING],
    head: usize,
    len: usize,
    /// Open `(` and `[`.
    group_depth: u32,
    /// Open brackets of every kind plus open interpolations.
    nesting: u32,
    modes: Vec<NewlineMode>,
    last_pos: Pos,
}

impl<R: Read> TokenStream<R> {
    pub fn new(lexer: Lexer<R>) -> Self {
        Self {
            lexer,
            ring: std::array::from_fn(|_| None),
            head: 0,
            len: 0,
            group_depth: 0,
            nesting: 0,
            modes: vec![NewlineMode { enabled: true, depth: 0 }],
            last_pos: Pos::origin(),
        }
    }

    fn raw(&self, i: usize) -> Option<&Token> {
        self.ring[(self.head + i) % RING].as_ref()
    }

    fn pull(&mut self) {
        let token = self.lexer.next().unwrap_or_else(|| {
            Token::new(TokenKind::Eof, Span::point(self.last_pos))
        });
        self.last_pos = token.span.end;
        let slot = (self.head + self.len) % RING;
        self.ring[slot] = Some(token);
        self.len += 1;
    }

    fn newline_counts(&self, depth: u32) -> bool {
        self.modes
            .last()
            .is_some_and(|m| m.enabled && m.depth == depth)
    }

    /// Ring index of the `n`-th significant token.
    fn locate(&mut self, n: usize) -> usize {
        debug_assert!(n < LOOKAHEAD, "peek({n}) beyond lookahead");
        let mut depth = self.group_depth;
        let mut seen = 0;
        let mut i = 0;
        loop {
            if i == self.len {
                self.pull();
            }
            let Some(token) = self.raw(i) else {
                return i;
            };
            let significant = match token.kind {
                TokenKind::Newline => self.newline_counts(depth),
                _ => true,
            };
            match token.kind {
                TokenKind::LParen | TokenKind::LBracket => depth += 1,
                TokenKind::RParen | TokenKind::RBracket => {
                    depth = depth.saturating_sub(1)
                }
                TokenKind::Eof => return i,
                _ => {}
            }
            if significant {
                if seen == n {
                    return i;
                }
                seen += 1;
            }
            i += 1;
        }
    }

    /// Look at the `n`-th upcoming token without consuming it.
    pub fn peek(&mut self, n: usize) -> &Token {
        let i = self.locate(n);
        let slot = (self.head + i) % RING;
        self.ring[slot]
            .as_ref()
            .unwrap_or_else(|| unreachable!("located token missing"))
    }

    pub fn peek_kind(&mut self, n: usize) -> &TokenKind {
        &self.peek(n).kind
    }

    /// Consume the next significant token.
    pub fn next_token(&mut self) -> Token {
        let target = self.locate(0);
        let mut taken = None;
        for _ in 0..=target {
            let slot = self.head;
            self.head = (self.head + 1) % RING;
            self.len -= 1;
            taken = self.ring[slot].take();
        }
        let token = taken.unwrap_or_else(|| {
            Token::new(TokenKind::Eof, Span::point(self.last_pos))
        });
        if matches!(token.kind, TokenKind::Eof) {
            // Keep reporting end of input.
            self.head = (self.head + RING - 1) % RING;
            self.ring[self.head] = Some(token.clone());
            self.len += 1;
            return token;
        }
        match token.kind {
            TokenKind::LParen | TokenKind::LBracket => {
                self.group_depth += 1;
                self.nesting += 1;
            }
            TokenKind::RParen | TokenKind::RBracket => {
                self.group_depth = self.group_depth.saturating_sub(1);
                self.nesting = self.nesting.saturating_sub(1);
            }
            TokenKind::LBrace | TokenKind::StrStart(_) => self.nesting += 1,
            TokenKind::RBrace | TokenKind::StrEnd(_) => {
                self.nesting = self.nesting.saturating_sub(1)
            }
            _ => {}
        }
        token
    }

    /// Make line breaks significant (or not) from here on, relative to the
    /// current bracket depth. Undo with [`pop_newlines`](Self::pop_newlines).
    pub fn push_newlines(&mut self, enabled: bool) {
        self.modes.push(NewlineMode {
            enabled,
            depth: self.group_depth,
        });
    }

    pub fn pop_newlines(&mut self) {
        if self.modes.len() > 1 {
            self.modes.pop();
        }
    }

    /// Consume line breaks (and `;`) until something else comes up.
    pub fn skip_newlines(&mut self) {
        while matches!(
            self.peek_kind(0),
            TokenKind::Newline | TokenKind::Semicolon
        ) {
            self.next_token();
        }
    }

    /// Open brackets and interpolations of the consumed prefix.
    pub fn nesting(&self) -> u32 {
        self.nesting
    }

    /// Line of the next token.
    pub fn line(&mut self) -> u32 {
        self.peek(0).line()
    }
}

/// Whether `source` is a complete fragment: every bracket and string is
/// closed and it does not end in the middle of an expression.
pub fn fragment_is_complete(source: &str) -> bool {
    let mut stream = TokenStream::new(Lexer::from_str(source));
    let mut last = None;
    loop {
        let token = stream.next_token();
        match token.kind {
            TokenKind::Eof => break,
            TokenKind::Unterminated(_) => return false,
            TokenKind::Newline => {}
            kind => last = Some(kind),
        }
    }
    stream.nesting() == 0 && !last.is_some_and(|k| k.expects_operand())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::Keyword;

    fn stream(src: &str) -> TokenStream<&[u8]> {
        TokenStream::new(Lexer::from_str(src))
    }

    fn drain(src: &str) -> Vec<TokenKind> {
        let mut s = stream(src);
        let mut out = Vec::new();
        loop {
            let t = s.next_token();
            if t.is_eof() {
                break;
            }
            out.push(t.kind);
        }
        out
    }

    #[test]
    fn peek_does_not_consume() {
        let mut s = stream("a b c");
        assert_eq!(s.peek_kind(2), &TokenKind::Name("c".into()));
        assert_eq!(s.peek_kind(0), &TokenKind::Name("a".into()));
        assert_eq!(s.next_token().kind, TokenKind::Name("a".into()));
        assert_eq!(s.peek_kind(0), &TokenKind::Name("b".into()));
    }

    #[test]
    fn newlines_suppressed_inside_parens() {
        assert_eq!(drain("f(a,\nb)\nc"), vec![
            TokenKind::Name("f".into()),
            TokenKind::LParen,
            TokenKind::Name("a".into()),
            TokenKind::Comma,
            TokenKind::Name("b".into()),
            TokenKind::RParen,
            TokenKind::Newline,
            TokenKind::Name("c".into()),
        ]);
    }

    #[test]
    fn braces_keep_newlines() {
        assert_eq!(drain("{\na\n}"), vec![
            TokenKind::LBrace,
            TokenKind::Newline,
            TokenKind::Name("a".into()),
            TokenKind::Newline,
            TokenKind::RBrace,
        ]);
    }

    #[test]
    fn block_inside_parens_can_reenable_newlines() {
        let mut s = stream("(fn() {\nx\ny\n})");
        assert_eq!(s.next_token().kind, TokenKind::LParen);
        assert_eq!(s.next_token().kind, TokenKind::Kw(Keyword::Fn));
        assert_eq!(s.next_token().kind, TokenKind::LParen);
        assert_eq!(s.next_token().kind, TokenKind::RParen);
        assert_eq!(s.next_token().kind, TokenKind::LBrace);
        s.push_newlines(true);
        assert_eq!(s.next_token().kind, TokenKind::Newline);
        assert_eq!(s.next_token().kind, TokenKind::Name("x".into()));
        assert_eq!(s.next_token().kind, TokenKind::Newline);
        assert_eq!(s.next_token().kind, TokenKind::Name("y".into()));
        assert_eq!(s.next_token().kind, TokenKind::Newline);
        assert_eq!(s.next_token().kind, TokenKind::RBrace);
        s.pop_newlines();
        assert_eq!(s.next_token().kind, TokenKind::RParen);
    }

    #[test]
    fn disabled_mode_hides_newlines() {
        let mut s = stream("a\nb");
        s.push_newlines(false);
        assert_eq!(s.next_token().kind, TokenKind::Name("a".into()));
        assert_eq!(s.next_token().kind, TokenKind::Name("b".into()));
    }

    #[test]
    fn eof_is_sticky() {
        let mut s = stream("a");
        s.next_token();
        assert!(s.next_token().is_eof());
        assert!(s.next_token().is_eof());
        assert!(s.peek(1).is_eof());
    }

    #[test]
    fn nesting_counter() {
        let mut s = stream("f([{");
        for _ in 0..4 {
            s.next_token();
        }
        assert_eq!(s.nesting(), 3);
    }

    #[test]
    fn continuation_detection() {
        assert!(fragment_is_complete("let x = 1"));
        assert!(fragment_is_complete("def f() {\n return 1\n}"));
        assert!(!fragment_is_complete("def f() {\n return 1"));
        assert!(!fragment_is_complete("let x = (1 +"));
        assert!(!fragment_is_complete("let x = 1 +"));
        assert!(!fragment_is_complete("\"abc"));
        assert!(!fragment_is_complete("\"a ${b"));
        assert!(fragment_is_complete(""));
    }
}
