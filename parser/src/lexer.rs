/// Streaming lexer for fox source.
///
/// The [`Lexer`] consumes bytes from any [`std::io::Read`] source and
/// implements [`Iterator`] over [`Token`]s, tracking byte offset, line and
/// column for every token it produces.
///
/// # Lexical notes
///
/// | Syntax            | Token                                   |
/// |-------------------|-----------------------------------------|
/// | `# …`             | comment, skipped                        |
/// | `#@ …`            | [`TokenKind::Directive`]                |
/// | `"a ${x} b"`      | `StrStart`, tokens of `x`, `StrEnd`     |
/// | `b"…"`, `re"…"`   | byte string, regular expression         |
/// | `12n`, `3r`       | big integer, rational                   |
///
/// Line breaks are always reported (collapsed to one [`TokenKind::Newline`]);
/// whether they end a statement is decided by the
/// [`TokenStream`](crate::TokenStream). Inside `${ … }` they are whitespace.
use std::io::Read;

use crate::span::{Pos, Span};
use crate::token::{Keyword, Token, TokenKind};

// ═══════════════════════════════════════════════════════════════════
// Read buffer
// ═══════════════════════════════════════════════════════════════════

/// Bytes the lexer may inspect past the current one.
const LOOKAHEAD: usize = 4;

/// `peek()` / `peek_ahead()` / `advance()` over any `Read`, with position
/// tracking.
struct ReadBuf<R: Read> {
    reader: R,
    buf: [u8; LOOKAHEAD],
    /// How many valid bytes are in `buf` starting from `head`.
    filled: usize,
    head: usize,
    reader_eof: bool,
    offset: usize,
    line: u32,
    column: u32,
}

impl<R: Read> ReadBuf<R> {
    fn new(reader: R) -> Self {
        let mut rb = Self {
            reader,
            buf: [0u8; LOOKAHEAD],
            filled: 0,
            head: 0,
            reader_eof: false,
            offset: 0,
            line: 1,
            column: 1,
        };
        rb.fill();
        rb
    }

    fn fill(&mut self) {
        while !self.reader_eof && self.filled < LOOKAHEAD {
            let mut one = [0u8; 1];
            match self.reader.read(&mut one) {
                Ok(0) | Err(_) => self.reader_eof = true,
                Ok(_) => {
                    let slot = (self.head + self.filled) % LOOKAHEAD;
                    self.buf[slot] = one[0];
                    self.filled += 1;
                }
            }
        }
    }

    fn pos(&self) -> Pos {
        Pos::new(self.offset, self.line, self.column)
    }

    fn peek(&self) -> Option<u8> {
        self.peek_ahead(0)
    }

    fn peek_ahead(&self, n: usize) -> Option<u8> {
        (n < self.filled).then(|| self.buf[(self.head + n) % LOOKAHEAD])
    }

    fn advance(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.head = (self.head + 1) % LOOKAHEAD;
        self.filled -= 1;
        self.fill();

        self.offset += 1;
        if b == b'\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(b)
    }
}

// ═══════════════════════════════════════════════════════════════════
// Lexer
// ═══════════════════════════════════════════════════════════════════

/// A streaming lexer for fox source code.
///
/// ```rust
/// use fox_parser::{Lexer, TokenKind};
///
/// let kinds: Vec<TokenKind> = Lexer::from_str("x + 1").map(|t| t.kind).collect();
/// assert_eq!(kinds.len(), 4);
/// ```
pub struct Lexer<R: Read> {
    rb: ReadBuf<R>,
    emitted_eof: bool,
    /// Brace depth at each open `${`.
    interpolation: Vec<u32>,
    brace_depth: u32,
    /// Suppresses runs of line breaks (and leading ones).
    after_newline: bool,
}

impl<R: Read> Lexer<R> {
    pub fn new(reader: R) -> Self {
        Self {
            rb: ReadBuf::new(reader),
            emitted_eof: false,
            interpolation: Vec::new(),
            brace_depth: 0,
            after_newline: true,
        }
    }
}

impl<'a> Lexer<&'a [u8]> {
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(source: &'a str) -> Self {
        Self::new(source.as_bytes())
    }
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_ident_continue(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Split an identifier into one of the three namespaces.
fn classify_ident(text: String) -> TokenKind {
    if let Some(kw) = Keyword::from_ident(&text) {
        return TokenKind::Kw(kw);
    }
    let first = text.as_bytes()[0];
    if !first.is_ascii_uppercase() {
        return TokenKind::Name(text);
    }
    let letters = text.bytes().filter(u8::is_ascii_alphabetic).count();
    let has_lower = text.bytes().any(|b| b.is_ascii_lowercase());
    if !has_lower && letters >= 2 {
        TokenKind::ConstName(text)
    } else {
        TokenKind::TypeName(text)
    }
}

impl<R: Read> Lexer<R> {
    fn pos(&self) -> Pos {
        self.rb.pos()
    }

    fn peek(&self) -> Option<u8> {
        self.rb.peek()
    }

    fn peek_ahead(&self, n: usize) -> Option<u8> {
        self.rb.peek_ahead(n)
    }

    fn advance(&mut self) -> Option<u8> {
        self.rb.advance()
    }

    fn token(&self, kind: TokenKind, start: Pos) -> Token {
        Token::new(kind, Span::new(start, self.pos()))
    }

    // ───────────────────────────────────────────────────────────
    //  Whitespace, comments, directives
    // ───────────────────────────────────────────────────────────

    /// Skip blanks and comments. Returns a newline or directive token when
    /// one is due.
    fn skip_trivia(&mut self) -> Option<Token> {
        loop {
            match self.peek()? {
                b' ' | b'\t' | b'\r' | 0x0C => {
                    self.advance();
                }
                b'\\' if self.peek_ahead(1) == Some(b'\n') => {
                    self.advance();
                    self.advance();
                }
                b'\n' => {
                    let start = self.pos();
                    self.advance();
                    if self.interpolation.is_empty() && !self.after_newline {
                        self.after_newline = true;
                        return Some(self.token(TokenKind::Newline, start));
                    }
                }
                b'#' if self.peek_ahead(1) == Some(b'@') => {
                    let start = self.pos();
                    self.advance();
                    self.advance();
                    let text = self.rest_of_line();
                    self.after_newline = false;
                    return Some(self.token(
                        TokenKind::Directive(text.trim().to_string()),
                        start,
                    ));
                }
                b'#' => {
                    self.rest_of_line();
                }
                _ => return None,
            }
        }
    }

    fn rest_of_line(&mut self) -> String {
        let mut bytes = Vec::new();
        while let Some(b) = self.peek() {
            if b == b'\n' {
                break;
            }
            bytes.push(b);
            self.advance();
        }
        String::from_utf8_lossy(&bytes).into_owned()
    }

    // ───────────────────────────────────────────────────────────
    //  Strings
    // ───────────────────────────────────────────────────────────

    /// Lex string text up to the closing quote or the next `${`.
    ///
    /// `resumed` is set when continuing after an interpolation's `}`.
    fn lex_string_body(&mut self, start: Pos, resumed: bool) -> Token {
        let mut bytes = Vec::new();
        loop {
            match self.advance() {
                Some(b'"') => {
                    let kind = match String::from_utf8(bytes) {
                        Ok(text) if resumed => TokenKind::StrEnd(text),
                        Ok(text) => TokenKind::Str(text),
                        Err(_) => TokenKind::Error("invalid UTF-8 in string".into()),
                    };
                    return self.token(kind, start);
                }
                Some(b'$') if self.peek() == Some(b'{') => {
                    self.advance();
                    self.interpolation.push(self.brace_depth);
                    let kind = match String::from_utf8(bytes) {
                        Ok(text) if resumed => TokenKind::StrMid(text),
                        Ok(text) => TokenKind::StrStart(text),
                        Err(_) => TokenKind::Error("invalid UTF-8 in string".into()),
                    };
                    return self.token(kind, start);
                }
                Some(b'\\') => {
                    if let Err(message) = self.lex_escape(&mut bytes) {
                        return self.token(TokenKind::Error(message), start);
                    }
                }
                Some(b) => bytes.push(b),
                None => return self.token(TokenKind::Unterminated("string"), start),
            }
        }
    }

    fn lex_escape(&mut self, out: &mut Vec<u8>) -> Result<(), String> {
        let b = self.advance().ok_or("unterminated string escape")?;
        match b {
            b'n' => out.push(b'\n'),
            b't' => out.push(b'\t'),
            b'r' => out.push(b'\r'),
            b'0' => out.push(0),
            b'\\' | b'"' | b'$' => out.push(b),
            b'x' => {
                let hi = self.advance().and_then(|d| (d as char).to_digit(16));
                let lo = self.advance().and_then(|d| (d as char).to_digit(16));
                match (hi, lo) {
                    (Some(hi), Some(lo)) => out.push((hi * 16 + lo) as u8),
                    _ => return Err("invalid \\x escape".into()),
                }
            }
            b'u' => {
                if self.advance() != Some(b'{') {
                    return Err("expected `{` after \\u".into());
                }
                let mut code = 0u32;
                loop {
                    match self.advance() {
                        Some(b'}') => break,
                        Some(d) => {
                            let digit = (d as char)
                                .to_digit(16)
                                .ok_or("invalid digit in \\u escape")?;
                            code = code.saturating_mul(16).saturating_add(digit);
                        }
                        None => return Err("unterminated \\u escape".into()),
                    }
                }
                let ch = char::from_u32(code)
                    .ok_or_else(|| format!("invalid code point {code:#x}"))?;
                let mut utf8 = [0u8; 4];
                out.extend_from_slice(ch.encode_utf8(&mut utf8).as_bytes());
            }
            other => return Err(format!("unknown escape \\{}", other as char)),
        }
        Ok(())
    }

    fn lex_bytes(&mut self, start: Pos) -> Token {
        self.advance(); // opening `"`
        let mut bytes = Vec::new();
        loop {
            match self.advance() {
                Some(b'"') => return self.token(TokenKind::Bytes(bytes), start),
                Some(b'\\') => {
                    if let Err(message) = self.lex_escape(&mut bytes) {
                        return self.token(TokenKind::Error(message), start);
                    }
                }
                Some(b) if b.is_ascii() => bytes.push(b),
                Some(_) => {
                    return self.token(
                        TokenKind::Error("non-ASCII byte in byte string".into()),
                        start,
                    );
                }
                None => return self.token(TokenKind::Unterminated("byte string"), start),
            }
        }
    }

    fn lex_regex(&mut self, start: Pos) -> Token {
        self.advance(); // opening `"`
        let mut bytes = Vec::new();
        loop {
            match self.advance() {
                Some(b'"') => break,
                Some(b'\\') if self.peek() == Some(b'"') => {
                    self.advance();
                    bytes.push(b'"');
                }
                Some(b) => bytes.push(b),
                None => return self.token(TokenKind::Unterminated("regex"), start),
            }
        }
        let kind = match String::from_utf8(bytes) {
            Ok(pattern) => TokenKind::Regex(pattern),
            Err(_) => TokenKind::Error("invalid UTF-8 in regex".into()),
        };
        self.token(kind, start)
    }

    // ───────────────────────────────────────────────────────────
    //  Numbers
    // ───────────────────────────────────────────────────────────

    fn lex_number(&mut self) -> Token {
        let start = self.pos();
        let mut radix = 10;
        if self.peek() == Some(b'0') {
            radix = match self.peek_ahead(1) {
                Some(b'x' | b'X') => 16,
                Some(b'b' | b'B') => 2,
                Some(b'o' | b'O') => 8,
                _ => 10,
            };
            if radix != 10 {
                self.advance();
                self.advance();
            }
        }

        let mut digits = String::new();
        self.collect_digits(radix, &mut digits);
        if digits.is_empty() {
            return self.token(TokenKind::Error("missing digits after radix prefix".into()), start);
        }

        let mut is_float = false;
        if radix == 10 {
            if self.peek() == Some(b'.') && self.peek_ahead(1).is_some_and(|b| b.is_ascii_digit()) {
                self.advance();
                digits.push('.');
                self.collect_digits(10, &mut digits);
                is_float = true;
            }
            if matches!(self.peek(), Some(b'e' | b'E')) {
                let sign = matches!(self.peek_ahead(1), Some(b'+' | b'-'));
                let digit_at = if sign { 2 } else { 1 };
                if self.peek_ahead(digit_at).is_some_and(|b| b.is_ascii_digit()) {
                    digits.push('e');
                    self.advance();
                    if sign {
                        digits.push(self.advance().map_or('+', char::from));
                    }
                    self.collect_digits(10, &mut digits);
                    is_float = true;
                }
            }
        }

        let suffix = match self.peek() {
            Some(b'n') if !is_float => {
                self.advance();
                Some(b'n')
            }
            Some(b'r') if !is_float => {
                self.advance();
                Some(b'r')
            }
            _ => None,
        };
        if self.peek().is_some_and(is_ident_continue) {
            while self.peek().is_some_and(is_ident_continue) {
                self.advance();
            }
            return self.token(TokenKind::Error("invalid numeric literal suffix".into()), start);
        }

        let kind = match suffix {
            Some(b'n') => TokenKind::BigInt { digits, radix },
            Some(_) => TokenKind::Rational { digits, radix },
            None if is_float => match digits.parse::<f64>() {
                Ok(v) => TokenKind::Float(v),
                Err(_) => TokenKind::Error(format!("invalid float literal {digits}")),
            },
            None => match i64::from_str_radix(&digits, radix) {
                Ok(v) => TokenKind::Int(v),
                Err(_) => TokenKind::Error(
                    "integer literal too large (use the `n` suffix)".into(),
                ),
            },
        };
        self.token(kind, start)
    }

    fn collect_digits(&mut self, radix: u32, out: &mut String) {
        while let Some(b) = self.peek() {
            if b == b'_' {
                self.advance();
            } else if (b as char).is_digit(radix) {
                out.push(b as char);
                self.advance();
            } else {
                break;
            }
        }
    }

    // ───────────────────────────────────────────────────────────
    //  Identifiers
    // ───────────────────────────────────────────────────────────

    fn lex_identifier(&mut self) -> Token {
        let start = self.pos();
        let mut text = String::new();
        while let Some(b) = self.peek().filter(|b| is_ident_continue(*b)) {
            text.push(b as char);
            self.advance();
        }
        if self.peek() == Some(b'"') {
            match text.as_str() {
                "b" => return self.lex_bytes(start),
                "re" => return self.lex_regex(start),
                _ => {}
            }
        }
        self.token(classify_ident(text), start)
    }

    // ───────────────────────────────────────────────────────────
    //  Punctuation
    // ───────────────────────────────────────────────────────────

    fn lex_punct(&mut self, b: u8) -> Token {
        let start = self.pos();
        let next = self.peek_ahead(1);
        let (kind, len) = match (b, next) {
            (b'.', Some(b'.')) => (TokenKind::DotDot, 2),
            (b'-', Some(b'>')) => (TokenKind::Arrow, 2),
            (b'=', Some(b'>')) => (TokenKind::FatArrow, 2),
            (b'=', Some(b'=')) => (TokenKind::EqEq, 2),
            (b'!', Some(b'=')) => (TokenKind::NotEq, 2),
            (b'<', Some(b'=')) => (TokenKind::Le, 2),
            (b'>', Some(b'=')) => (TokenKind::Ge, 2),
            (b'<', Some(b'<')) => (TokenKind::Shl, 2),
            (b'>', Some(b'>')) => (TokenKind::Shr, 2),
            (b'&', Some(b'&')) => (TokenKind::AndAnd, 2),
            (b'|', Some(b'|')) => (TokenKind::OrOr, 2),
            (b'+', Some(b'=')) => (TokenKind::PlusAssign, 2),
            (b'-', Some(b'=')) => (TokenKind::MinusAssign, 2),
            (b'*', Some(b'=')) => (TokenKind::StarAssign, 2),
            (b'/', Some(b'=')) => (TokenKind::SlashAssign, 2),
            (b'(', _) => (TokenKind::LParen, 1),
            (b')', _) => (TokenKind::RParen, 1),
            (b'[', _) => (TokenKind::LBracket, 1),
            (b']', _) => (TokenKind::RBracket, 1),
            (b',', _) => (TokenKind::Comma, 1),
            (b'.', _) => (TokenKind::Dot, 1),
            (b':', _) => (TokenKind::Colon, 1),
            (b';', _) => (TokenKind::Semicolon, 1),
            (b'?', _) => (TokenKind::Question, 1),
            (b'=', _) => (TokenKind::Assign, 1),
            (b'<', _) => (TokenKind::Lt, 1),
            (b'>', _) => (TokenKind::Gt, 1),
            (b'+', _) => (TokenKind::Plus, 1),
            (b'-', _) => (TokenKind::Minus, 1),
            (b'*', _) => (TokenKind::Star, 1),
            (b'/', _) => (TokenKind::Slash, 1),
            (b'%', _) => (TokenKind::Percent, 1),
            (b'&', _) => (TokenKind::Amp, 1),
            (b'|', _) => (TokenKind::Pipe, 1),
            (b'^', _) => (TokenKind::Caret, 1),
            (b'~', _) => (TokenKind::Tilde, 1),
            (b'!', _) => (TokenKind::Bang, 1),
            (b'@', _) => (TokenKind::At, 1),
            _ => {
                self.advance();
                let shown = if b.is_ascii_graphic() {
                    format!("{:?}", b as char)
                } else {
                    format!("byte 0x{b:02x}")
                };
                return self.token(TokenKind::Error(format!("unexpected character {shown}")), start);
            }
        };
        for _ in 0..len {
            self.advance();
        }
        self.token(kind, start)
    }

    pub fn next_token(&mut self) -> Token {
        if let Some(token) = self.skip_trivia() {
            return token;
        }

        let start = self.pos();
        let Some(b) = self.peek() else {
            self.emitted_eof = true;
            return Token::new(TokenKind::Eof, Span::point(start));
        };
        self.after_newline = false;

        match b {
            b'"' => {
                self.advance();
                self.lex_string_body(start, false)
            }
            b'0'..=b'9' => self.lex_number(),
            _ if is_ident_start(b) => self.lex_identifier(),
            b'{' => {
                self.advance();
                self.brace_depth += 1;
                self.token(TokenKind::LBrace, start)
            }
            b'}' => {
                self.advance();
                if self.interpolation.last() == Some(&self.brace_depth) {
                    self.interpolation.pop();
                    return self.lex_string_body(start, true);
                }
                self.brace_depth = self.brace_depth.saturating_sub(1);
                self.token(TokenKind::RBrace, start)
            }
            _ => self.lex_punct(b),
        }
    }
}

impl<R: Read> Iterator for Lexer<R> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        if self.emitted_eof {
            return None;
        }
        Some(self.next_token())
    }
}

// ═══════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::from_str(src).map(|t| t.kind).collect()
    }

    fn name(s: &str) -> TokenKind {
        TokenKind::Name(s.into())
    }

    // ── Literals ──────────────────────────────────────────────

    #[test]
    fn lex_integers() {
        assert_eq!(kinds("42"), vec![TokenKind::Int(42), TokenKind::Eof]);
        assert_eq!(kinds("1_000"), vec![TokenKind::Int(1000), TokenKind::Eof]);
        assert_eq!(kinds("0xff"), vec![TokenKind::Int(255), TokenKind::Eof]);
        assert_eq!(kinds("0b101"), vec![TokenKind::Int(5), TokenKind::Eof]);
    }

    #[test]
    fn lex_floats() {
        assert_eq!(kinds("3.25"), vec![TokenKind::Float(3.25), TokenKind::Eof]);
        assert_eq!(kinds("1e3"), vec![TokenKind::Float(1000.0), TokenKind::Eof]);
        assert_eq!(kinds("2.5e-1"), vec![TokenKind::Float(0.25), TokenKind::Eof]);
    }

    #[test]
    fn lex_big_and_rational() {
        assert_eq!(kinds("123456789012345678901234n"), vec![
            TokenKind::BigInt {
                digits: "123456789012345678901234".into(),
                radix: 10
            },
            TokenKind::Eof
        ]);
        assert_eq!(kinds("3r"), vec![
            TokenKind::Rational { digits: "3".into(), radix: 10 },
            TokenKind::Eof
        ]);
    }

    #[test]
    fn oversized_integer_is_error() {
        let ks = kinds("99999999999999999999");
        assert!(matches!(ks[0], TokenKind::Error(_)));
    }

    #[test]
    fn bad_suffix_is_error() {
        assert!(matches!(kinds("12abc")[0], TokenKind::Error(_)));
    }

    #[test]
    fn int_then_range_and_method() {
        assert_eq!(kinds("1..5"), vec![
            TokenKind::Int(1),
            TokenKind::DotDot,
            TokenKind::Int(5),
            TokenKind::Eof
        ]);
        assert_eq!(kinds("3.abs"), vec![
            TokenKind::Int(3),
            TokenKind::Dot,
            name("abs"),
            TokenKind::Eof
        ]);
    }

    #[test]
    fn lex_string_escapes() {
        assert_eq!(kinds(r#""a\n\"b\u{e9}""#), vec![
            TokenKind::Str("a\n\"b\u{e9}".into()),
            TokenKind::Eof
        ]);
    }

    #[test]
    fn lex_utf8_string() {
        assert_eq!(kinds("\"héllo\""), vec![
            TokenKind::Str("héllo".into()),
            TokenKind::Eof
        ]);
    }

    #[test]
    fn lex_interpolation() {
        assert_eq!(kinds(r#""a ${x + 1} b ${y} c""#), vec![
            TokenKind::StrStart("a ".into()),
            name("x"),
            TokenKind::Plus,
            TokenKind::Int(1),
            TokenKind::StrMid(" b ".into()),
            name("y"),
            TokenKind::StrEnd(" c".into()),
            TokenKind::Eof
        ]);
    }

    #[test]
    fn interpolation_with_nested_braces() {
        assert_eq!(kinds(r#""${f({})}""#), vec![
            TokenKind::StrStart("".into()),
            name("f"),
            TokenKind::LParen,
            TokenKind::LBrace,
            TokenKind::RBrace,
            TokenKind::RParen,
            TokenKind::StrEnd("".into()),
            TokenKind::Eof
        ]);
    }

    #[test]
    fn lex_bytes_and_regex() {
        assert_eq!(kinds(r#"b"ab\x01" re"a+\d""#), vec![
            TokenKind::Bytes(vec![b'a', b'b', 1]),
            TokenKind::Regex("a+\\d".into()),
            TokenKind::Eof
        ]);
    }

    #[test]
    fn unterminated_string() {
        assert_eq!(kinds("\"abc"), vec![
            TokenKind::Unterminated("string"),
            TokenKind::Eof
        ]);
    }

    // ── Identifiers ───────────────────────────────────────────

    #[test]
    fn identifier_namespaces() {
        assert_eq!(kinds("count Point PI A HTTPError MAX_2 _x"), vec![
            name("count"),
            TokenKind::TypeName("Point".into()),
            TokenKind::ConstName("PI".into()),
            TokenKind::TypeName("A".into()),
            TokenKind::TypeName("HTTPError".into()),
            TokenKind::ConstName("MAX_2".into()),
            name("_x"),
            TokenKind::Eof
        ]);
    }

    #[test]
    fn keywords() {
        assert_eq!(kinds("def yield fn"), vec![
            TokenKind::Kw(Keyword::Def),
            TokenKind::Kw(Keyword::Yield),
            TokenKind::Kw(Keyword::Fn),
            TokenKind::Eof
        ]);
    }

    // ── Punctuation, newlines, comments ──────────────────────

    #[test]
    fn operators() {
        assert_eq!(kinds("a -> b => c == d != e <<= >> && ||"), vec![
            name("a"),
            TokenKind::Arrow,
            name("b"),
            TokenKind::FatArrow,
            name("c"),
            TokenKind::EqEq,
            name("d"),
            TokenKind::NotEq,
            name("e"),
            TokenKind::Shl,
            TokenKind::Assign,
            TokenKind::Shr,
            TokenKind::AndAnd,
            TokenKind::OrOr,
            TokenKind::Eof
        ]);
    }

    #[test]
    fn newlines_collapse_and_comments_vanish() {
        assert_eq!(kinds("\n\na # c\n\n  b\n"), vec![
            name("a"),
            TokenKind::Newline,
            name("b"),
            TokenKind::Newline,
            TokenKind::Eof
        ]);
    }

    #[test]
    fn newline_inside_interpolation_is_blank() {
        assert_eq!(kinds("\"${a\n}\""), vec![
            TokenKind::StrStart("".into()),
            name("a"),
            TokenKind::StrEnd("".into()),
            TokenKind::Eof
        ]);
    }

    #[test]
    fn directive_line() {
        assert_eq!(kinds("#@env PATH+=/opt\nx"), vec![
            TokenKind::Directive("env PATH+=/opt".into()),
            TokenKind::Newline,
            name("x"),
            TokenKind::Eof
        ]);
    }

    #[test]
    fn unexpected_character() {
        assert!(matches!(kinds("$")[0], TokenKind::Error(_)));
    }

    // ── Spans / streaming ────────────────────────────────────

    #[test]
    fn span_tracking() {
        let tokens: Vec<Token> = Lexer::from_str("a\n  bb").collect();
        assert_eq!(tokens[0].span.start, Pos::new(0, 1, 1));
        assert_eq!(tokens[2].span.start, Pos::new(4, 2, 3));
        assert_eq!(tokens[2].span.end, Pos::new(6, 2, 5));
    }

    #[test]
    fn lex_from_cursor() {
        let lexer = Lexer::new(Cursor::new(b"let x = 1".to_vec()));
        let ks: Vec<TokenKind> = lexer.map(|t| t.kind).collect();
        assert_eq!(ks, vec![
            TokenKind::Kw(Keyword::Let),
            name("x"),
            TokenKind::Assign,
            TokenKind::Int(1),
            TokenKind::Eof
        ]);
    }
}
