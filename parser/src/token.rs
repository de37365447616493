/// Token types produced by the fox lexer.
use crate::span::Span;

/// Reserved words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Keyword {
    Class,
    Def,
    Let,
    Var,
    If,
    Elif,
    Else,
    For,
    In,
    While,
    Switch,
    Case,
    Default,
    Try,
    Catch,
    As,
    Throw,
    Break,
    Continue,
    Return,
    Yield,
    Import,
    Fn,
    This,
    Super,
    Nil,
    True,
    False,
    And,
    Or,
    Not,
    Extends,
}

impl Keyword {
    pub fn from_ident(text: &str) -> Option<Self> {
        Some(match text {
            "class" => Self::Class,
            "def" => Self::Def,
            "let" => Self::Let,
            "var" => Self::Var,
            "if" => Self::If,
            "elif" => Self::Elif,
            "else" => Self::Else,
            "for" => Self::For,
            "in" => Self::In,
            "while" => Self::While,
            "switch" => Self::Switch,
            "case" => Self::Case,
            "default" => Self::Default,
            "try" => Self::Try,
            "catch" => Self::Catch,
            "as" => Self::As,
            "throw" => Self::Throw,
            "break" => Self::Break,
            "continue" => Self::Continue,
            "return" => Self::Return,
            "yield" => Self::Yield,
            "import" => Self::Import,
            "fn" => Self::Fn,
            "this" => Self::This,
            "super" => Self::Super,
            "nil" => Self::Nil,
            "true" => Self::True,
            "false" => Self::False,
            "and" => Self::And,
            "or" => Self::Or,
            "not" => Self::Not,
            "extends" => Self::Extends,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Class => "class",
            Self::Def => "def",
            Self::Let => "let",
            Self::Var => "var",
            Self::If => "if",
            Self::Elif => "elif",
            Self::Else => "else",
            Self::For => "for",
            Self::In => "in",
            Self::While => "while",
            Self::Switch => "switch",
            Self::Case => "case",
            Self::Default => "default",
            Self::Try => "try",
            Self::Catch => "catch",
            Self::As => "as",
            Self::Throw => "throw",
            Self::Break => "break",
            Self::Continue => "continue",
            Self::Return => "return",
            Self::Yield => "yield",
            Self::Import => "import",
            Self::Fn => "fn",
            Self::This => "this",
            Self::Super => "super",
            Self::Nil => "nil",
            Self::True => "true",
            Self::False => "false",
            Self::And => "and",
            Self::Or => "or",
            Self::Not => "not",
            Self::Extends => "extends",
        }
    }
}

/// The kind of a lexical token.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// Integer literal that fits `i64`, e.g. `42`, `0xff`, `1_000`.
    Int(i64),
    /// Floating-point literal, e.g. `3.14`, `1.5e10`.
    Float(f64),
    /// Arbitrary-precision integer literal `123n`. Digits without prefix
    /// or separators.
    BigInt { digits: String, radix: u32 },
    /// Rational literal `3r`, a whole number typed as a rational.
    Rational { digits: String, radix: u32 },

    /// String without interpolation.
    Str(String),
    /// Text before the first `${` of an interpolated string.
    StrStart(String),
    /// Text between `}` and the next `${`.
    StrMid(String),
    /// Text after the last `}` up to the closing quote.
    StrEnd(String),
    /// Byte string `b"..."`.
    Bytes(Vec<u8>),
    /// Regular expression `re"..."` (pattern text).
    Regex(String),

    /// Variable-like identifier, e.g. `count`, `_tmp`.
    Name(String),
    /// Type-like identifier, e.g. `Point`, `HTTPError`.
    TypeName(String),
    /// CONSTANT-like identifier, e.g. `PI`, `MAX_DEPTH`.
    ConstName(String),
    Kw(Keyword),

    /// `#@...` directive line (text after `#@`, trimmed).
    Directive(String),

    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Dot,
    DotDot,
    Colon,
    Semicolon,
    Question,
    Arrow,
    FatArrow,
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Shl,
    Shr,
    Amp,
    Pipe,
    Caret,
    Tilde,
    Bang,
    AndAnd,
    OrOr,
    At,

    /// Line break terminating a statement.
    Newline,
    /// End of input.
    Eof,
    /// An unrecognized character or malformed literal.
    Error(String),
    /// A string, byte string or regex that reached end of input.
    Unterminated(&'static str),
}

impl TokenKind {
    /// Human-readable name for error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Int(_) => "integer",
            Self::Float(_) => "float",
            Self::BigInt { .. } => "big integer",
            Self::Rational { .. } => "rational",
            Self::Str(_) | Self::StrStart(_) => "string",
            Self::StrMid(_) | Self::StrEnd(_) => "string segment",
            Self::Bytes(_) => "byte string",
            Self::Regex(_) => "regex",
            Self::Name(_) => "name",
            Self::TypeName(_) => "type name",
            Self::ConstName(_) => "constant name",
            Self::Kw(kw) => kw.as_str(),
            Self::Directive(_) => "directive",
            Self::LParen => "`(`",
            Self::RParen => "`)`",
            Self::LBracket => "`[`",
            Self::RBracket => "`]`",
            Self::LBrace => "`{`",
            Self::RBrace => "`}`",
            Self::Comma => "`,`",
            Self::Dot => "`.`",
            Self::DotDot => "`..`",
            Self::Colon => "`:`",
            Self::Semicolon => "`;`",
            Self::Question => "`?`",
            Self::Arrow => "`->`",
            Self::FatArrow => "`=>`",
            Self::Assign => "`=`",
            Self::PlusAssign => "`+=`",
            Self::MinusAssign => "`-=`",
            Self::StarAssign => "`*=`",
            Self::SlashAssign => "`/=`",
            Self::EqEq => "`==`",
            Self::NotEq => "`!=`",
            Self::Lt => "`<`",
            Self::Le => "`<=`",
            Self::Gt => "`>`",
            Self::Ge => "`>=`",
            Self::Plus => "`+`",
            Self::Minus => "`-`",
            Self::Star => "`*`",
            Self::Slash => "`/`",
            Self::Percent => "`%`",
            Self::Shl => "`<<`",
            Self::Shr => "`>>`",
            Self::Amp => "`&`",
            Self::Pipe => "`|`",
            Self::Caret => "`^`",
            Self::Tilde => "`~`",
            Self::Bang => "`!`",
            Self::AndAnd => "`&&`",
            Self::OrOr => "`||`",
            Self::At => "`@`",
            Self::Newline => "line break",
            Self::Eof => "end of input",
            Self::Error(_) => "error",
            Self::Unterminated(_) => "unterminated literal",
        }
    }

    pub fn opens(&self) -> bool {
        matches!(self, Self::LParen | Self::LBracket | Self::LBrace)
    }

    pub fn closes(&self) -> bool {
        matches!(self, Self::RParen | Self::RBracket | Self::RBrace)
    }

    /// Tokens after which an expression must continue.
    pub fn expects_operand(&self) -> bool {
        matches!(
            self,
            Self::Comma
                | Self::Dot
                | Self::DotDot
                | Self::Colon
                | Self::Question
                | Self::Arrow
                | Self::FatArrow
                | Self::Assign
                | Self::PlusAssign
                | Self::MinusAssign
                | Self::StarAssign
                | Self::SlashAssign
                | Self::EqEq
                | Self::NotEq
                | Self::Lt
                | Self::Le
                | Self::Gt
                | Self::Ge
                | Self::Plus
                | Self::Minus
                | Self::Star
                | Self::Slash
                | Self::Percent
                | Self::Shl
                | Self::Shr
                | Self::Amp
                | Self::Pipe
                | Self::Caret
                | Self::Tilde
                | Self::Bang
                | Self::AndAnd
                | Self::OrOr
                | Self::Kw(Keyword::And | Keyword::Or | Keyword::Not | Keyword::In)
        )
    }
}

/// A token with its source span.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span) -> Self {
        Self { kind, span }
    }

    pub fn is_eof(&self) -> bool {
        matches!(self.kind, TokenKind::Eof)
    }

    pub fn line(&self) -> u32 {
        self.span.line()
    }
}
