//! # fox-parser
//!
//! Streaming tokenizer for `.fox` source.
//!
//! ```text
//!  impl Read (file, &[u8], …)
//!      │
//!      ▼
//!  ┌────────┐   raw tokens    ┌─────────────┐   significant tokens
//!  │ Lexer  │ ──────────────▶ │ TokenStream │ ──────────────────────▶ compiler
//!  └────────┘                 └─────────────┘   peek(n), next_token()
//! ```
//!
//! The lexer classifies identifiers into three namespaces by the case of
//! their first character (`name`, `Type`, `CONSTANT`) and reports line
//! breaks; the stream decides which line breaks end a statement and keeps
//! the bracket-nesting count that [`fragment_is_complete`] uses to tell an
//! interactive front end when a fragment can be compiled.

pub mod lexer;
pub mod span;
pub mod stream;
pub mod token;

pub use lexer::Lexer;
pub use span::{Pos, Span};
pub use stream::{LOOKAHEAD, TokenStream, fragment_is_complete};
pub use token::{Keyword, Token, TokenKind};
