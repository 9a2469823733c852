mod error;
mod lexer;

pub use error::{Position, Span, SyntaxError};
pub use lexer::{Comment, Directive, LexOutput, Token, Tokenizer};
