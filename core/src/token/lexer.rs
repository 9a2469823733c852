use crate::token::{Position, Span, SyntaxError};

/// Tokens of the Loupe Lua dialect.
///
/// String tokens carry the raw literal content with quotes stripped but
/// escape sequences untouched; decoding is the consumer's business.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    LParen,   // (
    RParen,   // )
    LBrace,   // {
    RBrace,   // }
    LBracket, // [
    RBracket, // ]
    Plus,     // +
    Minus,    // -
    Star,     // *
    Slash,    // /
    Percent,  // %
    Caret,    // ^
    Hash,     // #
    Assign,   // =
    Eq,       // ==
    Ne,       // ~= or !=
    Le,       // <=
    Ge,       // >=
    Lt,       // <
    Gt,       // >
    AddAssign,    // +=
    SubAssign,    // -=
    MulAssign,    // *=
    DivAssign,    // /=
    ModAssign,    // %=
    ConcatAssign, // ..=
    Semicolon,    // ;
    Colon,        // :
    DoubleColon,  // ::
    Comma,        // ,
    Dot,          // .
    Concat,       // ..
    Ellipsis,     // ...
    // Keywords
    And,
    Break,
    Do,
    Else,
    Elseif,
    End,
    False,
    For,
    Function,
    Goto,
    If,
    In,
    Local,
    Nil,
    Not,
    Or,
    Repeat,
    Return,
    Then,
    True,
    Until,
    While,
    // Literals
    Number(f64),
    Str(String),
    Name(String),
}

impl Token {
    pub fn describe(&self) -> String {
        match self {
            Token::Name(n) => format!("'{}'", n),
            Token::Str(_) => "string literal".to_string(),
            Token::Number(_) => "number literal".to_string(),
            other => format!("{:?}", other),
        }
    }
}

/// A comment collected as a side product of lexing, raw delimiters included.
#[derive(Debug, Clone, PartialEq)]
pub struct Comment {
    pub raw: String,
    pub span: Span,
}

impl Comment {
    /// Long comments (`--[[ ... ]]`) double as documentation blocks.
    pub fn is_long(&self) -> bool {
        self.raw.starts_with("--[") && self.raw.ends_with(']')
    }
}

/// An `#include`-like preprocessor line. The lexer neutralizes the line and
/// records the target; resolution is left to the IDE layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Directive {
    pub path: String,
    pub span: Span,
}

#[derive(Debug, Default)]
pub struct LexOutput {
    pub tokens: Vec<Token>,
    pub spans: Vec<Span>,
    pub comments: Vec<Comment>,
    pub directives: Vec<Directive>,
}

const ASCII_WHITESPACE: u8 = 1 << 0;
const ASCII_DIGIT: u8 = 1 << 1;
const ASCII_IDENT_START: u8 = 1 << 2;
const ASCII_IDENT_CONT: u8 = 1 << 3;
const ASCII_HEX: u8 = 1 << 4;

const fn build_ascii_class() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        let c = i as u8;
        if matches!(c, b' ' | b'\t' | b'\r' | 0x0B | 0x0C) {
            table[i] |= ASCII_WHITESPACE;
        }
        if c >= b'0' && c <= b'9' {
            table[i] |= ASCII_DIGIT | ASCII_IDENT_CONT | ASCII_HEX;
        }
        if (c >= b'a' && c <= b'f') || (c >= b'A' && c <= b'F') {
            table[i] |= ASCII_HEX;
        }
        if (c >= b'a' && c <= b'z') || (c >= b'A' && c <= b'Z') || c == b'_' {
            table[i] |= ASCII_IDENT_START | ASCII_IDENT_CONT;
        }
        i += 1;
    }
    table
}

const ASCII_CLASS: [u8; 256] = build_ascii_class();

#[inline]
fn flags(c: char) -> u8 {
    if c.is_ascii() { ASCII_CLASS[c as usize] } else { 0 }
}

#[inline]
fn is_ident_start(c: char) -> bool {
    flags(c) & ASCII_IDENT_START != 0
}

#[inline]
fn is_ident_continue(c: char) -> bool {
    flags(c) & ASCII_IDENT_CONT != 0
}

#[inline]
fn is_digit(c: char) -> bool {
    flags(c) & ASCII_DIGIT != 0
}

fn keyword(ident: &str) -> Option<Token> {
    let tok = match ident {
        "and" => Token::And,
        "break" => Token::Break,
        "do" => Token::Do,
        "else" => Token::Else,
        "elseif" => Token::Elseif,
        "end" => Token::End,
        "false" => Token::False,
        "for" => Token::For,
        "function" => Token::Function,
        "goto" => Token::Goto,
        "if" => Token::If,
        "in" => Token::In,
        "local" => Token::Local,
        "nil" => Token::Nil,
        "not" => Token::Not,
        "or" => Token::Or,
        "repeat" => Token::Repeat,
        "return" => Token::Return,
        "then" => Token::Then,
        "true" => Token::True,
        "until" => Token::Until,
        "while" => Token::While,
        _ => return None,
    };
    Some(tok)
}

pub struct Tokenizer<'a> {
    src: &'a str,
    chars: Vec<(usize, char)>,
    pos: usize,
    line: u32,
    column: u32,
    out: LexOutput,
}

impl<'a> Tokenizer<'a> {
    pub fn tokenize(src: &'a str) -> Result<LexOutput, SyntaxError> {
        let mut lexer = Self {
            src,
            chars: src.char_indices().collect(),
            pos: 0,
            line: 1,
            column: 1,
            out: LexOutput::default(),
        };
        lexer.run()?;
        Ok(lexer.out)
    }

    #[inline]
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).map(|(_, c)| *c)
    }

    #[inline]
    fn peek_at(&self, ahead: usize) -> Option<char> {
        self.chars.get(self.pos + ahead).map(|(_, c)| *c)
    }

    #[inline]
    fn offset(&self) -> usize {
        self.chars.get(self.pos).map(|(o, _)| *o).unwrap_or(self.src.len())
    }

    #[inline]
    fn position(&self) -> Position {
        Position::new(self.line, self.column, self.offset())
    }

    fn bump(&mut self) -> Option<char> {
        let (_, c) = *self.chars.get(self.pos)?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn push(&mut self, token: Token, start: Position) {
        let end = self.position();
        self.out.tokens.push(token);
        self.out.spans.push(Span::new(start, end));
    }

    fn error(&self, message: impl Into<String>) -> SyntaxError {
        SyntaxError::at(message.into(), self.position())
    }

    fn at_line_start(&self) -> bool {
        self.column == 1
            || self.chars[..self.pos]
                .iter()
                .rev()
                .take_while(|(_, c)| *c != '\n')
                .all(|(_, c)| c.is_whitespace())
    }

    fn run(&mut self) -> Result<(), SyntaxError> {
        while let Some(c) = self.peek() {
            if c == '\n' || flags(c) & ASCII_WHITESPACE != 0 || (!c.is_ascii() && c.is_whitespace()) {
                self.bump();
                continue;
            }
            if c == '#' && self.at_line_start() {
                self.read_directive_line();
                continue;
            }
            if c == '-' && self.peek_at(1) == Some('-') {
                self.read_comment()?;
                continue;
            }
            let start = self.position();
            match c {
                '(' => {
                    self.bump();
                    self.push(Token::LParen, start);
                }
                ')' => {
                    self.bump();
                    self.push(Token::RParen, start);
                }
                '{' => {
                    self.bump();
                    self.push(Token::LBrace, start);
                }
                '}' => {
                    self.bump();
                    self.push(Token::RBrace, start);
                }
                '[' => {
                    if matches!(self.peek_at(1), Some('[') | Some('=')) && self.long_bracket_level().is_some() {
                        let raw = self.read_long_bracket()?;
                        self.push(Token::Str(raw), start);
                    } else {
                        self.bump();
                        self.push(Token::LBracket, start);
                    }
                }
                ']' => {
                    self.bump();
                    self.push(Token::RBracket, start);
                }
                '+' => {
                    self.bump();
                    if self.peek() == Some('=') {
                        self.bump();
                        self.push(Token::AddAssign, start);
                    } else {
                        self.push(Token::Plus, start);
                    }
                }
                '-' => {
                    self.bump();
                    if self.peek() == Some('=') {
                        self.bump();
                        self.push(Token::SubAssign, start);
                    } else {
                        self.push(Token::Minus, start);
                    }
                }
                '*' => {
                    self.bump();
                    if self.peek() == Some('=') {
                        self.bump();
                        self.push(Token::MulAssign, start);
                    } else {
                        self.push(Token::Star, start);
                    }
                }
                '/' => {
                    self.bump();
                    if self.peek() == Some('=') {
                        self.bump();
                        self.push(Token::DivAssign, start);
                    } else {
                        self.push(Token::Slash, start);
                    }
                }
                '%' => {
                    self.bump();
                    if self.peek() == Some('=') {
                        self.bump();
                        self.push(Token::ModAssign, start);
                    } else {
                        self.push(Token::Percent, start);
                    }
                }
                '^' => {
                    self.bump();
                    self.push(Token::Caret, start);
                }
                '=' => {
                    self.bump();
                    if self.peek() == Some('=') {
                        self.bump();
                        self.push(Token::Eq, start);
                    } else {
                        self.push(Token::Assign, start);
                    }
                }
                '~' | '!' => {
                    self.bump();
                    if self.peek() == Some('=') {
                        self.bump();
                        self.push(Token::Ne, start);
                    } else {
                        return Err(self.error(format!("unexpected symbol '{}'", c)));
                    }
                }
                '<' => {
                    self.bump();
                    if self.peek() == Some('=') {
                        self.bump();
                        self.push(Token::Le, start);
                    } else {
                        self.push(Token::Lt, start);
                    }
                }
                '>' => {
                    self.bump();
                    if self.peek() == Some('=') {
                        self.bump();
                        self.push(Token::Ge, start);
                    } else {
                        self.push(Token::Gt, start);
                    }
                }
                ';' => {
                    self.bump();
                    self.push(Token::Semicolon, start);
                }
                ':' => {
                    self.bump();
                    if self.peek() == Some(':') {
                        self.bump();
                        self.push(Token::DoubleColon, start);
                    } else {
                        self.push(Token::Colon, start);
                    }
                }
                ',' => {
                    self.bump();
                    self.push(Token::Comma, start);
                }
                '.' => {
                    if self.peek_at(1).map(is_digit).unwrap_or(false) {
                        self.read_number(start)?;
                    } else {
                        self.bump();
                        if self.peek() == Some('.') {
                            self.bump();
                            match self.peek() {
                                Some('.') => {
                                    self.bump();
                                    self.push(Token::Ellipsis, start);
                                }
                                Some('=') => {
                                    self.bump();
                                    self.push(Token::ConcatAssign, start);
                                }
                                _ => self.push(Token::Concat, start),
                            }
                        } else {
                            self.push(Token::Dot, start);
                        }
                    }
                }
                '"' | '\'' => {
                    let raw = self.read_quoted_string(c)?;
                    self.push(Token::Str(raw), start);
                }
                _ if is_digit(c) => {
                    self.read_number(start)?;
                }
                _ if is_ident_start(c) => {
                    let mut ident = String::new();
                    while let Some(c) = self.peek() {
                        if !is_ident_continue(c) {
                            break;
                        }
                        ident.push(c);
                        self.bump();
                    }
                    match keyword(&ident) {
                        Some(tok) => self.push(tok, start),
                        None => self.push(Token::Name(ident), start),
                    }
                }
                _ => return Err(self.error(format!("unexpected symbol '{}'", c))),
            }
        }
        Ok(())
    }

    /// Level of a long bracket (`[[` is 0, `[=[` is 1, ...) at the cursor,
    /// without consuming anything.
    fn long_bracket_level(&self) -> Option<usize> {
        if self.peek() != Some('[') {
            return None;
        }
        let mut level = 0;
        loop {
            match self.peek_at(1 + level) {
                Some('=') => level += 1,
                Some('[') => return Some(level),
                _ => return None,
            }
        }
    }

    /// Consume a `[[`/`[=[` long bracket and return its inner content.
    fn read_long_bracket(&mut self) -> Result<String, SyntaxError> {
        let level = self
            .long_bracket_level()
            .ok_or_else(|| self.error("malformed long bracket"))?;
        for _ in 0..level + 2 {
            self.bump();
        }
        // A newline right after the opening bracket is skipped, as in Lua.
        if self.peek() == Some('\n') {
            self.bump();
        }
        let mut content = String::new();
        loop {
            match self.peek() {
                None => return Err(self.error("unterminated long bracket")),
                Some(']') => {
                    let mut matched = true;
                    for i in 0..level {
                        if self.peek_at(1 + i) != Some('=') {
                            matched = false;
                            break;
                        }
                    }
                    if matched && self.peek_at(1 + level) == Some(']') {
                        for _ in 0..level + 2 {
                            self.bump();
                        }
                        return Ok(content);
                    }
                    content.push(']');
                    self.bump();
                }
                Some(c) => {
                    content.push(c);
                    self.bump();
                }
            }
        }
    }

    fn read_quoted_string(&mut self, quote: char) -> Result<String, SyntaxError> {
        self.bump(); // opening quote
        let mut raw = String::new();
        loop {
            match self.peek() {
                None | Some('\n') => return Err(self.error("unterminated string literal")),
                Some('\\') => {
                    raw.push('\\');
                    self.bump();
                    if let Some(c) = self.peek() {
                        raw.push(c);
                        self.bump();
                    }
                }
                Some(c) if c == quote => {
                    self.bump();
                    return Ok(raw);
                }
                Some(c) => {
                    raw.push(c);
                    self.bump();
                }
            }
        }
    }

    fn read_number(&mut self, start: Position) -> Result<(), SyntaxError> {
        let from = self.offset();
        if self.peek() == Some('0') && matches!(self.peek_at(1), Some('x') | Some('X')) {
            self.bump();
            self.bump();
            let digits_from = self.offset();
            while let Some(c) = self.peek() {
                if flags(c) & ASCII_HEX == 0 {
                    break;
                }
                self.bump();
            }
            let digits = &self.src[digits_from..self.offset()];
            if digits.is_empty() {
                return Err(self.error("malformed number"));
            }
            let value = i64::from_str_radix(digits, 16).map_err(|_| self.error("malformed number"))?;
            self.push(Token::Number(value as f64), start);
            return Ok(());
        }
        if self.peek() == Some('0') && matches!(self.peek_at(1), Some('b') | Some('B')) {
            self.bump();
            self.bump();
            let digits_from = self.offset();
            while matches!(self.peek(), Some('0') | Some('1')) {
                self.bump();
            }
            let digits = &self.src[digits_from..self.offset()];
            if digits.is_empty() {
                return Err(self.error("malformed number"));
            }
            let value = i64::from_str_radix(digits, 2).map_err(|_| self.error("malformed number"))?;
            self.push(Token::Number(value as f64), start);
            return Ok(());
        }

        while self.peek().map(is_digit).unwrap_or(false) {
            self.bump();
        }
        if self.peek() == Some('.') && self.peek_at(1) != Some('.') {
            self.bump();
            while self.peek().map(is_digit).unwrap_or(false) {
                self.bump();
            }
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            self.bump();
            if matches!(self.peek(), Some('+') | Some('-')) {
                self.bump();
            }
            if !self.peek().map(is_digit).unwrap_or(false) {
                return Err(self.error("malformed number"));
            }
            while self.peek().map(is_digit).unwrap_or(false) {
                self.bump();
            }
        }
        let text = &self.src[from..self.offset()];
        let value: f64 = text.parse().map_err(|_| self.error("malformed number"))?;
        self.push(Token::Number(value), start);
        Ok(())
    }

    fn read_comment(&mut self) -> Result<(), SyntaxError> {
        let start = self.position();
        let from = self.offset();
        self.bump(); // -
        self.bump(); // -
        if self.long_bracket_level().is_some() {
            self.read_long_bracket()?;
            let raw = self.src[from..self.offset()].to_string();
            let span = Span::new(start, self.position());
            self.out.comments.push(Comment { raw, span });
            return Ok(());
        }
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            self.bump();
        }
        let raw = self.src[from..self.offset()].to_string();
        let span = Span::new(start, self.position());
        self.out.comments.push(Comment { raw, span });
        Ok(())
    }

    /// Neutralize a `#`-led preprocessor line; `#include <path>` is recorded.
    fn read_directive_line(&mut self) {
        let start = self.position();
        let from = self.offset();
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            self.bump();
        }
        let line = &self.src[from..self.offset()];
        if let Some(rest) = line.strip_prefix("#include") {
            let path = rest.trim().to_string();
            if !path.is_empty() {
                let span = Span::new(start, self.position());
                self.out.directives.push(Directive { path, span });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(src: &str) -> Vec<Token> {
        Tokenizer::tokenize(src).expect("lex failure").tokens
    }

    #[test]
    fn lexes_keywords_and_names() {
        assert_eq!(
            tokens("local x = nil"),
            vec![
                Token::Local,
                Token::Name("x".to_string()),
                Token::Assign,
                Token::Nil
            ]
        );
    }

    #[test]
    fn lexes_compound_assign_operators() {
        assert_eq!(
            tokens("x += 1 y ..= z"),
            vec![
                Token::Name("x".to_string()),
                Token::AddAssign,
                Token::Number(1.0),
                Token::Name("y".to_string()),
                Token::ConcatAssign,
                Token::Name("z".to_string()),
            ]
        );
    }

    #[test]
    fn bang_ne_is_an_alias() {
        assert_eq!(tokens("a != b")[1], Token::Ne);
        assert_eq!(tokens("a ~= b")[1], Token::Ne);
    }

    #[test]
    fn lexes_numbers() {
        assert_eq!(tokens("0x10"), vec![Token::Number(16.0)]);
        assert_eq!(tokens("0b101"), vec![Token::Number(5.0)]);
        assert_eq!(tokens("1.5e2"), vec![Token::Number(150.0)]);
        assert_eq!(tokens(".5"), vec![Token::Number(0.5)]);
    }

    #[test]
    fn string_content_keeps_escapes_raw() {
        assert_eq!(tokens(r#""a\nb""#), vec![Token::Str("a\\nb".to_string())]);
    }

    #[test]
    fn long_string_is_a_string_token() {
        assert_eq!(tokens("[[hello\nthere]]"), vec![Token::Str("hello\nthere".to_string())]);
        assert_eq!(tokens("[=[a]]b]=]"), vec![Token::Str("a]]b".to_string())]);
    }

    #[test]
    fn collects_comments_with_raw_text() {
        let out = Tokenizer::tokenize("-- line\n--[[ block ]] x = 1").unwrap();
        assert_eq!(out.comments.len(), 2);
        assert_eq!(out.comments[0].raw, "-- line");
        assert!(out.comments[1].is_long());
        assert_eq!(out.tokens[0], Token::Name("x".to_string()));
    }

    #[test]
    fn include_directive_is_neutralized_and_recorded() {
        let out = Tokenizer::tokenize("#include other.lua\nx = 1").unwrap();
        assert_eq!(out.directives.len(), 1);
        assert_eq!(out.directives[0].path, "other.lua");
        assert_eq!(out.tokens[0], Token::Name("x".to_string()));
    }

    #[test]
    fn unterminated_string_reports_position() {
        let err = Tokenizer::tokenize("x = \"oops").unwrap_err();
        assert!(err.message.contains("unterminated"));
        assert_eq!(err.line, 1);
    }

    #[test]
    fn concat_vs_ellipsis() {
        assert_eq!(tokens("a .. b")[1], Token::Concat);
        assert_eq!(tokens("f(...)")[2], Token::Ellipsis);
    }
}
