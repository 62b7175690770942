use std::fmt;

use super::parser::MAX_NESTING;
use super::SyntaxError;

/// Byte range into the source plus the 1-based line/column of its start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub line: u32,
    pub col: u32,
}

impl Span {
    pub fn to(self, other: Span) -> Span {
        Span {
            start: self.start,
            end: other.end.max(self.start),
            line: self.line,
            col: self.col,
        }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Ident(String),
    Num(f64),
    Str(String),
    /// Cooked string pieces and the raw source ranges of each `${...}`.
    Template {
        quasis: Vec<String>,
        exprs: Vec<(usize, usize)>,
    },
    Punct(&'static str),
    Eof,
}

impl fmt::Display for Tok {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tok::Ident(name) => write!(f, "{}", name),
            Tok::Num(n) => write!(f, "{}", n),
            Tok::Str(s) => write!(f, "\"{}\"", s),
            Tok::Template { .. } => write!(f, "template literal"),
            Tok::Punct(p) => write!(f, "{}", p),
            Tok::Eof => write!(f, "end of input"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Token {
    pub tok: Tok,
    pub span: Span,
    /// A line terminator appears between the previous token and this one.
    pub nl_before: bool,
}

// Longest first. `>` is never combined here; the parser glues adjacent
// `>` / `=` tokens back together so generic closers like `>>` still split.
const PUNCTUATORS: &[&str] = &[
    "...", "===", "!==", "**=", "<<=", "&&=", "||=", "??=", "=>", "==", "!=", "<=", "&&",
    "||", "??", "?.", "++", "--", "+=", "-=", "*=", "/=", "%=", "&=", "|=", "^=", "**", "<<",
    "{", "}", "(", ")", "[", "]", ";", ",", "<", ">", "+", "-", "*", "/", "%", "&", "|", "^",
    "!", "~", "?", ":", "=", ".", "@", "#",
];

pub struct Lexer<'src> {
    src: &'src str,
    pos: usize,
    line: u32,
    col: u32,
    templates: usize,
}

impl<'src> Lexer<'src> {
    pub fn new(src: &'src str) -> Self {
        Self::with_origin(src, 0, 1, 1)
    }

    /// Lex a slice of a larger document, keeping absolute positions.
    pub fn with_origin(src: &'src str, pos: usize, line: u32, col: u32) -> Self {
        Self {
            src,
            pos,
            line,
            col,
            templates: 0,
        }
    }

    pub fn tokenize(mut self, end: usize) -> Result<Vec<Token>, SyntaxError> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token(end)?;
            let done = token.tok == Tok::Eof;
            tokens.push(token);
            if done {
                return Ok(tokens);
            }
        }
    }

    fn peek_char(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn peek_nth(&self, n: usize) -> Option<char> {
        self.src[self.pos..].chars().nth(n)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek_char()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn here(&self) -> Span {
        Span {
            start: self.pos,
            end: self.pos,
            line: self.line,
            col: self.col,
        }
    }

    fn error(&self, message: impl Into<String>) -> SyntaxError {
        SyntaxError::new(message, self.here())
    }

    /// Skips whitespace and comments, reporting whether a newline was crossed.
    fn skip_trivia(&mut self, end: usize) -> Result<bool, SyntaxError> {
        let mut newline = false;
        while self.pos < end {
            let c = match self.peek_char() {
                Some(c) => c,
                None => break,
            };
            if c == '\n' || c == '\u{2028}' || c == '\u{2029}' {
                newline = true;
                self.bump();
            } else if c.is_whitespace() || c == '\u{feff}' {
                self.bump();
            } else if c == '/' && self.peek_nth(1) == Some('/') {
                while let Some(c) = self.peek_char() {
                    if c == '\n' || self.pos >= end {
                        break;
                    }
                    self.bump();
                }
            } else if c == '/' && self.peek_nth(1) == Some('*') {
                let start = self.here();
                self.bump();
                self.bump();
                loop {
                    match self.peek_char() {
                        None => {
                            return Err(SyntaxError::new("Unterminated comment", start));
                        }
                        Some('*') if self.peek_nth(1) == Some('/') => {
                            self.bump();
                            self.bump();
                            break;
                        }
                        Some(c) => {
                            if c == '\n' {
                                newline = true;
                            }
                            self.bump();
                        }
                    }
                }
            } else {
                break;
            }
        }
        Ok(newline)
    }

    pub fn next_token(&mut self, end: usize) -> Result<Token, SyntaxError> {
        let nl_before = self.skip_trivia(end)?;
        let start = self.here();
        let c = match self.peek_char() {
            Some(c) if self.pos < end => c,
            _ => {
                return Ok(Token {
                    tok: Tok::Eof,
                    span: start,
                    nl_before,
                })
            }
        };

        let tok = if is_ident_start(c) {
            let mut name = String::new();
            while let Some(c) = self.peek_char() {
                if !is_ident_part(c) {
                    break;
                }
                name.push(c);
                self.bump();
            }
            Tok::Ident(name)
        } else if c.is_ascii_digit() || (c == '.' && self.peek_nth(1).is_some_and(|d| d.is_ascii_digit())) {
            Tok::Num(self.number()?)
        } else if c == '"' || c == '\'' {
            Tok::Str(self.string(c)?)
        } else if c == '`' {
            self.template(end)?
        } else {
            let rest = &self.src[self.pos..];
            let punct = PUNCTUATORS
                .iter()
                .find(|p| rest.starts_with(**p))
                .copied()
                .ok_or_else(|| self.error(format!("Invalid or unexpected token '{}'", c)))?;
            // `a?.5:1` is a conditional, not optional chaining.
            let punct = if punct == "?." && rest[2..].starts_with(|d: char| d.is_ascii_digit()) {
                "?"
            } else {
                punct
            };
            for _ in 0..punct.len() {
                self.bump();
            }
            Tok::Punct(punct)
        };

        Ok(Token {
            tok,
            span: Span {
                end: self.pos,
                ..start
            },
            nl_before,
        })
    }

    fn number(&mut self) -> Result<f64, SyntaxError> {
        let start = self.pos;
        if self.peek_char() == Some('0') {
            let radix = match self.peek_nth(1) {
                Some('x') | Some('X') => Some(16),
                Some('o') | Some('O') => Some(8),
                Some('b') | Some('B') => Some(2),
                _ => None,
            };
            if let Some(radix) = radix {
                self.bump();
                self.bump();
                let mut digits = String::new();
                while let Some(c) = self.peek_char() {
                    if c == '_' {
                        self.bump();
                    } else if c.is_digit(radix) {
                        digits.push(c);
                        self.bump();
                    } else {
                        break;
                    }
                }
                return u64::from_str_radix(&digits, radix)
                    .map(|n| n as f64)
                    .map_err(|_| self.error("Invalid number literal"));
            }
        }

        let mut text = String::new();
        let mut seen_dot = false;
        let mut seen_exp = false;
        while let Some(c) = self.peek_char() {
            if c.is_ascii_digit() {
                text.push(c);
            } else if c == '_' {
                // numeric separator
            } else if c == '.' && !seen_dot && !seen_exp {
                seen_dot = true;
                text.push(c);
            } else if (c == 'e' || c == 'E') && !seen_exp {
                seen_exp = true;
                text.push(c);
                if let Some(sign @ ('+' | '-')) = self.peek_nth(1) {
                    self.bump();
                    text.push(sign);
                }
            } else {
                break;
            }
            self.bump();
        }
        if self.peek_char() == Some('n') {
            return Err(self.error("BigInt literals are not supported"));
        }
        if self.peek_char().is_some_and(is_ident_start) {
            return Err(self.error("Invalid or unexpected token"));
        }
        text.parse::<f64>()
            .map_err(|_| SyntaxError::new("Invalid number literal", Span { start, ..self.here() }))
    }

    fn escape(&mut self, out: &mut String) -> Result<(), SyntaxError> {
        let c = self
            .bump()
            .ok_or_else(|| self.error("Invalid or unexpected token"))?;
        match c {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            'b' => out.push('\u{8}'),
            'f' => out.push('\u{c}'),
            'v' => out.push('\u{b}'),
            '0' => out.push('\0'),
            '\n' => {}
            'x' => {
                let hex: String = (0..2).filter_map(|_| self.bump()).collect();
                let code = u32::from_str_radix(&hex, 16)
                    .map_err(|_| self.error("Invalid hexadecimal escape sequence"))?;
                out.push(char::from_u32(code).unwrap_or('\u{fffd}'));
            }
            'u' => {
                let hex: String = if self.peek_char() == Some('{') {
                    self.bump();
                    let mut hex = String::new();
                    while let Some(c) = self.bump() {
                        if c == '}' {
                            break;
                        }
                        hex.push(c);
                    }
                    hex
                } else {
                    (0..4).filter_map(|_| self.bump()).collect()
                };
                let code = u32::from_str_radix(&hex, 16)
                    .map_err(|_| self.error("Invalid Unicode escape sequence"))?;
                out.push(char::from_u32(code).unwrap_or('\u{fffd}'));
            }
            other => out.push(other),
        }
        Ok(())
    }

    fn string(&mut self, quote: char) -> Result<String, SyntaxError> {
        let start = self.here();
        self.bump();
        let mut out = String::new();
        loop {
            match self.bump() {
                None | Some('\n') => return Err(SyntaxError::new("Invalid or unexpected token", start)),
                Some(c) if c == quote => return Ok(out),
                Some('\\') => self.escape(&mut out)?,
                Some(c) => out.push(c),
            }
        }
    }

    fn template(&mut self, end: usize) -> Result<Tok, SyntaxError> {
        let start = self.here();
        self.bump();
        let mut quasis = Vec::new();
        let mut exprs = Vec::new();
        let mut current = String::new();
        loop {
            match self.peek_char() {
                None => return Err(SyntaxError::new("Unterminated template literal", start)),
                Some('`') => {
                    self.bump();
                    quasis.push(current);
                    return Ok(Tok::Template { quasis, exprs });
                }
                Some('\\') => {
                    self.bump();
                    self.escape(&mut current)?;
                }
                Some('$') if self.peek_nth(1) == Some('{') => {
                    self.bump();
                    self.bump();
                    quasis.push(std::mem::take(&mut current));
                    if self.templates >= MAX_NESTING {
                        return Err(SyntaxError::new("Nesting too deep", start));
                    }
                    self.templates += 1;
                    let expr_start = self.pos;
                    let mut depth = 0usize;
                    loop {
                        let token = self.next_token(end)?;
                        match token.tok {
                            Tok::Eof => {
                                return Err(SyntaxError::new("Unterminated template literal", start))
                            }
                            Tok::Punct("{") => depth += 1,
                            Tok::Punct("}") if depth == 0 => {
                                exprs.push((expr_start, token.span.start));
                                self.templates -= 1;
                                break;
                            }
                            Tok::Punct("}") => depth -= 1,
                            _ => {}
                        }
                    }
                }
                Some(_) => {
                    if let Some(c) = self.bump() {
                        current.push(c);
                    }
                }
            }
        }
    }
}

/// Line and column of a byte offset, 1-based.
pub fn position_of(src: &str, offset: usize) -> (u32, u32) {
    let mut line = 1;
    let mut col = 1;
    for (i, c) in src.char_indices() {
        if i >= offset {
            break;
        }
        if c == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }
    (line, col)
}

fn is_ident_start(c: char) -> bool {
    c == '_' || c == '$' || c.is_alphabetic()
}

fn is_ident_part(c: char) -> bool {
    is_ident_start(c) || c.is_alphanumeric() || c == '\u{200c}' || c == '\u{200d}'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(src: &str) -> Vec<Tok> {
        Lexer::new(src)
            .tokenize(src.len())
            .unwrap()
            .into_iter()
            .map(|t| t.tok)
            .collect()
    }

    #[test]
    fn test_greater_than_is_never_combined() {
        assert_eq!(
            toks("a >>= b"),
            vec![
                Tok::Ident("a".into()),
                Tok::Punct(">"),
                Tok::Punct(">"),
                Tok::Punct("="),
                Tok::Ident("b".into()),
                Tok::Eof
            ]
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(toks("0xff 1_000 .5 2e3")[..4], [Tok::Num(255.0), Tok::Num(1000.0), Tok::Num(0.5), Tok::Num(2000.0)]);
    }

    #[test]
    fn test_optional_chain_before_digit() {
        assert_eq!(toks("a?.5:1")[1], Tok::Punct("?"));
        assert_eq!(toks("a?.b")[1], Tok::Punct("?."));
    }

    #[test]
    fn test_template_records_expression_ranges() {
        let src = "`a${x + `${y}`}b`";
        match &toks(src)[0] {
            Tok::Template { quasis, exprs } => {
                assert_eq!(quasis, &vec!["a".to_string(), "b".to_string()]);
                let (s, e) = exprs[0];
                assert_eq!(&src[s..e], "x + `${y}`");
            }
            other => panic!("unexpected token {:?}", other),
        }
    }

    #[test]
    fn test_newline_flag_and_positions() {
        let tokens = Lexer::new("a\n  /* c */ b").tokenize(13).unwrap();
        assert!(!tokens[0].nl_before);
        assert!(tokens[1].nl_before);
        assert_eq!((tokens[1].span.line, tokens[1].span.col), (2, 11));
    }

    #[test]
    fn test_unterminated_string_is_error() {
        assert!(Lexer::new("'abc").tokenize(4).is_err());
    }
}
