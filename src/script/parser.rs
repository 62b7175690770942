//! Recursive-descent parser for the candidate language.
//!
//! The grammar is a JavaScript subset that also accepts TypeScript type
//! syntax. Type syntax never reaches the AST; instead the byte range of every
//! type-only construct is recorded in `erased`, which is what the stripper
//! blanks out. Ambiguous constructs (arrow heads, generic call arguments) are
//! parsed speculatively and rolled back on failure.

use std::rc::Rc;
use std::thread;

use super::ast::*;
use super::lexer::{position_of, Lexer, Span, Tok, Token};
use super::SyntaxError;

type PResult<T> = Result<T, SyntaxError>;

const RESERVED: &[&str] = &[
    "break", "case", "catch", "class", "const", "continue", "debugger", "default", "delete", "do",
    "else", "enum", "export", "extends", "false", "finally", "for", "function", "if", "import",
    "in", "instanceof", "new", "null", "return", "super", "switch", "this", "throw", "true", "try",
    "typeof", "var", "void", "while", "with",
];

const TS_MODIFIERS: &[&str] = &["public", "private", "protected", "readonly", "override", "declare", "abstract"];

/// Deepest statement, expression, pattern or type nesting accepted.
pub const MAX_NESTING: usize = 1_000;

/// Stack for parses started outside the engine thread; fits `MAX_NESTING`.
const PARSE_STACK_SIZE: usize = 128 * 1024 * 1024;

/// Output of a whole-source parse.
#[derive(Debug)]
pub struct Program {
    /// Byte ranges holding type-only syntax, in the order they were found.
    pub erased: Vec<(usize, usize)>,
}

struct Checkpoint {
    pos: usize,
    erased: usize,
    last_end: usize,
    depth: usize,
}

pub struct Parser<'src> {
    src: &'src str,
    tokens: Vec<Token>,
    pos: usize,
    erased: Vec<(usize, usize)>,
    in_async: bool,
    no_in: bool,
    last_end: usize,
    depth: usize,
}

/// Runs a parse on its own thread with a stack deep enough for
/// `MAX_NESTING`, so callers on small stacks get an error, never an abort.
pub fn on_parse_stack<T: Send>(parse: impl FnOnce() -> PResult<T> + Send) -> PResult<T> {
    thread::scope(|scope| {
        let handle = thread::Builder::new()
            .name("codegate-parse".into())
            .stack_size(PARSE_STACK_SIZE)
            .spawn_scoped(scope, parse)
            .map_err(|e| SyntaxError::new(format!("parser thread unavailable: {}", e), Span::default()))?;
        handle
            .join()
            .unwrap_or_else(|_| Err(SyntaxError::new("parser thread panicked", Span::default())))
    })
}

/// Parses a complete source text; top-level `await` is accepted.
pub fn parse_program(src: &str) -> PResult<Program> {
    on_parse_stack(|| {
        let mut parser = Parser::new(src)?;
        parser.in_async = true;
        while !parser.at_eof() {
            parser.parse_statement()?;
        }
        Ok(Program { erased: parser.erased })
    })
}

/// Reports the first syntax error in candidate source, if any.
pub fn check_candidate(src: &str) -> PResult<()> {
    on_parse_stack(|| parse_candidate(src).map(|_| ()))
}

/// Parses candidate source as an async function body whose leading
/// expression is the value returned.
pub fn parse_candidate(src: &str) -> PResult<Vec<Stmt>> {
    let mut parser = Parser::new(src)?;
    parser.in_async = true;
    let mut body = Vec::new();
    if parser.at_eof() {
        return Ok(body);
    }
    let start = parser.peek().span;
    let expr = parser.parse_expression()?;
    parser.consume_semicolon()?;
    body.push(Stmt {
        span: start.to(expr.span),
        kind: StmtKind::Return(Some(expr)),
    });
    while !parser.at_eof() {
        body.push(parser.parse_statement()?);
    }
    Ok(body)
}

/// Parses a standalone expression (test-case arguments).
pub fn parse_expression_source(src: &str) -> PResult<Expr> {
    let mut parser = Parser::new(src)?;
    let expr = parser.parse_expression()?;
    if !parser.at_eof() {
        return Err(parser.unexpected());
    }
    Ok(expr)
}

impl<'src> Parser<'src> {
    fn new(src: &'src str) -> PResult<Self> {
        let tokens = Lexer::new(src).tokenize(src.len())?;
        Ok(Self {
            src,
            tokens,
            pos: 0,
            erased: Vec::new(),
            in_async: false,
            no_in: false,
            last_end: 0,
            depth: 0,
        })
    }

    /// Runs one level of recursive descent, refusing to go past `MAX_NESTING`.
    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> PResult<T>) -> PResult<T> {
        if self.depth >= MAX_NESTING {
            return Err(SyntaxError::new("Nesting too deep", self.peek().span));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    // --- token helpers ---

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_at(&self, n: usize) -> &Token {
        &self.tokens[(self.pos + n).min(self.tokens.len() - 1)]
    }

    fn next(&mut self) -> Token {
        let token = self.peek().clone();
        if token.tok != Tok::Eof {
            self.pos += 1;
        }
        self.last_end = token.span.end;
        token
    }

    fn at_eof(&self) -> bool {
        self.peek().tok == Tok::Eof
    }

    fn is_punct(&self, p: &str) -> bool {
        matches!(&self.peek().tok, Tok::Punct(q) if *q == p)
    }

    fn is_punct_at(&self, n: usize, p: &str) -> bool {
        matches!(&self.peek_at(n).tok, Tok::Punct(q) if *q == p)
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if self.is_punct(p) {
            self.next();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: &str) -> PResult<Span> {
        if self.is_punct(p) {
            Ok(self.next().span)
        } else {
            Err(self.unexpected())
        }
    }

    fn ident_at(&self, n: usize) -> Option<&str> {
        match &self.peek_at(n).tok {
            Tok::Ident(name) => Some(name.as_str()),
            _ => None,
        }
    }

    fn is_ident(&self, name: &str) -> bool {
        self.ident_at(0) == Some(name)
    }

    fn eat_ident(&mut self, name: &str) -> bool {
        if self.is_ident(name) {
            self.next();
            true
        } else {
            false
        }
    }

    /// `>` tokens that touch, glued back into one operator.
    fn adjacent_gt(&self, n: usize) -> bool {
        let a = self.peek_at(n);
        let b = self.peek_at(n + 1);
        a.span.end == b.span.start && matches!(b.tok, Tok::Punct(">") | Tok::Punct("=") | Tok::Punct(">="))
    }

    fn unexpected(&self) -> SyntaxError {
        let token = self.peek();
        match &token.tok {
            Tok::Eof => SyntaxError::new("Unexpected end of input", token.span),
            Tok::Str(_) => SyntaxError::new("Unexpected string", token.span),
            Tok::Num(_) => SyntaxError::new("Unexpected number", token.span),
            Tok::Template { .. } => SyntaxError::new("Unexpected template string", token.span),
            other => SyntaxError::new(format!("Unexpected token '{}'", other), token.span),
        }
    }

    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            pos: self.pos,
            erased: self.erased.len(),
            last_end: self.last_end,
            depth: self.depth,
        }
    }

    fn restore(&mut self, cp: Checkpoint) {
        self.pos = cp.pos;
        self.erased.truncate(cp.erased);
        self.last_end = cp.last_end;
        self.depth = cp.depth;
    }

    fn erase(&mut self, start: usize, end: usize) {
        if end > start {
            self.erased.push((start, end));
        }
    }

    fn consume_semicolon(&mut self) -> PResult<()> {
        if self.eat_punct(";") || self.is_punct("}") || self.at_eof() || self.peek().nl_before {
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn binding_name(&mut self) -> PResult<(Name, Span)> {
        match &self.peek().tok {
            Tok::Ident(name) if !RESERVED.contains(&name.as_str()) => {
                if name == "await" && self.in_async {
                    return Err(self.unexpected());
                }
                let token = self.next();
                match token.tok {
                    Tok::Ident(name) => Ok((Rc::from(name.as_str()), token.span)),
                    _ => Err(SyntaxError::new("Identifier expected", token.span)),
                }
            }
            _ => Err(self.unexpected()),
        }
    }

    // --- TypeScript type syntax (skipped and erased) ---

    /// Consumes a bracketed group, checking that closers match.
    fn skip_balanced(&mut self) -> PResult<()> {
        let mut stack: Vec<&'static str> = Vec::new();
        loop {
            let token = self.next();
            match token.tok {
                Tok::Punct("(") => stack.push(")"),
                Tok::Punct("[") => stack.push("]"),
                Tok::Punct("{") => stack.push("}"),
                Tok::Punct("<") => stack.push(">"),
                Tok::Punct(close @ (")" | "]" | "}" | ">")) => {
                    if stack.pop() != Some(close) {
                        return Err(SyntaxError::new(format!("Unexpected token '{}'", close), token.span));
                    }
                }
                Tok::Eof => return Err(SyntaxError::new("Unexpected end of input", token.span)),
                _ => {}
            }
            if stack.is_empty() {
                return Ok(());
            }
        }
    }

    /// Like `skip_balanced` for `<...>`, but refuses tokens that only occur
    /// in expressions so `a < b && c > (d)` is not mistaken for type arguments.
    fn skip_type_arguments(&mut self) -> PResult<()> {
        let mut stack: Vec<&'static str> = Vec::new();
        loop {
            let token = self.next();
            match token.tok {
                Tok::Punct("(") => stack.push(")"),
                Tok::Punct("[") => stack.push("]"),
                Tok::Punct("{") => stack.push("}"),
                Tok::Punct("<") => stack.push(">"),
                Tok::Punct(close @ (")" | "]" | "}" | ">")) => {
                    if stack.pop() != Some(close) {
                        return Err(SyntaxError::new("Type arguments expected", token.span));
                    }
                }
                Tok::Punct(
                    ";" | "=" | "==" | "===" | "!=" | "!==" | "&&" | "||" | "+" | "*" | "/" | "%" | "!"
                    | "++" | "--" | "+=" | "-=",
                )
                | Tok::Eof => return Err(SyntaxError::new("Type arguments expected", token.span)),
                _ => {}
            }
            if stack.is_empty() {
                return Ok(());
            }
        }
    }

    fn skip_type(&mut self) -> PResult<()> {
        self.nested(Self::skip_type_union)
    }

    fn skip_type_union(&mut self) -> PResult<()> {
        if self.is_punct("|") || self.is_punct("&") {
            self.next();
        }
        self.skip_type_operand()?;
        loop {
            if self.is_punct("|") || self.is_punct("&") {
                self.next();
                self.skip_type_operand()?;
            } else if self.is_ident("extends") && !self.peek().nl_before {
                self.next();
                self.skip_type_operand()?;
                self.expect_punct("?")?;
                self.skip_type()?;
                self.expect_punct(":")?;
                self.skip_type()?;
            } else {
                return Ok(());
            }
        }
    }

    fn skip_type_operand(&mut self) -> PResult<()> {
        loop {
            let prefix = matches!(self.ident_at(0), Some("keyof" | "readonly" | "unique"));
            let operand_follows = matches!(self.peek_at(1).tok, Tok::Ident(_) | Tok::Punct("(" | "[" | "{"));
            if prefix && operand_follows {
                self.next();
            } else {
                break;
            }
        }
        if self.is_ident("infer") && matches!(self.peek_at(1).tok, Tok::Ident(_)) {
            self.next();
            self.next();
            return Ok(());
        }
        if self.is_ident("typeof") {
            self.next();
            self.binding_or_keyword()?;
            while self.eat_punct(".") {
                self.binding_or_keyword()?;
            }
            if self.is_punct("<") && !self.peek().nl_before {
                self.skip_balanced()?;
            }
            return self.skip_type_postfix();
        }

        let token = self.peek().clone();
        match token.tok {
            Tok::Punct("(") => {
                self.skip_balanced()?;
                if self.eat_punct("=>") {
                    return self.skip_type();
                }
            }
            Tok::Punct("<") => {
                self.skip_balanced()?;
                if !self.is_punct("(") {
                    return Err(SyntaxError::new("'(' expected", self.peek().span));
                }
                self.skip_balanced()?;
                self.expect_punct("=>")?;
                return self.skip_type();
            }
            Tok::Punct("{") | Tok::Punct("[") => self.skip_balanced()?,
            Tok::Punct("-") => {
                self.next();
                match self.next().tok {
                    Tok::Num(_) => {}
                    _ => return Err(SyntaxError::new("Type expected", token.span)),
                }
            }
            Tok::Str(_) | Tok::Num(_) | Tok::Template { .. } => {
                self.next();
            }
            Tok::Ident(ref name) if name == "new" || name == "abstract" => {
                self.next();
                self.eat_ident("new");
                if self.is_punct("<") {
                    self.skip_balanced()?;
                }
                if !self.is_punct("(") {
                    return Err(SyntaxError::new("'(' expected", self.peek().span));
                }
                self.skip_balanced()?;
                self.expect_punct("=>")?;
                return self.skip_type();
            }
            Tok::Ident(ref name) => {
                let asserts = name == "asserts" && matches!(self.peek_at(1).tok, Tok::Ident(_)) && !self.peek_at(1).nl_before;
                self.next();
                if asserts {
                    self.next();
                    if self.eat_ident("is") {
                        self.skip_type()?;
                    }
                    return Ok(());
                }
                while self.is_punct(".") && matches!(self.peek_at(1).tok, Tok::Ident(_)) {
                    self.next();
                    self.next();
                }
                if self.is_punct("<") && !self.peek().nl_before {
                    self.skip_balanced()?;
                }
                if self.is_ident("is") && !self.peek().nl_before {
                    self.next();
                    return self.skip_type();
                }
            }
            _ => return Err(SyntaxError::new("Type expected", token.span)),
        }
        self.skip_type_postfix()
    }

    fn skip_type_postfix(&mut self) -> PResult<()> {
        while self.is_punct("[") && !self.peek().nl_before {
            self.skip_balanced()?;
        }
        Ok(())
    }

    fn binding_or_keyword(&mut self) -> PResult<()> {
        match self.next().tok {
            Tok::Ident(_) => Ok(()),
            _ => Err(SyntaxError::new("Identifier expected", self.peek().span)),
        }
    }

    /// `: Type` at the current position, if present.
    fn skip_annotation(&mut self) -> PResult<()> {
        if self.is_punct(":") {
            let start = self.peek().span.start;
            self.next();
            self.skip_type()?;
            self.erase(start, self.last_end);
        }
        Ok(())
    }

    /// `<T, U extends X>` at the current position, if present.
    fn skip_type_params(&mut self) -> PResult<()> {
        if self.is_punct("<") {
            let start = self.peek().span.start;
            self.skip_balanced()?;
            self.erase(start, self.last_end);
        }
        Ok(())
    }

    /// A postfix `?` or `!` on a declaration name.
    fn skip_optional_marker(&mut self) {
        if (self.is_punct("?") || self.is_punct("!")) && matches!(self.peek_at(1).tok, Tok::Punct(":" | "," | ")" | "=" | ";" | "(" | "<")) {
            let span = self.next().span;
            self.erase(span.start, span.end);
        }
    }

    /// Skips an ambient declaration up to its end.
    fn skip_declaration(&mut self, start: usize) -> PResult<()> {
        let mut consumed = false;
        loop {
            let token = self.peek().clone();
            match token.tok {
                Tok::Eof => break,
                Tok::Punct(";") => {
                    self.next();
                    break;
                }
                Tok::Punct("}") | Tok::Punct(")") | Tok::Punct("]") => break,
                _ if consumed && token.nl_before => break,
                Tok::Punct("(") | Tok::Punct("[") | Tok::Punct("{") | Tok::Punct("<") => self.skip_balanced()?,
                _ => {
                    self.next();
                }
            }
            consumed = true;
        }
        self.erase(start, self.last_end);
        Ok(())
    }

    // --- statements ---

    pub fn parse_statement(&mut self) -> PResult<Stmt> {
        let start = self.peek().span;
        let kind = self.nested(Self::parse_statement_kind)?;
        Ok(Stmt {
            kind,
            span: start.to(Span {
                end: self.last_end,
                ..start
            }),
        })
    }

    fn parse_statement_kind(&mut self) -> PResult<StmtKind> {
        let token = self.peek().clone();
        let keyword = match &token.tok {
            Tok::Punct("{") => return Ok(StmtKind::Block(self.parse_block()?)),
            Tok::Punct(";") => {
                self.next();
                return Ok(StmtKind::Empty);
            }
            Tok::Punct("@") => return Err(SyntaxError::new("Decorators are not supported", token.span)),
            Tok::Ident(name) => name.clone(),
            _ => return self.parse_expression_statement(),
        };
        let next = self.peek_at(1).clone();
        let next_on_line = !next.nl_before;
        let next_is_ident = matches!(next.tok, Tok::Ident(_));

        match keyword.as_str() {
            "var" | "const" => {
                let decl = self.parse_var_decl()?;
                self.consume_semicolon()?;
                Ok(StmtKind::Var(decl))
            }
            "let" if next_is_ident || matches!(next.tok, Tok::Punct("[" | "{")) => {
                let decl = self.parse_var_decl()?;
                self.consume_semicolon()?;
                Ok(StmtKind::Var(decl))
            }
            "function" => self.parse_function_declaration(false, token.span.start),
            "async" if next_on_line && next.tok == Tok::Ident("function".into()) => {
                self.next();
                self.parse_function_declaration(true, token.span.start)
            }
            "class" => Ok(StmtKind::Class(self.parse_class(false)?)),
            "abstract" if next_on_line && next.tok == Tok::Ident("class".into()) => {
                let span = self.next().span;
                self.erase(span.start, span.end);
                Ok(StmtKind::Class(self.parse_class(false)?))
            }
            "if" => {
                self.next();
                self.expect_punct("(")?;
                let test = self.parse_expression()?;
                self.expect_punct(")")?;
                let consequent = Box::new(self.parse_statement()?);
                let alternate = if self.eat_ident("else") {
                    Some(Box::new(self.parse_statement()?))
                } else {
                    None
                };
                Ok(StmtKind::If(test, consequent, alternate))
            }
            "for" => self.parse_for(),
            "while" => {
                self.next();
                self.expect_punct("(")?;
                let test = self.parse_expression()?;
                self.expect_punct(")")?;
                Ok(StmtKind::While(test, Box::new(self.parse_statement()?)))
            }
            "do" => {
                self.next();
                let body = Box::new(self.parse_statement()?);
                if !self.eat_ident("while") {
                    return Err(self.unexpected());
                }
                self.expect_punct("(")?;
                let test = self.parse_expression()?;
                self.expect_punct(")")?;
                self.eat_punct(";");
                Ok(StmtKind::DoWhile(body, test))
            }
            "return" => {
                self.next();
                let value = if self.is_punct(";") || self.is_punct("}") || self.at_eof() || self.peek().nl_before {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                self.consume_semicolon()?;
                Ok(StmtKind::Return(value))
            }
            "break" | "continue" => {
                self.next();
                let label = match &self.peek().tok {
                    Tok::Ident(name) if !self.peek().nl_before && !RESERVED.contains(&name.as_str()) => {
                        Some(self.binding_name()?.0)
                    }
                    _ => None,
                };
                self.consume_semicolon()?;
                Ok(if keyword == "break" {
                    StmtKind::Break(label)
                } else {
                    StmtKind::Continue(label)
                })
            }
            "throw" => {
                self.next();
                if self.peek().nl_before {
                    return Err(SyntaxError::new("Illegal newline after throw", self.peek().span));
                }
                let value = self.parse_expression()?;
                self.consume_semicolon()?;
                Ok(StmtKind::Throw(value))
            }
            "try" => self.parse_try(),
            "switch" => self.parse_switch(),
            "interface" if next_on_line && next_is_ident => {
                self.next();
                self.next();
                self.skip_type_params()?;
                while !self.is_punct("{") {
                    if self.at_eof() {
                        return Err(self.unexpected());
                    }
                    self.next();
                }
                self.skip_balanced()?;
                self.erase(token.span.start, self.last_end);
                Ok(StmtKind::Empty)
            }
            "type" if next_on_line && next_is_ident && matches!(self.peek_at(2).tok, Tok::Punct("=" | "<")) => {
                self.next();
                self.next();
                self.skip_type_params()?;
                self.expect_punct("=")?;
                self.skip_type()?;
                self.eat_punct(";");
                self.erase(token.span.start, self.last_end);
                Ok(StmtKind::Empty)
            }
            "declare" if next_on_line && next_is_ident => {
                self.next();
                self.skip_declaration(token.span.start)?;
                Ok(StmtKind::Empty)
            }
            "import" if next.tok == Tok::Ident("type".into()) => {
                self.next();
                self.skip_declaration(token.span.start)?;
                Ok(StmtKind::Empty)
            }
            "import" => Err(SyntaxError::new("Cannot use import statement here; modules are not supported", token.span)),
            "export" if next.tok == Tok::Ident("type".into()) || next.tok == Tok::Ident("interface".into()) || next.tok == Tok::Ident("declare".into()) => {
                self.next();
                if self.is_ident("interface") || (self.is_ident("type") && matches!(self.peek_at(2).tok, Tok::Punct("=" | "<"))) {
                    let inner = self.parse_statement_kind()?;
                    self.erase(token.span.start, self.last_end);
                    return Ok(inner);
                }
                self.skip_declaration(token.span.start)?;
                Ok(StmtKind::Empty)
            }
            "export" => {
                self.next();
                self.eat_ident("default");
                self.parse_statement_kind()
            }
            "enum" => Err(SyntaxError::new("enum declarations are not supported", token.span)),
            "namespace" | "module" if next_on_line && (next_is_ident || matches!(next.tok, Tok::Str(_))) => {
                Err(SyntaxError::new("namespaces are not supported", token.span))
            }
            _ if !RESERVED.contains(&keyword.as_str()) && matches!(next.tok, Tok::Punct(":")) => {
                let (label, _) = self.binding_name()?;
                self.next();
                Ok(StmtKind::Labeled(label, Box::new(self.parse_statement()?)))
            }
            _ => self.parse_expression_statement(),
        }
    }

    fn parse_expression_statement(&mut self) -> PResult<StmtKind> {
        let expr = self.parse_expression()?;
        self.consume_semicolon()?;
        Ok(StmtKind::Expr(expr))
    }

    fn parse_block(&mut self) -> PResult<Vec<Stmt>> {
        self.expect_punct("{")?;
        let mut body = Vec::new();
        while !self.is_punct("}") {
            if self.at_eof() {
                return Err(self.unexpected());
            }
            body.push(self.parse_statement()?);
        }
        self.next();
        Ok(body)
    }

    fn decl_kind(&mut self) -> PResult<DeclKind> {
        let kind = match self.ident_at(0) {
            Some("var") => DeclKind::Var,
            Some("let") => DeclKind::Let,
            Some("const") => DeclKind::Const,
            _ => return Err(self.unexpected()),
        };
        self.next();
        Ok(kind)
    }

    fn parse_var_decl(&mut self) -> PResult<VarDecl> {
        let kind = self.decl_kind()?;
        let first = self.parse_binding_target()?;
        self.parse_declarators(kind, first)
    }

    fn parse_declarators(&mut self, kind: DeclKind, first: Pattern) -> PResult<VarDecl> {
        let mut decls = Vec::new();
        let mut target = first;
        loop {
            self.skip_optional_marker();
            self.skip_annotation()?;
            let init = if self.eat_punct("=") {
                Some(self.parse_assignment()?)
            } else {
                None
            };
            if init.is_none() && kind == DeclKind::Const {
                return Err(SyntaxError::new("Missing initializer in const declaration", self.peek().span));
            }
            decls.push((target, init));
            if !self.eat_punct(",") {
                break;
            }
            target = self.parse_binding_target()?;
        }
        Ok(VarDecl { kind, decls })
    }

    fn parse_for(&mut self) -> PResult<StmtKind> {
        self.next();
        if self.is_ident("await") {
            return Err(SyntaxError::new("for await is not supported", self.peek().span));
        }
        self.expect_punct("(")?;
        let mut init = None;
        if !self.is_punct(";") {
            let is_decl = match self.ident_at(0) {
                Some("var") | Some("const") => true,
                Some("let") => matches!(self.peek_at(1).tok, Tok::Ident(_) | Tok::Punct("[" | "{")),
                _ => false,
            };
            if is_decl {
                let kind = self.decl_kind()?;
                let target = self.parse_binding_target()?;
                if self.eat_ident("of") {
                    return self.finish_for_each(ForHead::Decl(kind, target), true);
                }
                if self.eat_ident("in") {
                    return self.finish_for_each(ForHead::Decl(kind, target), false);
                }
                let saved = std::mem::replace(&mut self.no_in, true);
                let decl = self.parse_declarators(kind, target);
                self.no_in = saved;
                init = Some(ForInit::Var(decl?));
            } else {
                let saved = std::mem::replace(&mut self.no_in, true);
                let expr = self.parse_expression();
                self.no_in = saved;
                let expr = expr?;
                if self.is_ident("of") || self.is_ident("in") {
                    let is_of = self.is_ident("of");
                    self.next();
                    let target = self.expr_to_pattern(expr)?;
                    return self.finish_for_each(ForHead::Target(target), is_of);
                }
                init = Some(ForInit::Expr(expr));
            }
        }
        self.expect_punct(";")?;
        let test = if self.is_punct(";") {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect_punct(";")?;
        let update = if self.is_punct(")") {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect_punct(")")?;
        let body = Box::new(self.parse_statement()?);
        Ok(StmtKind::For {
            init,
            test,
            update,
            body,
        })
    }

    fn finish_for_each(&mut self, head: ForHead, is_of: bool) -> PResult<StmtKind> {
        let iterable = if is_of {
            self.parse_assignment()?
        } else {
            self.parse_expression()?
        };
        self.expect_punct(")")?;
        let body = Box::new(self.parse_statement()?);
        Ok(if is_of {
            StmtKind::ForOf(head, iterable, body)
        } else {
            StmtKind::ForIn(head, iterable, body)
        })
    }

    fn parse_try(&mut self) -> PResult<StmtKind> {
        self.next();
        let block = self.parse_block()?;
        let handler = if self.eat_ident("catch") {
            let param = if self.eat_punct("(") {
                let param = self.parse_binding_target()?;
                self.skip_annotation()?;
                self.expect_punct(")")?;
                Some(param)
            } else {
                None
            };
            Some(CatchClause {
                param,
                body: self.parse_block()?,
            })
        } else {
            None
        };
        let finalizer = if self.eat_ident("finally") {
            Some(self.parse_block()?)
        } else {
            None
        };
        if handler.is_none() && finalizer.is_none() {
            return Err(SyntaxError::new("Missing catch or finally after try", self.peek().span));
        }
        Ok(StmtKind::Try {
            block,
            handler,
            finalizer,
        })
    }

    fn parse_switch(&mut self) -> PResult<StmtKind> {
        self.next();
        self.expect_punct("(")?;
        let discriminant = self.parse_expression()?;
        self.expect_punct(")")?;
        self.expect_punct("{")?;
        let mut cases = Vec::new();
        while !self.eat_punct("}") {
            let test = if self.eat_ident("case") {
                Some(self.parse_expression()?)
            } else if self.eat_ident("default") {
                None
            } else {
                return Err(self.unexpected());
            };
            self.expect_punct(":")?;
            let mut body = Vec::new();
            while !(self.is_ident("case") || self.is_ident("default") || self.is_punct("}")) {
                if self.at_eof() {
                    return Err(self.unexpected());
                }
                body.push(self.parse_statement()?);
            }
            cases.push(SwitchCase { test, body });
        }
        Ok(StmtKind::Switch(discriminant, cases))
    }

    // --- functions and classes ---

    fn parse_function_declaration(&mut self, is_async: bool, start: usize) -> PResult<StmtKind> {
        let span = self.next().span;
        if self.is_punct("*") {
            return Err(SyntaxError::new("Generator functions are not supported", self.peek().span));
        }
        let (name, _) = self.binding_name()?;
        match self.parse_function_rest(Some(name), is_async, span, true)? {
            Some(function) => Ok(StmtKind::Function(function)),
            None => {
                // overload signature without a body
                self.eat_punct(";");
                self.erase(start, self.last_end);
                Ok(StmtKind::Empty)
            }
        }
    }

    /// Parses `<T>(params): R { body }`; returns `None` for a body-less
    /// signature when `allow_signature` is set.
    fn parse_function_rest(
        &mut self,
        name: Option<Name>,
        is_async: bool,
        span: Span,
        allow_signature: bool,
    ) -> PResult<Option<Rc<Function>>> {
        self.skip_type_params()?;
        let saved_async = std::mem::replace(&mut self.in_async, is_async);
        let params = self.parse_params();
        self.in_async = saved_async;
        let params = params?;
        self.skip_annotation()?;
        if allow_signature && !self.is_punct("{") {
            return Ok(None);
        }
        let saved_async = std::mem::replace(&mut self.in_async, is_async);
        let saved_no_in = std::mem::replace(&mut self.no_in, false);
        let body = self.parse_block();
        self.in_async = saved_async;
        self.no_in = saved_no_in;
        Ok(Some(Rc::new(Function {
            name,
            params,
            body: FunctionBody::Block(body?),
            is_async,
            is_arrow: false,
            span: span.to(Span {
                end: self.last_end,
                ..span
            }),
        })))
    }

    fn parse_params(&mut self) -> PResult<Vec<Param>> {
        self.expect_punct("(")?;
        let mut params = Vec::new();
        while !self.is_punct(")") {
            // `this: T` only declares the receiver type
            if self.is_ident("this") && self.is_punct_at(1, ":") {
                let start = self.next().span.start;
                self.skip_annotation()?;
                self.eat_punct(",");
                self.erase(start, self.last_end);
                continue;
            }
            while let Some(modifier) = self.ident_at(0) {
                let is_modifier = TS_MODIFIERS.contains(&modifier)
                    && matches!(self.peek_at(1).tok, Tok::Ident(_) | Tok::Punct("[" | "{"));
                if !is_modifier {
                    break;
                }
                let span = self.next().span;
                self.erase(span.start, span.end);
            }
            let rest = self.eat_punct("...");
            let pattern = self.parse_binding_target()?;
            self.skip_optional_marker();
            self.skip_annotation()?;
            let default = if self.eat_punct("=") {
                Some(self.parse_assignment()?)
            } else {
                None
            };
            params.push(Param { pattern, default, rest });
            if !self.eat_punct(",") {
                break;
            }
        }
        self.expect_punct(")")?;
        Ok(params)
    }

    fn parse_class(&mut self, is_expr: bool) -> PResult<Rc<Class>> {
        let span = self.next().span;
        let name = match &self.peek().tok {
            Tok::Ident(n) if n != "extends" && n != "implements" => Some(self.binding_name()?.0),
            _ if is_expr => None,
            _ => return Err(self.unexpected()),
        };
        self.skip_type_params()?;
        let superclass = if self.eat_ident("extends") {
            let expr = self.parse_call_member(true)?;
            self.skip_type_params()?;
            Some(expr)
        } else {
            None
        };
        if self.is_ident("implements") {
            let start = self.next().span.start;
            loop {
                self.skip_type()?;
                if !self.eat_punct(",") {
                    break;
                }
            }
            self.erase(start, self.last_end);
        }
        self.expect_punct("{")?;
        let mut constructor = None;
        let mut members = Vec::new();
        while !self.eat_punct("}") {
            if self.eat_punct(";") {
                continue;
            }
            if self.at_eof() {
                return Err(self.unexpected());
            }
            if let Some(member) = self.parse_class_member(&mut constructor)? {
                members.push(member);
            }
        }
        Ok(Rc::new(Class {
            name,
            superclass,
            constructor,
            members,
            span: span.to(Span {
                end: self.last_end,
                ..span
            }),
        }))
    }

    fn parse_class_member(&mut self, constructor: &mut Option<Rc<Function>>) -> PResult<Option<ClassMember>> {
        let start = self.peek().span;
        let mut is_static = false;
        let mut is_async = false;
        let mut erase_whole = false;
        loop {
            let Some(word) = self.ident_at(0) else { break };
            let next = self.peek_at(1);
            let is_modifier = !next.nl_before
                && !matches!(next.tok, Tok::Punct("(" | "=" | ";" | ":" | "?" | "!" | "}" | "<"));
            if !is_modifier {
                break;
            }
            match word {
                "static" => {
                    is_static = true;
                    self.next();
                }
                "async" => {
                    is_async = true;
                    self.next();
                }
                "abstract" | "declare" => {
                    erase_whole = true;
                    self.next();
                }
                "get" | "set" => {
                    return Err(SyntaxError::new("Getters and setters are not supported", self.peek().span));
                }
                w if TS_MODIFIERS.contains(&w) || w == "accessor" => {
                    let span = self.next().span;
                    self.erase(span.start, span.end);
                }
                _ => break,
            }
        }

        // index signature `[key: string]: T;`
        if self.is_punct("[") && matches!(self.peek_at(1).tok, Tok::Ident(_)) && self.is_punct_at(2, ":") {
            self.skip_balanced()?;
            self.skip_annotation()?;
            self.eat_punct(";");
            self.erase(start.start, self.last_end);
            return Ok(None);
        }

        if self.is_punct("*") {
            return Err(SyntaxError::new("Generator methods are not supported", self.peek().span));
        }
        let key = self.parse_prop_key()?;
        self.skip_optional_marker();

        if self.is_punct("(") || self.is_punct("<") {
            let name = match &key {
                PropKey::Name(name) => Some(name.clone()),
                PropKey::Computed(_) => None,
            };
            let function = self.parse_function_rest(name.clone(), is_async, start, true)?;
            let Some(function) = function else {
                self.eat_punct(";");
                self.erase(start.start, self.last_end);
                return Ok(None);
            };
            if erase_whole {
                self.erase(start.start, self.last_end);
                return Ok(None);
            }
            if !is_static && name.as_deref() == Some("constructor") {
                *constructor = Some(function);
                return Ok(None);
            }
            return Ok(Some(ClassMember {
                is_static,
                key,
                kind: ClassMemberKind::Method(function),
            }));
        }

        self.skip_annotation()?;
        let init = if self.eat_punct("=") {
            let saved = std::mem::replace(&mut self.in_async, false);
            let init = self.parse_assignment();
            self.in_async = saved;
            Some(init?)
        } else {
            None
        };
        self.consume_semicolon()?;
        if erase_whole {
            self.erase(start.start, self.last_end);
            return Ok(None);
        }
        Ok(Some(ClassMember {
            is_static,
            key,
            kind: ClassMemberKind::Field(init),
        }))
    }

    fn parse_prop_key(&mut self) -> PResult<PropKey> {
        let token = self.next();
        match token.tok {
            Tok::Ident(name) => Ok(PropKey::Name(Rc::from(name.as_str()))),
            Tok::Str(s) => Ok(PropKey::Name(Rc::from(s.as_str()))),
            Tok::Num(n) => Ok(PropKey::Name(Rc::from(super::value::number_to_string(n).as_str()))),
            Tok::Punct("#") => match self.next().tok {
                Tok::Ident(name) => Ok(PropKey::Name(Rc::from(format!("#{}", name).as_str()))),
                _ => Err(SyntaxError::new("Invalid private name", token.span)),
            },
            Tok::Punct("[") => {
                let expr = self.parse_assignment()?;
                self.expect_punct("]")?;
                Ok(PropKey::Computed(Box::new(expr)))
            }
            _ => Err(SyntaxError::new(format!("Unexpected token '{}'", token.tok), token.span)),
        }
    }

    // --- patterns ---

    fn parse_binding_target(&mut self) -> PResult<Pattern> {
        self.nested(Self::parse_binding_target_inner)
    }

    fn parse_binding_target_inner(&mut self) -> PResult<Pattern> {
        if self.eat_punct("[") {
            let mut items = Vec::new();
            let mut rest = None;
            while !self.is_punct("]") {
                if self.eat_punct(",") {
                    items.push(None);
                    continue;
                }
                if self.eat_punct("...") {
                    rest = Some(Box::new(self.parse_binding_target()?));
                    break;
                }
                let target = self.parse_binding_target()?;
                let default = if self.eat_punct("=") {
                    Some(self.parse_assignment()?)
                } else {
                    None
                };
                items.push(Some(PatternItem { target, default }));
                if !self.eat_punct(",") {
                    break;
                }
            }
            self.expect_punct("]")?;
            return Ok(Pattern::Array { items, rest });
        }
        if self.eat_punct("{") {
            let mut props = Vec::new();
            let mut rest = None;
            while !self.is_punct("}") {
                if self.eat_punct("...") {
                    rest = Some(Box::new(self.parse_binding_target()?));
                    break;
                }
                let key_token = self.peek().clone();
                let key = self.parse_prop_key()?;
                let target = if self.eat_punct(":") {
                    self.parse_binding_target()?
                } else {
                    match (&key, &key_token.tok) {
                        (PropKey::Name(name), Tok::Ident(_)) if !RESERVED.contains(&&**name) => {
                            Pattern::Ident(name.clone(), key_token.span)
                        }
                        _ => return Err(SyntaxError::new("Unexpected token", key_token.span)),
                    }
                };
                let default = if self.eat_punct("=") {
                    Some(self.parse_assignment()?)
                } else {
                    None
                };
                props.push(PatternProp { key, target, default });
                if !self.eat_punct(",") {
                    break;
                }
            }
            self.expect_punct("}")?;
            return Ok(Pattern::Object { props, rest });
        }
        let (name, span) = self.binding_name()?;
        Ok(Pattern::Ident(name, span))
    }

    fn expr_to_pattern(&self, expr: Expr) -> PResult<Pattern> {
        let span = expr.span;
        match expr.kind {
            ExprKind::Ident(name) => Ok(Pattern::Ident(name, span)),
            ExprKind::Member { optional: false, .. } | ExprKind::SuperMember(_) => Ok(Pattern::Member(Box::new(expr))),
            ExprKind::Array(elements) => {
                let mut items = Vec::new();
                let mut rest = None;
                let count = elements.len();
                for (i, element) in elements.into_iter().enumerate() {
                    match element {
                        ArrayItem::Hole => items.push(None),
                        ArrayItem::Spread(inner) if i + 1 == count => {
                            rest = Some(Box::new(self.expr_to_pattern(inner)?));
                        }
                        ArrayItem::Spread(inner) => {
                            return Err(SyntaxError::new("Rest element must be last element", inner.span));
                        }
                        ArrayItem::Item(inner) => items.push(Some(self.expr_to_pattern_item(inner)?)),
                    }
                }
                Ok(Pattern::Array { items, rest })
            }
            ExprKind::Object(defs) => {
                let mut props = Vec::new();
                let mut rest = None;
                for def in defs {
                    match def {
                        PropDef::KeyValue(key, value) => {
                            let item = self.expr_to_pattern_item(value)?;
                            props.push(PatternProp {
                                key,
                                target: item.target,
                                default: item.default,
                            });
                        }
                        PropDef::Shorthand(name, span) => props.push(PatternProp {
                            key: PropKey::Name(name.clone()),
                            target: Pattern::Ident(name, span),
                            default: None,
                        }),
                        PropDef::Spread(inner) => rest = Some(Box::new(self.expr_to_pattern(inner)?)),
                        PropDef::Method(..) => {
                            return Err(SyntaxError::new("Invalid destructuring assignment target", span))
                        }
                    }
                }
                Ok(Pattern::Object { props, rest })
            }
            _ => Err(SyntaxError::new("Invalid left-hand side in assignment", span)),
        }
    }

    fn expr_to_pattern_item(&self, expr: Expr) -> PResult<PatternItem> {
        match expr.kind {
            ExprKind::Assign { op: None, target, value } => Ok(PatternItem {
                target: *target,
                default: Some(*value),
            }),
            _ => Ok(PatternItem {
                target: self.expr_to_pattern(expr)?,
                default: None,
            }),
        }
    }

    // --- expressions ---

    pub fn parse_expression(&mut self) -> PResult<Expr> {
        let first = self.parse_assignment()?;
        if !self.is_punct(",") {
            return Ok(first);
        }
        let start = first.span;
        let mut items = vec![first];
        while self.eat_punct(",") {
            items.push(self.parse_assignment()?);
        }
        Ok(Expr {
            span: start.to(Span {
                end: self.last_end,
                ..start
            }),
            kind: ExprKind::Sequence(items),
        })
    }

    fn spanned(&self, start: Span, kind: ExprKind) -> Expr {
        Expr {
            kind,
            span: start.to(Span {
                end: self.last_end,
                ..start
            }),
        }
    }

    fn parse_assignment(&mut self) -> PResult<Expr> {
        self.nested(Self::parse_assignment_inner)
    }

    fn parse_assignment_inner(&mut self) -> PResult<Expr> {
        if let Some(arrow) = self.try_arrow()? {
            return Ok(arrow);
        }
        let start = self.peek().span;
        let lhs = self.parse_conditional()?;

        let op = match &self.peek().tok {
            Tok::Punct("=") => Some(None),
            Tok::Punct("+=") => Some(Some(AssignOp::Arith(BinOp::Add))),
            Tok::Punct("-=") => Some(Some(AssignOp::Arith(BinOp::Sub))),
            Tok::Punct("*=") => Some(Some(AssignOp::Arith(BinOp::Mul))),
            Tok::Punct("/=") => Some(Some(AssignOp::Arith(BinOp::Div))),
            Tok::Punct("%=") => Some(Some(AssignOp::Arith(BinOp::Rem))),
            Tok::Punct("**=") => Some(Some(AssignOp::Arith(BinOp::Exp))),
            Tok::Punct("<<=") => Some(Some(AssignOp::Arith(BinOp::Shl))),
            Tok::Punct("&=") => Some(Some(AssignOp::Arith(BinOp::BitAnd))),
            Tok::Punct("|=") => Some(Some(AssignOp::Arith(BinOp::BitOr))),
            Tok::Punct("^=") => Some(Some(AssignOp::Arith(BinOp::BitXor))),
            Tok::Punct("&&=") => Some(Some(AssignOp::Logical(LogicalOp::And))),
            Tok::Punct("||=") => Some(Some(AssignOp::Logical(LogicalOp::Or))),
            Tok::Punct("??=") => Some(Some(AssignOp::Logical(LogicalOp::Nullish))),
            Tok::Punct(">") if self.adjacent_gt(0) => {
                // `>>=` and `>>>=` arrive as separate tokens
                if self.is_punct_at(1, ">") && self.is_punct_at(2, "=") && self.adjacent_gt(1) {
                    Some(Some(AssignOp::Arith(BinOp::Shr)))
                } else if self.is_punct_at(1, ">") && self.is_punct_at(2, ">") && self.is_punct_at(3, "=") && self.adjacent_gt(1) && self.adjacent_gt(2) {
                    Some(Some(AssignOp::Arith(BinOp::UShr)))
                } else {
                    None
                }
            }
            _ => None,
        };
        let Some(op) = op else { return Ok(lhs) };
        match op {
            Some(AssignOp::Arith(BinOp::Shr)) => {
                self.next();
                self.next();
            }
            Some(AssignOp::Arith(BinOp::UShr)) => {
                self.next();
                self.next();
                self.next();
            }
            _ => {}
        }
        self.next();
        let target = if op.is_none() {
            self.expr_to_pattern(lhs)?
        } else {
            match lhs.kind {
                ExprKind::Ident(_) | ExprKind::Member { optional: false, .. } | ExprKind::SuperMember(_) => {
                    self.expr_to_pattern(lhs)?
                }
                _ => return Err(SyntaxError::new("Invalid left-hand side in assignment", lhs.span)),
            }
        };
        let value = self.parse_assignment()?;
        Ok(self.spanned(
            start,
            ExprKind::Assign {
                op,
                target: Box::new(target),
                value: Box::new(value),
            },
        ))
    }

    /// Recognises arrow functions at the current position.
    fn try_arrow(&mut self) -> PResult<Option<Expr>> {
        let start = self.peek().span;
        let mut is_async = false;
        let mut offset = 0;
        if self.is_ident("async") && !self.peek_at(1).nl_before {
            match &self.peek_at(1).tok {
                Tok::Ident(_) if self.is_punct_at(2, "=>") => {
                    is_async = true;
                    offset = 1;
                }
                Tok::Punct("(") | Tok::Punct("<") => {
                    is_async = true;
                    offset = 1;
                }
                _ => {}
            }
        }

        // single identifier parameter: `x => ...`
        if let Tok::Ident(name) = &self.peek_at(offset).tok {
            if !RESERVED.contains(&name.as_str()) && self.is_punct_at(offset + 1, "=>") && !self.peek_at(offset + 1).nl_before {
                if is_async {
                    self.next();
                }
                let (name, span) = self.binding_name()?;
                self.next();
                let params = vec![Param {
                    pattern: Pattern::Ident(name, span),
                    default: None,
                    rest: false,
                }];
                return self.parse_arrow_body(params, is_async, start).map(Some);
            }
        }

        if !(self.is_punct_at(offset, "(") || self.is_punct_at(offset, "<")) {
            return Ok(None);
        }

        let cp = self.checkpoint();
        if is_async {
            self.next();
        }
        let head = (|| -> PResult<Vec<Param>> {
            self.skip_type_params()?;
            let saved = std::mem::replace(&mut self.in_async, is_async);
            let params = self.parse_params();
            self.in_async = saved;
            let params = params?;
            self.skip_annotation()?;
            if self.is_punct("=>") && !self.peek().nl_before {
                Ok(params)
            } else {
                Err(self.unexpected())
            }
        })();
        match head {
            Ok(params) => {
                self.next();
                self.parse_arrow_body(params, is_async, start).map(Some)
            }
            Err(_) => {
                self.restore(cp);
                Ok(None)
            }
        }
    }

    fn parse_arrow_body(&mut self, params: Vec<Param>, is_async: bool, start: Span) -> PResult<Expr> {
        let saved_async = std::mem::replace(&mut self.in_async, is_async);
        let body = if self.is_punct("{") {
            let saved_no_in = std::mem::replace(&mut self.no_in, false);
            let block = self.parse_block();
            self.no_in = saved_no_in;
            block.map(FunctionBody::Block)
        } else {
            self.parse_assignment().map(|e| FunctionBody::Expr(Box::new(e)))
        };
        self.in_async = saved_async;
        let body = body?;
        let span = start.to(Span {
            end: self.last_end,
            ..start
        });
        Ok(Expr {
            kind: ExprKind::Function(Rc::new(Function {
                name: None,
                params,
                body,
                is_async,
                is_arrow: true,
                span,
            })),
            span,
        })
    }

    fn parse_conditional(&mut self) -> PResult<Expr> {
        let start = self.peek().span;
        let test = self.parse_binary(0)?;
        if !self.eat_punct("?") {
            return Ok(test);
        }
        let saved = std::mem::replace(&mut self.no_in, false);
        let consequent = self.parse_assignment();
        self.no_in = saved;
        let consequent = consequent?;
        self.expect_punct(":")?;
        let alternate = self.parse_assignment()?;
        Ok(self.spanned(
            start,
            ExprKind::Conditional(Box::new(test), Box::new(consequent), Box::new(alternate)),
        ))
    }

    /// Current binary operator: (operator, tokens it spans, precedence).
    fn peek_binary(&self) -> Option<(&'static str, usize, u8)> {
        let op: &'static str = match &self.peek().tok {
            Tok::Punct(">") => {
                if self.adjacent_gt(0) && self.is_punct_at(1, ">") {
                    if self.adjacent_gt(1) && self.is_punct_at(2, ">") {
                        if self.adjacent_gt(2) && self.is_punct_at(3, "=") {
                            return None;
                        }
                        return Some((">>>", 3, 9));
                    }
                    if self.adjacent_gt(1) && self.is_punct_at(2, "=") {
                        return None;
                    }
                    return Some((">>", 2, 9));
                }
                if self.adjacent_gt(0) && self.is_punct_at(1, "=") {
                    return Some((">=", 2, 8));
                }
                ">"
            }
            Tok::Punct(p) => *p,
            Tok::Ident(name) if name == "instanceof" => "instanceof",
            Tok::Ident(name) if name == "in" && !self.no_in => "in",
            _ => return None,
        };
        let prec = match op {
            "??" => 1,
            "||" => 2,
            "&&" => 3,
            "|" => 4,
            "^" => 5,
            "&" => 6,
            "==" | "!=" | "===" | "!==" => 7,
            "<" | ">" | "<=" | "instanceof" | "in" => 8,
            "<<" => 9,
            "+" | "-" => 10,
            "*" | "/" | "%" => 11,
            "**" => 12,
            _ => return None,
        };
        Some((op, 1, prec))
    }

    fn parse_binary(&mut self, min_prec: u8) -> PResult<Expr> {
        let start = self.peek().span;
        let mut left = self.parse_unary()?;
        loop {
            // `expr as T` / `expr satisfies T` bind like relational operators
            if (self.is_ident("as") || self.is_ident("satisfies")) && !self.peek().nl_before && min_prec <= 8 {
                let erase_start = self.peek().span.start;
                self.next();
                if !self.eat_ident("const") {
                    self.skip_type()?;
                }
                self.erase(erase_start, self.last_end);
                continue;
            }
            let Some((op, width, prec)) = self.peek_binary() else { break };
            if prec < min_prec {
                break;
            }
            for _ in 0..width {
                self.next();
            }
            let right = if op == "**" {
                self.parse_binary(prec)?
            } else {
                self.parse_binary(prec + 1)?
            };
            let kind = match op {
                "&&" => ExprKind::Logical(LogicalOp::And, Box::new(left), Box::new(right)),
                "||" => ExprKind::Logical(LogicalOp::Or, Box::new(left), Box::new(right)),
                "??" => ExprKind::Logical(LogicalOp::Nullish, Box::new(left), Box::new(right)),
                _ => {
                    let bin = match op {
                        "+" => BinOp::Add,
                        "-" => BinOp::Sub,
                        "*" => BinOp::Mul,
                        "/" => BinOp::Div,
                        "%" => BinOp::Rem,
                        "**" => BinOp::Exp,
                        "==" => BinOp::Eq,
                        "!=" => BinOp::NotEq,
                        "===" => BinOp::StrictEq,
                        "!==" => BinOp::StrictNotEq,
                        "<" => BinOp::Lt,
                        ">" => BinOp::Gt,
                        "<=" => BinOp::LtEq,
                        ">=" => BinOp::GtEq,
                        "<<" => BinOp::Shl,
                        ">>" => BinOp::Shr,
                        ">>>" => BinOp::UShr,
                        "&" => BinOp::BitAnd,
                        "|" => BinOp::BitOr,
                        "^" => BinOp::BitXor,
                        "in" => BinOp::In,
                        _ => BinOp::InstanceOf,
                    };
                    ExprKind::Binary(bin, Box::new(left), Box::new(right))
                }
            };
            left = self.spanned(start, kind);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> PResult<Expr> {
        let start = self.peek().span;
        let op = match &self.peek().tok {
            Tok::Punct("!") => Some(UnaryOp::Not),
            Tok::Punct("-") => Some(UnaryOp::Neg),
            Tok::Punct("+") => Some(UnaryOp::Plus),
            Tok::Punct("~") => Some(UnaryOp::BitNot),
            Tok::Ident(name) if name == "typeof" => Some(UnaryOp::TypeOf),
            Tok::Ident(name) if name == "void" => Some(UnaryOp::Void),
            Tok::Ident(name) if name == "delete" => Some(UnaryOp::Delete),
            _ => None,
        };
        if let Some(op) = op {
            self.next();
            let operand = self.nested(Self::parse_unary)?;
            return Ok(self.spanned(start, ExprKind::Unary(op, Box::new(operand))));
        }
        if self.is_punct("++") || self.is_punct("--") {
            let increment = self.next().tok == Tok::Punct("++");
            let target = self.nested(Self::parse_unary)?;
            self.check_update_target(&target)?;
            return Ok(self.spanned(
                start,
                ExprKind::Update {
                    increment,
                    prefix: true,
                    target: Box::new(target),
                },
            ));
        }
        if self.is_ident("await") {
            if !self.in_async {
                return Err(SyntaxError::new(
                    "await is only valid in async functions and the top level bodies of modules",
                    start,
                ));
            }
            self.next();
            let operand = self.nested(Self::parse_unary)?;
            return Ok(self.spanned(start, ExprKind::Await(Box::new(operand))));
        }
        if self.is_punct("<") {
            return Err(SyntaxError::new("Angle-bracket type assertions are not supported; use 'as'", start));
        }

        let expr = self.parse_call_member(false)?;
        if (self.is_punct("++") || self.is_punct("--")) && !self.peek().nl_before {
            self.check_update_target(&expr)?;
            let increment = self.next().tok == Tok::Punct("++");
            return Ok(self.spanned(
                start,
                ExprKind::Update {
                    increment,
                    prefix: false,
                    target: Box::new(expr),
                },
            ));
        }
        Ok(expr)
    }

    fn check_update_target(&self, target: &Expr) -> PResult<()> {
        match target.kind {
            ExprKind::Ident(_) | ExprKind::Member { optional: false, .. } | ExprKind::SuperMember(_) => Ok(()),
            _ => Err(SyntaxError::new(
                "Invalid left-hand side expression in prefix operation",
                target.span,
            )),
        }
    }

    fn parse_args(&mut self) -> PResult<Vec<ArrayItem>> {
        self.expect_punct("(")?;
        let saved = std::mem::replace(&mut self.no_in, false);
        let mut args = Vec::new();
        let result = (|| -> PResult<()> {
            while !self.is_punct(")") {
                if self.eat_punct("...") {
                    args.push(ArrayItem::Spread(self.parse_assignment()?));
                } else {
                    args.push(ArrayItem::Item(self.parse_assignment()?));
                }
                if !self.eat_punct(",") {
                    break;
                }
            }
            self.expect_punct(")")?;
            Ok(())
        })();
        self.no_in = saved;
        result.map(|_| args)
    }

    /// Speculatively erases `<T>` when it is followed by a call.
    fn try_type_arguments(&mut self) -> bool {
        if !self.is_punct("<") {
            return false;
        }
        let cp = self.checkpoint();
        let start = self.peek().span.start;
        if self.skip_type_arguments().is_ok() && self.is_punct("(") {
            self.erase(start, self.last_end);
            return true;
        }
        self.restore(cp);
        false
    }

    fn parse_call_member(&mut self, no_call: bool) -> PResult<Expr> {
        let start = self.peek().span;
        let mut expr = if self.is_ident("new") {
            self.parse_new()?
        } else {
            self.parse_primary()?
        };
        let mut chained = false;
        loop {
            if self.eat_punct(".") {
                let prop = self.member_name()?;
                expr = self.spanned(
                    start,
                    ExprKind::Member {
                        object: Box::new(expr),
                        prop,
                        optional: false,
                    },
                );
            } else if self.is_punct("?.") {
                if no_call {
                    return Err(SyntaxError::new("Invalid optional chain from new expression", self.peek().span));
                }
                self.next();
                chained = true;
                if self.is_punct("(") {
                    let args = self.parse_args()?;
                    expr = self.spanned(
                        start,
                        ExprKind::Call {
                            callee: Box::new(expr),
                            args,
                            optional: true,
                        },
                    );
                } else if self.eat_punct("[") {
                    let prop = self.parse_expression()?;
                    self.expect_punct("]")?;
                    expr = self.spanned(
                        start,
                        ExprKind::Member {
                            object: Box::new(expr),
                            prop: MemberProp::Computed(Box::new(prop)),
                            optional: true,
                        },
                    );
                } else {
                    let prop = self.member_name()?;
                    expr = self.spanned(
                        start,
                        ExprKind::Member {
                            object: Box::new(expr),
                            prop,
                            optional: true,
                        },
                    );
                }
            } else if self.is_punct("[") {
                self.next();
                let saved = std::mem::replace(&mut self.no_in, false);
                let prop = self.parse_expression();
                self.no_in = saved;
                let prop = prop?;
                self.expect_punct("]")?;
                expr = self.spanned(
                    start,
                    ExprKind::Member {
                        object: Box::new(expr),
                        prop: MemberProp::Computed(Box::new(prop)),
                        optional: false,
                    },
                );
            } else if self.is_punct("!") && !self.peek().nl_before && !self.is_punct_at(1, "=") {
                // non-null assertion
                let span = self.next().span;
                self.erase(span.start, span.end);
            } else if !no_call && self.is_punct("(") {
                let args = self.parse_args()?;
                expr = self.spanned(
                    start,
                    ExprKind::Call {
                        callee: Box::new(expr),
                        args,
                        optional: false,
                    },
                );
            } else if !no_call && self.try_type_arguments() {
                continue;
            } else if matches!(self.peek().tok, Tok::Template { .. }) && !self.peek().nl_before {
                return Err(SyntaxError::new("Tagged templates are not supported", self.peek().span));
            } else {
                break;
            }
        }
        if chained {
            expr = self.spanned(start, ExprKind::OptionalChain(Box::new(expr)));
        }
        Ok(expr)
    }

    fn member_name(&mut self) -> PResult<MemberProp> {
        let token = self.next();
        match token.tok {
            Tok::Ident(name) => Ok(MemberProp::Name(Rc::from(name.as_str()))),
            Tok::Punct("#") => match self.next().tok {
                Tok::Ident(name) => Ok(MemberProp::Name(Rc::from(format!("#{}", name).as_str()))),
                _ => Err(SyntaxError::new("Invalid private name", token.span)),
            },
            _ => Err(SyntaxError::new(format!("Unexpected token '{}'", token.tok), token.span)),
        }
    }

    fn parse_new(&mut self) -> PResult<Expr> {
        let start = self.next().span;
        if self.is_punct(".") {
            return Err(SyntaxError::new("new.target is not supported", self.peek().span));
        }
        let callee = if self.is_ident("new") {
            self.nested(Self::parse_new)?
        } else {
            let mut callee = self.parse_primary()?;
            loop {
                if self.eat_punct(".") {
                    let prop = self.member_name()?;
                    callee = self.spanned(
                        start,
                        ExprKind::Member {
                            object: Box::new(callee),
                            prop,
                            optional: false,
                        },
                    );
                } else if self.eat_punct("[") {
                    let prop = self.parse_expression()?;
                    self.expect_punct("]")?;
                    callee = self.spanned(
                        start,
                        ExprKind::Member {
                            object: Box::new(callee),
                            prop: MemberProp::Computed(Box::new(prop)),
                            optional: false,
                        },
                    );
                } else {
                    break;
                }
            }
            callee
        };
        self.try_type_arguments();
        let args = if self.is_punct("(") {
            self.parse_args()?
        } else {
            Vec::new()
        };
        Ok(self.spanned(
            start,
            ExprKind::New {
                callee: Box::new(callee),
                args,
            },
        ))
    }

    fn parse_template(&mut self, quasis: Vec<String>, ranges: Vec<(usize, usize)>, span: Span) -> PResult<Expr> {
        let mut exprs = Vec::new();
        for (start, end) in ranges {
            let (line, col) = position_of(self.src, start);
            let tokens = Lexer::with_origin(self.src, start, line, col).tokenize(end)?;
            let saved_tokens = std::mem::replace(&mut self.tokens, tokens);
            let saved_pos = std::mem::replace(&mut self.pos, 0);
            let saved_end = self.last_end;
            let expr = self.parse_expression().and_then(|e| {
                if self.at_eof() {
                    Ok(e)
                } else {
                    Err(self.unexpected())
                }
            });
            self.tokens = saved_tokens;
            self.pos = saved_pos;
            self.last_end = saved_end;
            exprs.push(expr?);
        }
        Ok(Expr {
            kind: ExprKind::Template {
                quasis: quasis.into_iter().map(|q| Rc::from(q.as_str())).collect(),
                exprs,
            },
            span,
        })
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        let token = self.peek().clone();
        let start = token.span;
        match token.tok {
            Tok::Num(n) => {
                self.next();
                Ok(self.spanned(start, ExprKind::Number(n)))
            }
            Tok::Str(s) => {
                self.next();
                Ok(self.spanned(start, ExprKind::Str(Rc::from(s.as_str()))))
            }
            Tok::Template { quasis, exprs } => {
                self.next();
                self.parse_template(quasis, exprs, start)
            }
            Tok::Punct("(") => {
                self.next();
                let saved = std::mem::replace(&mut self.no_in, false);
                let expr = self.parse_expression();
                self.no_in = saved;
                let expr = expr?;
                self.expect_punct(")")?;
                Ok(expr)
            }
            Tok::Punct("[") => {
                self.next();
                let mut items = Vec::new();
                while !self.is_punct("]") {
                    if self.eat_punct(",") {
                        items.push(ArrayItem::Hole);
                        continue;
                    }
                    if self.eat_punct("...") {
                        items.push(ArrayItem::Spread(self.parse_assignment()?));
                    } else {
                        items.push(ArrayItem::Item(self.parse_assignment()?));
                    }
                    if !self.eat_punct(",") {
                        break;
                    }
                }
                self.expect_punct("]")?;
                Ok(self.spanned(start, ExprKind::Array(items)))
            }
            Tok::Punct("{") => self.parse_object_literal(),
            Tok::Punct("/") | Tok::Punct("/=") => Err(SyntaxError::new(
                "Regular expression literals are not supported",
                start,
            )),
            Tok::Ident(name) => match name.as_str() {
                "true" | "false" => {
                    self.next();
                    Ok(self.spanned(start, ExprKind::Bool(name == "true")))
                }
                "null" => {
                    self.next();
                    Ok(self.spanned(start, ExprKind::Null))
                }
                "this" => {
                    self.next();
                    Ok(self.spanned(start, ExprKind::This))
                }
                "function" => {
                    self.next();
                    self.parse_function_expression(false, start)
                }
                "async" if self.ident_at(1) == Some("function") && !self.peek_at(1).nl_before => {
                    self.next();
                    self.next();
                    self.parse_function_expression(true, start)
                }
                "class" => {
                    let class = self.parse_class(true)?;
                    Ok(self.spanned(start, ExprKind::Class(class)))
                }
                "super" => {
                    self.next();
                    if self.is_punct("(") {
                        let args = self.parse_args()?;
                        Ok(self.spanned(start, ExprKind::SuperCall(args)))
                    } else if self.eat_punct(".") {
                        let prop = self.member_name()?;
                        Ok(self.spanned(start, ExprKind::SuperMember(prop)))
                    } else if self.eat_punct("[") {
                        let prop = self.parse_expression()?;
                        self.expect_punct("]")?;
                        Ok(self.spanned(start, ExprKind::SuperMember(MemberProp::Computed(Box::new(prop)))))
                    } else {
                        Err(SyntaxError::new("'super' keyword unexpected here", start))
                    }
                }
                "new" => self.parse_new(),
                _ => {
                    let (name, _) = self.binding_name()?;
                    Ok(self.spanned(start, ExprKind::Ident(name)))
                }
            },
            _ => Err(self.unexpected()),
        }
    }

    fn parse_function_expression(&mut self, is_async: bool, start: Span) -> PResult<Expr> {
        if self.is_punct("*") {
            return Err(SyntaxError::new("Generator functions are not supported", self.peek().span));
        }
        let name = match &self.peek().tok {
            Tok::Ident(_) => Some(self.binding_name()?.0),
            _ => None,
        };
        let function = self
            .parse_function_rest(name, is_async, start, false)?
            .ok_or_else(|| SyntaxError::new("Function body expected", self.peek().span))?;
        Ok(self.spanned(start, ExprKind::Function(function)))
    }

    fn parse_object_literal(&mut self) -> PResult<Expr> {
        let start = self.next().span;
        let saved = std::mem::replace(&mut self.no_in, false);
        let result = self.parse_object_props();
        self.no_in = saved;
        let props = result?;
        Ok(self.spanned(start, ExprKind::Object(props)))
    }

    fn parse_object_props(&mut self) -> PResult<Vec<PropDef>> {
        let mut props = Vec::new();
        while !self.is_punct("}") {
            if self.eat_punct("...") {
                props.push(PropDef::Spread(self.parse_assignment()?));
            } else {
                let token = self.peek().clone();
                let next_is_key = !matches!(self.peek_at(1).tok, Tok::Punct("(" | ":" | "," | "}" | "=" | "<"));
                let is_async = self.is_ident("async") && next_is_key && !self.peek_at(1).nl_before;
                if (self.is_ident("get") || self.is_ident("set")) && next_is_key {
                    return Err(SyntaxError::new("Getters and setters are not supported", token.span));
                }
                if self.is_punct("*") {
                    return Err(SyntaxError::new("Generator methods are not supported", token.span));
                }
                if is_async {
                    self.next();
                }
                let key_token = self.peek().clone();
                let key = self.parse_prop_key()?;
                if self.is_punct("(") || self.is_punct("<") {
                    let name = match &key {
                        PropKey::Name(name) => Some(name.clone()),
                        PropKey::Computed(_) => None,
                    };
                    let function = self
                        .parse_function_rest(name, is_async, token.span, false)?
                        .ok_or_else(|| SyntaxError::new("Function body expected", self.peek().span))?;
                    props.push(PropDef::Method(key, function));
                } else if self.eat_punct(":") {
                    props.push(PropDef::KeyValue(key, self.parse_assignment()?));
                } else {
                    match (key, &key_token.tok) {
                        (PropKey::Name(name), Tok::Ident(_)) if !RESERVED.contains(&&*name) => {
                            if self.is_punct("=") {
                                // `{ a = 1 } = obj` cover grammar
                                self.next();
                                let value = self.parse_assignment()?;
                                let span = key_token.span;
                                props.push(PropDef::KeyValue(
                                    PropKey::Name(name.clone()),
                                    Expr {
                                        span,
                                        kind: ExprKind::Assign {
                                            op: None,
                                            target: Box::new(Pattern::Ident(name, span)),
                                            value: Box::new(value),
                                        },
                                    },
                                ));
                            } else {
                                props.push(PropDef::Shorthand(name, key_token.span));
                            }
                        }
                        _ => return Err(self.unexpected()),
                    }
                }
            }
            if !self.eat_punct(",") {
                break;
            }
        }
        self.expect_punct("}")?;
        Ok(props)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn statements(src: &str) -> Vec<Stmt> {
        let mut parser = Parser::new(src).unwrap();
        let mut body = Vec::new();
        while !parser.at_eof() {
            body.push(parser.parse_statement().unwrap());
        }
        body
    }

    fn erased_text(src: &str) -> Vec<String> {
        let program = parse_program(src).unwrap();
        program
            .erased
            .iter()
            .map(|&(s, e)| src[s..e].to_string())
            .collect()
    }

    #[test]
    fn test_parameter_and_return_annotations() {
        let erased = erased_text("function dedupe(arr: number[]): number[] { return arr; }");
        assert_eq!(erased, vec![": number[]", ": number[]"]);
    }

    #[test]
    fn test_arrow_with_types_and_conditional() {
        let erased = erased_text("const f = (a: number, b?: string): boolean => a > 0 ? (b) : c;");
        assert_eq!(erased, vec![": number", "?", ": string", ": boolean"]);
    }

    #[test]
    fn test_generic_call_vs_comparison() {
        assert_eq!(erased_text("const m = new Map<string, number[]>();"), vec!["<string, number[]>"]);
        assert!(erased_text("if (a < b && c > (d)) {}").is_empty());
        assert_eq!(erased_text("const x = id<number>(1);"), vec!["<number>"]);
    }

    #[test]
    fn test_nested_generic_closers() {
        let erased = erased_text("let x: Array<Array<number>> = [];");
        assert_eq!(erased, vec![": Array<Array<number>>"]);
    }

    #[test]
    fn test_interface_and_type_alias_are_erased_whole() {
        let src = "interface P { x: number }\ntype T = { a: string } | null;\nconst a = 1;";
        let erased = erased_text(src);
        assert_eq!(erased[0], "interface P { x: number }");
        assert_eq!(erased[1], "type T = { a: string } | null;");
    }

    #[test]
    fn test_class_modifiers() {
        let src = "class A implements B { private readonly x: number = 1; constructor(public y: string) { } }";
        let erased = erased_text(src);
        assert!(erased.contains(&"implements B".to_string()));
        assert!(erased.contains(&"private".to_string()));
        assert!(erased.contains(&"readonly".to_string()));
        assert!(erased.contains(&"public".to_string()));
    }

    #[test]
    fn test_as_assertion_and_non_null() {
        let erased = erased_text("const n = (value as number) + map.get(k)!;");
        assert_eq!(erased, vec!["as number", "!"]);
    }

    #[test]
    fn test_candidate_leading_expression_is_returned() {
        let body = parse_candidate("function f(x) { return g(x); }\nfunction g(y) { return y; }").unwrap();
        assert_eq!(body.len(), 2);
        assert!(matches!(body[0].kind, StmtKind::Return(Some(_))));
        assert!(matches!(body[1].kind, StmtKind::Function(_)));
    }

    #[test]
    fn test_await_outside_async_is_rejected() {
        let err = parse_program("function f() { await g(); }").unwrap_err();
        assert!(err.message.contains("await is only valid"));
    }

    #[test]
    fn test_error_position() {
        let err = parse_program("let a = 1;\nlet b = ;").unwrap_err();
        assert_eq!((err.span.line, err.span.col), (2, 9));
    }

    #[test]
    fn test_object_shorthand_and_default_cover_grammar() {
        let body = statements("({ a, b = 1 } = obj);");
        match &body[0].kind {
            StmtKind::Expr(Expr { kind: ExprKind::Assign { target, .. }, .. }) => {
                assert!(matches!(&**target, Pattern::Object { props, .. } if props.len() == 2));
            }
            other => panic!("unexpected statement {:?}", other),
        }
        assert!(parse_expression_source("({ if })").is_err());
    }

    #[test]
    fn test_destructuring_assignment_swap() {
        let body = statements("[a, b] = [b, a];");
        match &body[0].kind {
            StmtKind::Expr(Expr { kind: ExprKind::Assign { target, .. }, .. }) => {
                assert!(matches!(**target, Pattern::Array { .. }));
            }
            other => panic!("unexpected statement {:?}", other),
        }
    }

    #[test]
    fn test_shift_operators_glue() {
        let body = statements("x = a >> 1; y = b >>> 2; z >>= 1; w = c >= d;");
        assert_eq!(body.len(), 4);
    }

    #[test]
    fn test_nesting_limit_is_a_syntax_error() {
        let deep = format!("{}1{}", "(".repeat(MAX_NESTING + 10), ")".repeat(MAX_NESTING + 10));
        let err = on_parse_stack(|| parse_expression_source(&deep).map(|_| ())).unwrap_err();
        assert_eq!(err.message, "Nesting too deep");

        let blocks = format!("() => {{ {} }}", "{".repeat(5_000) + &"}".repeat(5_000));
        assert_eq!(check_candidate(&blocks).unwrap_err().message, "Nesting too deep");

        let prefixes = format!("() => {}x", "!".repeat(5_000));
        assert_eq!(check_candidate(&prefixes).unwrap_err().message, "Nesting too deep");

        let shallow = format!("() => {}1{}", "(".repeat(200), ")".repeat(200));
        assert!(check_candidate(&shallow).is_ok());
    }

    #[test]
    fn test_nested_templates_are_bounded() {
        let deep = "`${".repeat(MAX_NESTING + 1) + "1" + &"}`".repeat(MAX_NESTING + 1);
        assert_eq!(check_candidate(&deep).unwrap_err().message, "Nesting too deep");
    }
}
