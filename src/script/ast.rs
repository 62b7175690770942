use std::rc::Rc;

use super::lexer::Span;

pub type Name = Rc<str>;

#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Number(f64),
    Str(Name),
    Template { quasis: Vec<Name>, exprs: Vec<Expr> },
    Bool(bool),
    Null,
    Ident(Name),
    This,
    Array(Vec<ArrayItem>),
    Object(Vec<PropDef>),
    Function(Rc<Function>),
    Class(Rc<Class>),
    Unary(UnaryOp, Box<Expr>),
    Update { increment: bool, prefix: bool, target: Box<Expr> },
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Logical(LogicalOp, Box<Expr>, Box<Expr>),
    Assign { op: Option<AssignOp>, target: Box<Pattern>, value: Box<Expr> },
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
    Call { callee: Box<Expr>, args: Vec<ArrayItem>, optional: bool },
    New { callee: Box<Expr>, args: Vec<ArrayItem> },
    Member { object: Box<Expr>, prop: MemberProp, optional: bool },
    /// Boundary of an `a?.b.c` chain; a nullish link short-circuits to here.
    OptionalChain(Box<Expr>),
    SuperCall(Vec<ArrayItem>),
    SuperMember(MemberProp),
    Sequence(Vec<Expr>),
    Await(Box<Expr>),
}

#[derive(Debug, Clone)]
pub enum MemberProp {
    Name(Name),
    Computed(Box<Expr>),
}

#[derive(Debug, Clone)]
pub enum ArrayItem {
    Item(Expr),
    Spread(Expr),
    Hole,
}

#[derive(Debug, Clone)]
pub enum PropKey {
    Name(Name),
    Computed(Box<Expr>),
}

#[derive(Debug, Clone)]
pub enum PropDef {
    KeyValue(PropKey, Expr),
    Shorthand(Name, Span),
    Spread(Expr),
    Method(PropKey, Rc<Function>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Plus,
    Not,
    BitNot,
    TypeOf,
    Void,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Exp,
    Eq,
    NotEq,
    StrictEq,
    StrictNotEq,
    Lt,
    Gt,
    LtEq,
    GtEq,
    Shl,
    Shr,
    UShr,
    BitAnd,
    BitOr,
    BitXor,
    In,
    InstanceOf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
    Nullish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Arith(BinOp),
    Logical(LogicalOp),
}

/// Binding or assignment target.
#[derive(Debug, Clone)]
pub enum Pattern {
    Ident(Name, Span),
    Array { items: Vec<Option<PatternItem>>, rest: Option<Box<Pattern>> },
    Object { props: Vec<PatternProp>, rest: Option<Box<Pattern>> },
    /// Member expression target, only valid in assignments.
    Member(Box<Expr>),
}

#[derive(Debug, Clone)]
pub struct PatternItem {
    pub target: Pattern,
    pub default: Option<Expr>,
}

#[derive(Debug, Clone)]
pub struct PatternProp {
    pub key: PropKey,
    pub target: Pattern,
    pub default: Option<Expr>,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub pattern: Pattern,
    pub default: Option<Expr>,
    pub rest: bool,
}

#[derive(Debug, Clone)]
pub enum FunctionBody {
    Block(Vec<Stmt>),
    Expr(Box<Expr>),
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: Option<Name>,
    pub params: Vec<Param>,
    pub body: FunctionBody,
    pub is_async: bool,
    pub is_arrow: bool,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct Class {
    pub name: Option<Name>,
    pub superclass: Option<Expr>,
    pub constructor: Option<Rc<Function>>,
    pub members: Vec<ClassMember>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct ClassMember {
    pub is_static: bool,
    pub key: PropKey,
    pub kind: ClassMemberKind,
}

#[derive(Debug, Clone)]
pub enum ClassMemberKind {
    Method(Rc<Function>),
    Field(Option<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclKind {
    Var,
    Let,
    Const,
}

#[derive(Debug, Clone)]
pub struct VarDecl {
    pub kind: DeclKind,
    pub decls: Vec<(Pattern, Option<Expr>)>,
}

#[derive(Debug, Clone)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum ForInit {
    Var(VarDecl),
    Expr(Expr),
}

/// Left side of `for (x of ...)` / `for (x in ...)`.
#[derive(Debug, Clone)]
pub enum ForHead {
    Decl(DeclKind, Pattern),
    Target(Pattern),
}

#[derive(Debug, Clone)]
pub struct SwitchCase {
    pub test: Option<Expr>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone)]
pub struct CatchClause {
    pub param: Option<Pattern>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    Expr(Expr),
    Var(VarDecl),
    Function(Rc<Function>),
    Class(Rc<Class>),
    Return(Option<Expr>),
    If(Expr, Box<Stmt>, Option<Box<Stmt>>),
    Block(Vec<Stmt>),
    For {
        init: Option<ForInit>,
        test: Option<Expr>,
        update: Option<Expr>,
        body: Box<Stmt>,
    },
    ForOf(ForHead, Expr, Box<Stmt>),
    ForIn(ForHead, Expr, Box<Stmt>),
    While(Expr, Box<Stmt>),
    DoWhile(Box<Stmt>, Expr),
    Break(Option<Name>),
    Continue(Option<Name>),
    Throw(Expr),
    Try {
        block: Vec<Stmt>,
        handler: Option<CatchClause>,
        finalizer: Option<Vec<Stmt>>,
    },
    Switch(Expr, Vec<SwitchCase>),
    Labeled(Name, Box<Stmt>),
    Empty,
}

impl Pattern {
    /// Every identifier this pattern binds, in source order.
    pub fn bound_names(&self, out: &mut Vec<Name>) {
        match self {
            Pattern::Ident(name, _) => out.push(name.clone()),
            Pattern::Array { items, rest } => {
                for item in items.iter().flatten() {
                    item.target.bound_names(out);
                }
                if let Some(rest) = rest {
                    rest.bound_names(out);
                }
            }
            Pattern::Object { props, rest } => {
                for prop in props {
                    prop.target.bound_names(out);
                }
                if let Some(rest) = rest {
                    rest.bound_names(out);
                }
            }
            Pattern::Member(_) => {}
        }
    }
}
