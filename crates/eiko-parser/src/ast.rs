//! Abstract syntax tree for Eiko source.

use eiko_foundation::Span;

/// A parsed source file.
#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub statements: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

impl Stmt {
    pub fn new(kind: StmtKind, span: Span) -> Self {
        Self { kind, span }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    /// `import a.b.c [as name]`
    Import {
        path: Vec<String>,
        alias: Option<String>,
    },
    /// `from [.]a.b import c [as d], e`
    FromImport {
        /// Leading dots; non-zero means a relative import.
        dots: usize,
        path: Vec<String>,
        names: Vec<(String, Option<String>)>,
    },
    /// `target [: type] = value`
    Assign {
        target: AssignTarget,
        annotation: Option<TypeExpr>,
        value: Expr,
    },
    /// `name: type` — forward declaration, assignable exactly once later.
    Declare { name: String, annotation: TypeExpr },
    If(IfStmt),
    For {
        var: String,
        iterable: Expr,
        body: Vec<Stmt>,
    },
    ResourceDef(ResourceDecl),
    TypedefDef(TypedefDecl),
    EnumDef(EnumDecl),
    ExprStmt(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum AssignTarget {
    Name(String),
    /// `object.name = ...`; only legal for `self` inside constructors.
    Attr { object: Expr, name: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfStmt {
    pub condition: Expr,
    pub body: Vec<Stmt>,
    /// `elif` chains are nested single-`If` else bodies.
    pub orelse: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDecl {
    pub name: String,
    /// `resource Derived(Base):`
    pub parent: Option<TypeExpr>,
    pub decorators: Vec<Decorator>,
    pub properties: Vec<PropertyDecl>,
    pub constructors: Vec<ConstructorDecl>,
    /// Body was `...`: inherit the parent schema unchanged.
    pub inherit_only: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropertyDecl {
    pub name: String,
    pub ty: TypeExpr,
    pub default: Option<Expr>,
    /// Declared with the `promise` keyword marker.
    pub promise: bool,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConstructorDecl {
    /// `__init__` for `def __init__`, otherwise the `implement` name.
    pub name: String,
    pub params: Vec<Param>,
    pub body: Vec<Stmt>,
    /// `@constraint(expr)` decorator, if any.
    pub constraint: Option<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub ty: Option<TypeExpr>,
    pub default: Option<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decorator {
    pub name: String,
    pub args: Vec<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypedefDecl {
    pub name: String,
    pub base: TypeExpr,
    /// `typedef Name base if <condition>`, with `self` bound to the
    /// candidate value during coercion.
    pub condition: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumDecl {
    pub name: String,
    pub members: Vec<String>,
}

/// Type annotations use a dedicated mini-grammar so value expressions can
/// never be mistaken for types.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeExpr {
    pub kind: TypeExprKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeExprKind {
    /// Dotted name: `int`, `std.Host`.
    Name(Vec<String>),
    /// `Optional[T]`, `Union[A, B]`, `list[T]`, `dict[K, V]`.
    Generic {
        name: Vec<String>,
        args: Vec<TypeExpr>,
    },
}

impl TypeExpr {
    /// Render the annotation the way it was written, for diagnostics.
    pub fn display_name(&self) -> String {
        match &self.kind {
            TypeExprKind::Name(path) => path.join("."),
            TypeExprKind::Generic { name, args } => {
                let args: Vec<String> = args.iter().map(TypeExpr::display_name).collect();
                format!("{}[{}]", name.join("."), args.join(", "))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    None,
    /// Alternating literal and embedded-expression parts.
    FString(Vec<FStringPart>),
    Ident(String),
    SelfRef,
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// `object[index]`
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    /// `object.name`
    Attr {
        object: Box<Expr>,
        name: String,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<CallArg>,
    },
    List(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum FStringPart {
    Lit(String),
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallArg {
    pub name: Option<String>,
    pub value: Expr,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    IntDiv,
    Pow,
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// Membership test: `x in container`.
    In,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::IntDiv => "//",
            BinaryOp::Pow => "**",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::In => "in",
        }
    }
}
