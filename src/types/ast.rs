//! The abstract syntax tree produced by the parser.
//!
//! Expression nodes carry slots filled in by later frontend stages: the
//! semantic analyzer writes the checked type into `ty`, and the constant
//! evaluator writes folded integer values into `val`.

use crate::Symbol;
use super::Spanned;
use super::ty::Ty;

/// A parsed type annotation, resolved to a [`Ty`] by the analyzer.
#[derive(Clone, Debug)]
pub enum TypeSpec {
  /// `void`.
  Void,
  /// `int`.
  Int,
  /// `unsigned int`.
  UInt,
  /// `char`.
  Char,
  /// `unsigned char`.
  UChar,
  /// A struct type, `struct name`.
  Struct(Symbol),
  /// A name introduced by a type alias.
  Named(Symbol),
  /// A pointer, `T*`.
  Ptr(Box<TypeSpec>),
  /// `const T`.
  Const(Box<TypeSpec>),
}

/// A top-level item.
pub type Item = Spanned<ItemKind>;

/// The kinds of top-level items.
#[derive(Clone, Debug)]
pub enum ItemKind {
  /// A variable declaration line, possibly defining several variables.
  VarDecl(VarDecl),
  /// A function definition or declaration.
  Func(FuncDef),
  /// A struct definition.
  StructDef {
    /// The struct's name.
    name: Symbol,
    /// Fields as `(type, name, array dims)`.
    fields: Vec<(TypeSpec, Symbol, Vec<Expr>)>,
  },
  /// An enum definition; elements without initializers continue counting.
  EnumDef {
    /// The optional enum tag.
    name: Option<Symbol>,
    /// The enumerators.
    elems: Vec<(Symbol, Option<Expr>)>,
  },
  /// `typedef T name;`
  TypeAlias {
    /// The introduced name.
    name: Symbol,
    /// The aliased type.
    ty: TypeSpec,
  },
}

/// One variable declaration line.
#[derive(Clone, Debug)]
pub struct VarDecl {
  /// The declared base type.
  pub base: TypeSpec,
  /// The individual definitions.
  pub defs: Vec<Spanned<VarDef>>,
  /// Whether the line was declared `static`.
  pub is_static: bool,
}

/// A single defined variable.
#[derive(Clone, Debug)]
pub struct VarDef {
  /// The variable name.
  pub name: Symbol,
  /// The number of `*`s on this declarator.
  pub stars: u32,
  /// Array dimensions, outermost first.
  pub dims: Vec<Expr>,
  /// The initializer, if present.
  pub init: Option<Init>,
  /// The resolved type, written by the analyzer.
  pub ty: Option<Ty>,
}

/// An initializer: a single expression or a braced list.
#[derive(Clone, Debug)]
pub enum Init {
  /// `= expr`
  Expr(Expr),
  /// `= { ... }`
  List(Vec<Init>),
}

/// A function definition or declaration.
#[derive(Clone, Debug)]
pub struct FuncDef {
  /// The return type annotation.
  pub ret: TypeSpec,
  /// The function name.
  pub name: Symbol,
  /// Parameters as `(type, name, is_array)`; array parameters decay.
  pub params: Vec<(TypeSpec, Symbol, bool)>,
  /// The body; `None` for a declaration.
  pub body: Option<Vec<Stmt>>,
  /// `static` functions get internal linkage.
  pub is_static: bool,
  /// `inline` functions get inline linkage.
  pub is_inline: bool,
  /// The resolved function type, written by the analyzer.
  pub ty: Option<Ty>,
}

/// A statement.
pub type Stmt = Spanned<StmtKind>;

/// The kinds of statements.
#[derive(Clone, Debug)]
pub enum StmtKind {
  /// A local variable declaration.
  Decl(VarDecl),
  /// An expression evaluated for effect.
  Expr(Expr),
  /// A braced block with its own scope.
  Block(Vec<Stmt>),
  /// `if (cond) then else els`
  If {
    /// The controlling expression.
    cond: Expr,
    /// The then-branch.
    then: Box<Stmt>,
    /// The optional else-branch.
    els: Option<Box<Stmt>>,
  },
  /// `while (cond) body`
  While {
    /// The controlling expression.
    cond: Expr,
    /// The loop body.
    body: Box<Stmt>,
  },
  /// `break;`
  Break,
  /// `continue;`
  Continue,
  /// `return expr?;`
  Return(Option<Expr>),
  /// `;`
  Empty,
}

/// Binary operators at the source level. Compound assignments are desugared
/// by the parser.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum BinaryOp {
  Assign,
  Add, Sub, Mul, Div, Mod,
  BitAnd, BitOr, BitXor, Shl, Shr,
  LAnd, LOr,
  Eq, Ne, Lt, Le, Gt, Ge,
}

/// Unary operators at the source level.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UnaryOp {
  /// `-x`
  Neg,
  /// `!x`
  LNot,
  /// `~x`
  Not,
  /// `*x`
  Deref,
  /// `&x`
  Addr,
}

/// An expression with its source position and analysis slots.
#[derive(Clone, Debug)]
pub struct Expr {
  /// The source position.
  pub span: super::Span,
  /// The expression itself.
  pub kind: ExprKind,
  /// The checked type, written by the analyzer.
  pub ty: Option<Ty>,
  /// The folded constant value, written by the evaluator.
  pub val: Option<u32>,
}

impl Expr {
  /// Wrap an expression kind with empty analysis slots.
  #[must_use] pub fn new(span: super::Span, kind: ExprKind) -> Expr {
    Expr { span, kind, ty: None, val: None }
  }

  /// The checked type. Panics before semantic analysis.
  #[must_use] pub fn ty(&self) -> &Ty { self.ty.as_ref().expect("expression not analyzed") }
}

/// The kinds of expressions.
#[derive(Clone, Debug)]
pub enum ExprKind {
  /// An integer literal.
  Int(u32),
  /// A string literal.
  Str(Symbol),
  /// An identifier reference.
  Id(Symbol),
  /// A binary operation.
  Binary {
    /// The operator.
    op: BinaryOp,
    /// Left operand.
    lhs: Box<Expr>,
    /// Right operand.
    rhs: Box<Expr>,
  },
  /// A unary operation.
  Unary {
    /// The operator.
    op: UnaryOp,
    /// The operand.
    arg: Box<Expr>,
  },
  /// `(T)x`
  Cast {
    /// The target type annotation.
    ty: TypeSpec,
    /// The operand.
    arg: Box<Expr>,
  },
  /// A function call.
  Call {
    /// The called function name.
    callee: Symbol,
    /// The arguments.
    args: Vec<Expr>,
  },
  /// `base[index]`
  Index {
    /// The indexed array or pointer.
    base: Box<Expr>,
    /// The index.
    index: Box<Expr>,
  },
  /// `base.field` or `base->field`
  Member {
    /// The accessed aggregate.
    base: Box<Expr>,
    /// The field name.
    field: Symbol,
    /// `true` for `->`.
    arrow: bool,
  },
}
