//! The recursive-descent parser.
//!
//! Produces [`Item`]s until the input runs out. Errors are reported through
//! the diagnostics module; the parser then skips to the next statement or
//! item boundary and keeps going, so one bad construct does not hide later
//! ones. Typedef names are tracked in a side table so declaration statements
//! can be told apart from expression statements.

use std::collections::HashSet;
use crate::Symbol;
use crate::logger::Logger;
use crate::types::{Span, Spanned};
use crate::types::ast::{
  BinaryOp, Expr, ExprKind, FuncDef, Init, Item, ItemKind, Stmt, StmtKind,
  TypeSpec, UnaryOp, VarDecl, VarDef,
};
use super::lexer::{Keyword, Lexer, Op, Token};

/// Parser state over one token stream.
#[derive(Debug)]
pub struct Parser {
  file: Symbol,
  lexer: Lexer,
  cur: Token,
  span: Span,
  /// A single token of buffered lookahead past `cur`.
  pushback: Option<(Span, Token)>,
  typedefs: HashSet<Symbol>,
}

impl Parser {
  /// Create a parser over `src`.
  #[must_use] pub fn new(file: Symbol, src: &str) -> Self {
    let mut lexer = Lexer::new(file, src);
    let (span, cur) = lexer.next_token();
    Parser { file, lexer, cur, span, pushback: None, typedefs: HashSet::new() }
  }

  fn logger(&self) -> Logger { Logger::new(self.file, self.span) }

  fn bump(&mut self) -> Token {
    let (span, next) = match self.pushback.take() {
      Some(buffered) => buffered,
      None => self.lexer.next_token(),
    };
    self.span = span;
    std::mem::replace(&mut self.cur, next)
  }

  /// The token after `cur`, without consuming anything.
  fn peek_second(&mut self) -> Token {
    if let Some((_, t)) = &self.pushback { return t.clone() }
    let (span, tok) = self.lexer.next_token();
    self.pushback = Some((span, tok.clone()));
    tok
  }

  fn eat_op(&mut self, op: Op) -> bool {
    if self.cur == Token::Op(op) {
      self.bump();
      true
    } else { false }
  }

  fn expect_op(&mut self, op: Op) -> Option<()> {
    if self.eat_op(op) { return Some(()) }
    self.logger().error(format_args!("expected '{op:?}'"));
    None
  }

  fn expect_id(&mut self) -> Option<Symbol> {
    if let Token::Id(name) = self.cur {
      self.bump();
      return Some(name)
    }
    self.logger().error("expected identifier");
    None
  }

  /// Skip tokens until just past a `;` or to a closing `}` / end of input,
  /// for error recovery.
  fn sync(&mut self) {
    loop {
      match &self.cur {
        Token::Eof | Token::Op(Op::RBrace) => return,
        Token::Op(Op::Semi) => {
          self.bump();
          return
        }
        _ => { self.bump(); }
      }
    }
  }

  /// Does `tok` start a type?
  fn starts_type(&self, tok: &Token) -> bool {
    match tok {
      Token::Keyword(
        Keyword::Void | Keyword::Int | Keyword::Char | Keyword::Unsigned |
        Keyword::Const | Keyword::Struct
      ) => true,
      Token::Id(name) => self.typedefs.contains(name),
      _ => false,
    }
  }

  /// Does the current token start a type?
  fn at_type(&self) -> bool {
    let cur = self.cur.clone();
    self.starts_type(&cur)
  }

  /// Parse the whole translation unit.
  pub fn parse_program(&mut self) -> Vec<Item> {
    let mut items = Vec::new();
    while self.cur != Token::Eof {
      match self.parse_item() {
        Some(item) => items.push(item),
        None => self.sync(),
      }
    }
    items
  }

  fn parse_item(&mut self) -> Option<Item> {
    let span = self.span;
    let mut is_static = false;
    let mut is_inline = false;
    loop {
      match self.cur {
        Token::Keyword(Keyword::Static) => { is_static = true; self.bump(); }
        Token::Keyword(Keyword::Inline) => { is_inline = true; self.bump(); }
        _ => break,
      }
    }
    match self.cur {
      Token::Keyword(Keyword::Typedef) => {
        self.bump();
        let ty = self.parse_type()?;
        let name = self.expect_id()?;
        self.expect_op(Op::Semi)?;
        self.typedefs.insert(name);
        return Some(Spanned { span, k: ItemKind::TypeAlias { name, ty } })
      }
      Token::Keyword(Keyword::Enum) => return self.parse_enum(span),
      // `struct S { ... };` is a definition; `struct S x;` declares a
      // variable. parse_struct_def disambiguates after `struct S`.
      Token::Keyword(Keyword::Struct) => return self.parse_struct_def(span, is_static),
      _ => {}
    }
    let base = self.parse_type()?;
    let stars = self.count_stars();
    let name = self.expect_id()?;
    if self.cur == Token::Op(Op::LParen) {
      return self.parse_func(span, apply_stars(base, stars), name, is_static, is_inline)
    }
    let decl = self.parse_var_decl(span, base, stars, name, is_static)?;
    Some(Spanned { span, k: ItemKind::VarDecl(decl) })
  }

  fn parse_struct_def(&mut self, span: Span, is_static: bool) -> Option<Item> {
    self.bump(); // struct
    let name = self.expect_id()?;
    if !self.eat_op(Op::LBrace) {
      // actually a variable (or function) declaration of a struct type
      let stars = self.count_stars();
      let vname = self.expect_id()?;
      if self.cur == Token::Op(Op::LParen) {
        return self.parse_func(span, apply_stars(TypeSpec::Struct(name), stars),
          vname, is_static, false)
      }
      let decl = self.parse_var_decl(span, TypeSpec::Struct(name), stars, vname, is_static)?;
      return Some(Spanned { span, k: ItemKind::VarDecl(decl) })
    }
    let mut fields = Vec::new();
    while !self.eat_op(Op::RBrace) {
      let base = self.parse_type()?;
      loop {
        let stars = self.count_stars();
        let fname = self.expect_id()?;
        let dims = self.parse_dims()?;
        fields.push((apply_stars(base.clone(), stars), fname, dims));
        if !self.eat_op(Op::Comma) { break }
      }
      self.expect_op(Op::Semi)?;
    }
    self.expect_op(Op::Semi)?;
    Some(Spanned { span, k: ItemKind::StructDef { name, fields } })
  }

  fn parse_enum(&mut self, span: Span) -> Option<Item> {
    self.bump(); // enum
    let name = if let Token::Id(n) = self.cur {
      self.bump();
      Some(n)
    } else { None };
    self.expect_op(Op::LBrace)?;
    let mut elems = Vec::new();
    loop {
      let ename = self.expect_id()?;
      let init = if self.eat_op(Op::Assign) {
        Some(self.parse_expr()?)
      } else { None };
      elems.push((ename, init));
      if !self.eat_op(Op::Comma) { break }
      if self.cur == Token::Op(Op::RBrace) { break }
    }
    self.expect_op(Op::RBrace)?;
    self.expect_op(Op::Semi)?;
    Some(Spanned { span, k: ItemKind::EnumDef { name, elems } })
  }

  fn parse_func(
    &mut self, span: Span, ret: TypeSpec, name: Symbol, is_static: bool, is_inline: bool,
  ) -> Option<Item> {
    self.expect_op(Op::LParen)?;
    let mut params = Vec::new();
    if !self.eat_op(Op::RParen) {
      // `(void)` is an empty parameter list; `(void *p)` is not
      if self.cur == Token::Keyword(Keyword::Void)
        && self.peek_second() == Token::Op(Op::RParen)
      {
        self.bump();
        self.expect_op(Op::RParen)?;
      } else {
        loop {
          let base = self.parse_type()?;
          let stars = self.count_stars();
          let pname = self.expect_id()?;
          // `T p[]` decays to a pointer
          let is_array = if self.eat_op(Op::LBracket) {
            if self.cur != Token::Op(Op::RBracket) {
              // a sized inner dimension is still a pointer parameter
              let _ = self.parse_expr()?;
            }
            self.expect_op(Op::RBracket)?;
            true
          } else { false };
          params.push((apply_stars(base, stars), pname, is_array));
          if !self.eat_op(Op::Comma) { break }
        }
        self.expect_op(Op::RParen)?;
      }
    }
    let body = if self.eat_op(Op::Semi) {
      None
    } else {
      self.expect_op(Op::LBrace)?;
      Some(self.parse_block_body()?)
    };
    Some(Spanned { span, k: ItemKind::Func(FuncDef {
      ret, name, params, body, is_static, is_inline, ty: None,
    }) })
  }

  fn parse_var_decl(
    &mut self, _span: Span, base: TypeSpec, first_stars: u32, first_name: Symbol,
    is_static: bool,
  ) -> Option<VarDecl> {
    let mut defs = Vec::new();
    let mut stars = first_stars;
    let mut name = first_name;
    loop {
      let dspan = self.span;
      let dims = self.parse_dims()?;
      let init = if self.eat_op(Op::Assign) {
        Some(self.parse_init()?)
      } else { None };
      defs.push(Spanned { span: dspan, k: VarDef { name, stars, dims, init, ty: None } });
      if !self.eat_op(Op::Comma) { break }
      stars = self.count_stars();
      name = self.expect_id()?;
    }
    self.expect_op(Op::Semi)?;
    Some(VarDecl { base, defs, is_static })
  }

  fn parse_dims(&mut self) -> Option<Vec<Expr>> {
    let mut dims = Vec::new();
    while self.eat_op(Op::LBracket) {
      dims.push(self.parse_expr()?);
      self.expect_op(Op::RBracket)?;
    }
    Some(dims)
  }

  fn parse_init(&mut self) -> Option<Init> {
    if self.eat_op(Op::LBrace) {
      let mut inits = Vec::new();
      if !self.eat_op(Op::RBrace) {
        loop {
          inits.push(self.parse_init()?);
          if !self.eat_op(Op::Comma) { break }
          if self.cur == Token::Op(Op::RBrace) { break }
        }
        self.expect_op(Op::RBrace)?;
      }
      Some(Init::List(inits))
    } else {
      Some(Init::Expr(self.parse_expr()?))
    }
  }

  fn parse_type(&mut self) -> Option<TypeSpec> {
    if self.eat_kw(Keyword::Const) {
      return Some(TypeSpec::Const(Box::new(self.parse_type()?)))
    }
    let base = match self.bump() {
      Token::Keyword(Keyword::Void) => TypeSpec::Void,
      Token::Keyword(Keyword::Int) => TypeSpec::Int,
      Token::Keyword(Keyword::Char) => TypeSpec::Char,
      Token::Keyword(Keyword::Unsigned) => {
        match self.cur {
          Token::Keyword(Keyword::Int) => { self.bump(); TypeSpec::UInt }
          Token::Keyword(Keyword::Char) => { self.bump(); TypeSpec::UChar }
          _ => TypeSpec::UInt,
        }
      }
      Token::Keyword(Keyword::Struct) => {
        let name = self.expect_id()?;
        TypeSpec::Struct(name)
      }
      Token::Id(name) if self.typedefs.contains(&name) => TypeSpec::Named(name),
      _ => {
        self.logger().error("expected type");
        return None
      }
    };
    Some(base)
  }

  fn eat_kw(&mut self, k: Keyword) -> bool {
    if self.cur == Token::Keyword(k) {
      self.bump();
      true
    } else { false }
  }

  fn count_stars(&mut self) -> u32 {
    let mut n = 0;
    while self.eat_op(Op::Mul) { n += 1 }
    n
  }

  // ------------------------------------------------------------------
  // statements

  fn parse_block_body(&mut self) -> Option<Vec<Stmt>> {
    let mut stmts = Vec::new();
    while !self.eat_op(Op::RBrace) {
      if self.cur == Token::Eof {
        self.logger().error("unexpected end of input in block");
        return None
      }
      match self.parse_stmt() {
        Some(s) => stmts.push(s),
        None => self.sync(),
      }
    }
    Some(stmts)
  }

  fn parse_stmt(&mut self) -> Option<Stmt> {
    let span = self.span;
    let k = match &self.cur {
      Token::Op(Op::Semi) => {
        self.bump();
        StmtKind::Empty
      }
      Token::Op(Op::LBrace) => {
        self.bump();
        StmtKind::Block(self.parse_block_body()?)
      }
      Token::Keyword(Keyword::If) => {
        self.bump();
        self.expect_op(Op::LParen)?;
        let cond = self.parse_expr()?;
        self.expect_op(Op::RParen)?;
        let then = Box::new(self.parse_stmt()?);
        let els = if self.eat_kw(Keyword::Else) {
          Some(Box::new(self.parse_stmt()?))
        } else { None };
        StmtKind::If { cond, then, els }
      }
      Token::Keyword(Keyword::While) => {
        self.bump();
        self.expect_op(Op::LParen)?;
        let cond = self.parse_expr()?;
        self.expect_op(Op::RParen)?;
        let body = Box::new(self.parse_stmt()?);
        StmtKind::While { cond, body }
      }
      Token::Keyword(Keyword::Break) => {
        self.bump();
        self.expect_op(Op::Semi)?;
        StmtKind::Break
      }
      Token::Keyword(Keyword::Continue) => {
        self.bump();
        self.expect_op(Op::Semi)?;
        StmtKind::Continue
      }
      Token::Keyword(Keyword::Return) => {
        self.bump();
        let val = if self.cur == Token::Op(Op::Semi) {
          None
        } else {
          Some(self.parse_expr()?)
        };
        self.expect_op(Op::Semi)?;
        StmtKind::Return(val)
      }
      _ if self.at_type() => {
        let base = self.parse_type()?;
        let stars = self.count_stars();
        let name = self.expect_id()?;
        StmtKind::Decl(self.parse_var_decl(span, base, stars, name, false)?)
      }
      _ => {
        let e = self.parse_expr()?;
        self.expect_op(Op::Semi)?;
        StmtKind::Expr(e)
      }
    };
    Some(Spanned { span, k })
  }

  // ------------------------------------------------------------------
  // expressions, by precedence climbing

  /// Parse a full (assignment) expression.
  pub fn parse_expr(&mut self) -> Option<Expr> {
    let span = self.span;
    let lhs = self.parse_binary(0)?;
    let compound = match self.cur {
      Token::Op(Op::Assign) => None,
      Token::Op(Op::AddAssign) => Some(BinaryOp::Add),
      Token::Op(Op::SubAssign) => Some(BinaryOp::Sub),
      Token::Op(Op::MulAssign) => Some(BinaryOp::Mul),
      Token::Op(Op::DivAssign) => Some(BinaryOp::Div),
      Token::Op(Op::ModAssign) => Some(BinaryOp::Mod),
      Token::Op(Op::AndAssign) => Some(BinaryOp::BitAnd),
      Token::Op(Op::OrAssign) => Some(BinaryOp::BitOr),
      Token::Op(Op::XorAssign) => Some(BinaryOp::BitXor),
      Token::Op(Op::ShlAssign) => Some(BinaryOp::Shl),
      Token::Op(Op::ShrAssign) => Some(BinaryOp::Shr),
      _ => return Some(lhs),
    };
    if self.cur == Token::Op(Op::Assign) && compound.is_none() {
      self.bump();
      let rhs = self.parse_expr()?;
      return Some(Expr::new(span, ExprKind::Binary {
        op: BinaryOp::Assign, lhs: Box::new(lhs), rhs: Box::new(rhs),
      }))
    }
    // `a op= b` desugars to `a = a op b`
    self.bump();
    let rhs = self.parse_expr()?;
    let op = compound.expect("checked above");
    let combined = Expr::new(span, ExprKind::Binary {
      op, lhs: Box::new(lhs.clone()), rhs: Box::new(rhs),
    });
    Some(Expr::new(span, ExprKind::Binary {
      op: BinaryOp::Assign, lhs: Box::new(lhs), rhs: Box::new(combined),
    }))
  }

  fn binop_at(&self, level: u8) -> Option<BinaryOp> {
    let Token::Op(op) = self.cur else { return None };
    let (l, b) = match op {
      Op::LOr => (0, BinaryOp::LOr),
      Op::LAnd => (1, BinaryOp::LAnd),
      Op::Pipe => (2, BinaryOp::BitOr),
      Op::Caret => (3, BinaryOp::BitXor),
      Op::Amp => (4, BinaryOp::BitAnd),
      Op::Eq => (5, BinaryOp::Eq),
      Op::Ne => (5, BinaryOp::Ne),
      Op::Lt => (6, BinaryOp::Lt),
      Op::Le => (6, BinaryOp::Le),
      Op::Gt => (6, BinaryOp::Gt),
      Op::Ge => (6, BinaryOp::Ge),
      Op::Shl => (7, BinaryOp::Shl),
      Op::Shr => (7, BinaryOp::Shr),
      Op::Add => (8, BinaryOp::Add),
      Op::Sub => (8, BinaryOp::Sub),
      Op::Mul => (9, BinaryOp::Mul),
      Op::Div => (9, BinaryOp::Div),
      Op::Mod => (9, BinaryOp::Mod),
      _ => return None,
    };
    (l == level).then_some(b)
  }

  fn parse_binary(&mut self, level: u8) -> Option<Expr> {
    if level > 9 { return self.parse_unary() }
    let span = self.span;
    let mut lhs = self.parse_binary(level + 1)?;
    while let Some(op) = self.binop_at(level) {
      self.bump();
      let rhs = self.parse_binary(level + 1)?;
      lhs = Expr::new(span, ExprKind::Binary {
        op, lhs: Box::new(lhs), rhs: Box::new(rhs),
      });
    }
    Some(lhs)
  }

  fn parse_unary(&mut self) -> Option<Expr> {
    let span = self.span;
    let op = match self.cur {
      Token::Op(Op::Sub) => Some(UnaryOp::Neg),
      Token::Op(Op::Not) => Some(UnaryOp::LNot),
      Token::Op(Op::Tilde) => Some(UnaryOp::Not),
      Token::Op(Op::Mul) => Some(UnaryOp::Deref),
      Token::Op(Op::Amp) => Some(UnaryOp::Addr),
      _ => None,
    };
    if let Some(op) = op {
      self.bump();
      let arg = self.parse_unary()?;
      return Some(Expr::new(span, ExprKind::Unary { op, arg: Box::new(arg) }))
    }
    // a parenthesized type is a cast
    if self.cur == Token::Op(Op::LParen) && self.cast_ahead() {
      self.bump();
      let base = self.parse_type()?;
      let stars = self.count_stars();
      self.expect_op(Op::RParen)?;
      let arg = self.parse_unary()?;
      return Some(Expr::new(span, ExprKind::Cast {
        ty: apply_stars(base, stars), arg: Box::new(arg),
      }))
    }
    self.parse_postfix()
  }

  /// Is `( type ...` ahead? A type can only follow `(` in a cast.
  fn cast_ahead(&mut self) -> bool {
    let next = self.peek_second();
    self.starts_type(&next)
  }

  fn parse_postfix(&mut self) -> Option<Expr> {
    let span = self.span;
    let mut e = self.parse_primary()?;
    loop {
      match self.cur {
        Token::Op(Op::LBracket) => {
          self.bump();
          let index = self.parse_expr()?;
          self.expect_op(Op::RBracket)?;
          e = Expr::new(span, ExprKind::Index {
            base: Box::new(e), index: Box::new(index),
          });
        }
        Token::Op(Op::Dot) | Token::Op(Op::Arrow) => {
          let arrow = self.cur == Token::Op(Op::Arrow);
          self.bump();
          let field = self.expect_id()?;
          e = Expr::new(span, ExprKind::Member {
            base: Box::new(e), field, arrow,
          });
        }
        _ => return Some(e),
      }
    }
  }

  fn parse_primary(&mut self) -> Option<Expr> {
    let span = self.span;
    match self.bump() {
      Token::Int(n) => Some(Expr::new(span, ExprKind::Int(n))),
      Token::Str(s) => Some(Expr::new(span, ExprKind::Str(s))),
      Token::Id(name) => {
        if self.eat_op(Op::LParen) {
          let mut args = Vec::new();
          if !self.eat_op(Op::RParen) {
            loop {
              args.push(self.parse_expr()?);
              if !self.eat_op(Op::Comma) { break }
            }
            self.expect_op(Op::RParen)?;
          }
          Some(Expr::new(span, ExprKind::Call { callee: name, args }))
        } else {
          Some(Expr::new(span, ExprKind::Id(name)))
        }
      }
      Token::Op(Op::LParen) => {
        let e = self.parse_expr()?;
        self.expect_op(Op::RParen)?;
        Some(e)
      }
      _ => {
        self.logger().error("expected expression");
        None
      }
    }
  }
}

fn apply_stars(mut base: TypeSpec, stars: u32) -> TypeSpec {
  for _ in 0..stars {
    base = TypeSpec::Ptr(Box::new(base));
  }
  base
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::intern;

  fn parse(src: &str) -> Vec<Item> {
    Parser::new(intern("t.c"), src).parse_program()
  }

  #[test]
  fn function_with_control_flow() {
    let items = parse("int f(int n) { while (n) { n = n - 1; } return n; }");
    assert_eq!(items.len(), 1);
    let ItemKind::Func(f) = &items[0].k else { panic!("expected a function") };
    assert_eq!(f.name, intern("f"));
    assert_eq!(f.params.len(), 1);
    let body = f.body.as_ref().unwrap();
    assert!(matches!(body[0].k, StmtKind::While { .. }));
    assert!(matches!(body[1].k, StmtKind::Return(Some(_))));
  }

  #[test]
  fn typedef_names_become_types() {
    let items = parse("typedef int size; size g(size x) { return x; }");
    assert_eq!(items.len(), 2);
    let ItemKind::Func(f) = &items[1].k else { panic!("expected a function") };
    assert!(matches!(f.ret, TypeSpec::Named(_)));
  }

  #[test]
  fn compound_assignment_desugars() {
    let items = parse("void f(int x) { x += 2; }");
    let ItemKind::Func(f) = &items[0].k else { panic!() };
    let StmtKind::Expr(e) = &f.body.as_ref().unwrap()[0].k else { panic!() };
    let ExprKind::Binary { op: BinaryOp::Assign, rhs, .. } = &e.kind else {
      panic!("expected an assignment")
    };
    assert!(matches!(rhs.kind, ExprKind::Binary { op: BinaryOp::Add, .. }));
  }

  #[test]
  fn globals_arrays_and_inits() {
    let items = parse("static int tbl[4] = {1, 2, 3, 4}; int x = 5, *p;");
    assert_eq!(items.len(), 2);
    let ItemKind::VarDecl(d) = &items[0].k else { panic!() };
    assert!(d.is_static);
    assert_eq!(d.defs[0].k.dims.len(), 1);
    let ItemKind::VarDecl(d) = &items[1].k else { panic!() };
    assert_eq!(d.defs.len(), 2);
    assert_eq!(d.defs[1].k.stars, 1);
  }

  #[test]
  fn struct_definition_and_member_access() {
    let items = parse("struct pt { int x; int y; }; int f(struct pt *p) { return p->x; }");
    assert_eq!(items.len(), 2);
    assert!(matches!(items[0].k, ItemKind::StructDef { .. }));
    let ItemKind::Func(f) = &items[1].k else { panic!() };
    let StmtKind::Return(Some(e)) = &f.body.as_ref().unwrap()[0].k else { panic!() };
    assert!(matches!(e.kind, ExprKind::Member { arrow: true, .. }));
  }

  #[test]
  fn cast_expression() {
    let items = parse("int f(char c) { return (int)c; }");
    let ItemKind::Func(f) = &items[0].k else { panic!() };
    let StmtKind::Return(Some(e)) = &f.body.as_ref().unwrap()[0].k else { panic!() };
    assert!(matches!(e.kind, ExprKind::Cast { .. }));
  }
}
