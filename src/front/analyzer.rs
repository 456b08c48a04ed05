//! Semantic analysis.
//!
//! Resolves names through nested lexical scopes (one stack each for values,
//! type aliases, structs and enums), checks types per the language rules,
//! and writes the checked type into every expression node. Initialization
//! follows the can-accept relation, except that const and array types
//! require structural identity.
//!
//! Struct recursion is rejected by cycle detection over the nominal-type
//! graph of by-value field references; pointers break cycles. Type aliases
//! are registered in the alias scope.

use std::collections::HashMap;
use std::rc::Rc;
use crate::Symbol;
use crate::logger::Logger;
use crate::types::{IntTy, Size, Span};
use crate::types::ty::{make_int, make_ptr, make_void, Ty, TyExt, TyKind};
use crate::types::ast::{
  BinaryOp, Expr, ExprKind, Init, Item, ItemKind, Stmt, StmtKind, TypeSpec, UnaryOp, VarDecl,
};

/// A stack of lexical scopes mapping symbols to `T`. Lookup walks outward
/// from the innermost scope.
#[derive(Debug)]
pub struct ScopeStack<T> {
  scopes: Vec<HashMap<Symbol, T>>,
}

impl<T> ScopeStack<T> {
  /// A stack holding only the global scope.
  #[must_use] pub fn new() -> Self { ScopeStack { scopes: vec![HashMap::new()] } }

  /// Push a fresh innermost scope.
  pub fn enter(&mut self) { self.scopes.push(HashMap::new()) }

  /// Pop the innermost scope. The global scope is never popped.
  pub fn exit(&mut self) {
    assert!(self.scopes.len() > 1, "popping the global scope");
    self.scopes.pop();
  }

  /// Define `name` in the innermost scope. Returns false if it already
  /// exists there.
  pub fn define(&mut self, name: Symbol, val: T) -> bool {
    self.scopes.last_mut().expect("no scope").insert(name, val).is_none()
  }

  /// Look `name` up, innermost scope first.
  #[must_use] pub fn get(&self, name: Symbol) -> Option<&T> {
    self.scopes.iter().rev().find_map(|s| s.get(&name))
  }

  /// Is the innermost scope the global one?
  #[must_use] pub fn at_global(&self) -> bool { self.scopes.len() == 1 }
}

impl<T> Default for ScopeStack<T> {
  fn default() -> Self { Self::new() }
}

/// The semantic analyzer.
#[derive(Debug, Default)]
pub struct Analyzer {
  file: Symbol,
  values: ScopeStack<Ty>,
  aliases: ScopeStack<Ty>,
  structs: ScopeStack<Ty>,
  enums: ScopeStack<Ty>,
  /// By-value field references between named structs, for recursion checks.
  struct_graph: HashMap<Symbol, Vec<Symbol>>,
  ret_ty: Option<Ty>,
  loop_depth: u32,
}

fn rvalue(ty: Ty) -> Ty { ty.value_type(true) }

fn int32() -> Ty { make_int(IntTy::Int(Size::S32)) }

impl Analyzer {
  /// Create an analyzer reporting against `file`.
  #[must_use] pub fn new(file: Symbol) -> Self {
    Analyzer { file, ..Default::default() }
  }

  fn logger(&self, span: Span) -> Logger { Logger::new(self.file, span) }

  /// Enter a nested scope in all four namespaces.
  fn enter_scopes(&mut self) {
    self.values.enter();
    self.aliases.enter();
    self.structs.enter();
    self.enums.enter();
  }

  /// Leave the scope in all four namespaces. Every exit path through the
  /// analyzer goes through here.
  fn exit_scopes(&mut self) {
    self.values.exit();
    self.aliases.exit();
    self.structs.exit();
    self.enums.exit();
  }

  /// Analyze a whole translation unit.
  pub fn analyze_program(&mut self, items: &mut [Item]) {
    for item in items {
      self.analyze_item(item);
    }
  }

  fn analyze_item(&mut self, item: &mut Item) {
    let span = item.span;
    match &mut item.k {
      ItemKind::VarDecl(decl) => self.analyze_var_decl(span, decl),
      ItemKind::Func(f) => {
        let log = self.logger(span);
        let Some(ret) = self.resolve(&f.ret, log) else { return };
        let mut params = Vec::new();
        for (spec, _, is_array) in &f.params {
          let Some(mut ty) = self.resolve(spec, log) else { return };
          if *is_array { ty = make_ptr(ty) }
          params.push(ty);
        }
        let fty: Ty = Rc::new(TyKind::Func(params.clone(), ret.clone()));
        f.ty = Some(fty.clone());
        if let Some(prev) = self.values.get(f.name) {
          if !prev.is_identical(&fty) {
            log.error(format_args!("conflicting declaration of '{}'", f.name));
            return
          }
        } else {
          self.values.define(f.name, fty);
        }
        let Some(body) = &mut f.body else { return };
        self.enter_scopes();
        for ((_, name, _), ty) in f.params.iter().zip(&params) {
          if !self.values.define(*name, ty.clone()) {
            log.error(format_args!("duplicate parameter '{name}'"));
          }
        }
        self.ret_ty = Some(ret);
        for s in body { self.analyze_stmt(s) }
        self.ret_ty = None;
        self.exit_scopes();
      }
      ItemKind::StructDef { name, fields } => {
        let log = self.logger(span);
        let mut tys = Vec::new();
        let mut edges = Vec::new();
        for (spec, fname, dims) in fields.iter_mut() {
          let Some(mut ty) = self.resolve(spec, log) else { continue };
          for d in dims.iter_mut().rev() {
            self.analyze_expr(d);
            let Some(n) = d.val else {
              log.error("array dimension must be a constant expression");
              continue
            };
            ty = Rc::new(TyKind::Array(ty, n));
          }
          if let TyKind::Struct(inner, _) = &**ty.unqual() {
            edges.push(*inner);
          }
          tys.push((*fname, ty));
        }
        self.struct_graph.insert(*name, edges);
        if self.reaches_itself(*name) {
          log.error(format_args!("recursive type 'struct {name}' is not allowed"));
          return
        }
        let ty: Ty = Rc::new(TyKind::Struct(*name, tys));
        if !self.structs.define(*name, ty) {
          log.error(format_args!("struct '{name}' has already been defined"));
        }
      }
      ItemKind::EnumDef { name, elems } => {
        let log = self.logger(span);
        if let Some(name) = name {
          if !self.enums.define(*name, int32()) {
            log.error(format_args!("enum '{name}' has already been defined"));
          }
        }
        // enumerators are constant int values in the value namespace
        for (ename, init) in elems.iter_mut() {
          if let Some(e) = init { self.analyze_expr(e) }
          let ty: Ty = Rc::new(TyKind::Const(int32()));
          if !self.values.define(*ename, ty) {
            log.error(format_args!("enumerator '{ename}' has already been defined"));
          }
        }
      }
      ItemKind::TypeAlias { name, ty } => {
        let log = self.logger(span);
        let Some(resolved) = self.resolve(ty, log) else { return };
        // aliases live in the alias scope, not the enum scope
        if !self.aliases.define(*name, resolved) {
          log.error(format_args!("type alias '{name}' has already been defined"));
        }
      }
    }
  }

  /// Can `name`'s struct reach itself through by-value fields?
  fn reaches_itself(&self, name: Symbol) -> bool {
    let mut stack: Vec<Symbol> = self.struct_graph.get(&name)
      .into_iter().flatten().copied().collect();
    let mut visited = Vec::new();
    while let Some(s) = stack.pop() {
      if s == name { return true }
      if !visited.contains(&s) {
        visited.push(s);
        stack.extend(self.struct_graph.get(&s).into_iter().flatten().copied());
      }
    }
    false
  }

  fn resolve(&self, spec: &TypeSpec, log: Logger) -> Option<Ty> {
    Some(match spec {
      TypeSpec::Void => make_void(),
      TypeSpec::Int => int32(),
      TypeSpec::UInt => make_int(IntTy::UInt(Size::S32)),
      TypeSpec::Char => make_int(IntTy::Int(Size::S8)),
      TypeSpec::UChar => make_int(IntTy::UInt(Size::S8)),
      TypeSpec::Struct(name) => match self.structs.get(*name) {
        Some(ty) => ty.clone(),
        None => {
          log.error(format_args!("undefined struct '{name}'"));
          return None
        }
      },
      TypeSpec::Named(name) => match self.aliases.get(*name) {
        Some(ty) => ty.clone(),
        None => {
          log.error(format_args!("undefined type '{name}'"));
          return None
        }
      },
      TypeSpec::Ptr(inner) => make_ptr(self.resolve(inner, log)?),
      TypeSpec::Const(inner) => Rc::new(TyKind::Const(self.resolve(inner, log)?)),
    })
  }

  fn analyze_var_decl(&mut self, span: Span, decl: &mut VarDecl) {
    let log = self.logger(span);
    let Some(base) = self.resolve(&decl.base, log) else { return };
    for def in &mut decl.defs {
      let dlog = self.logger(def.span);
      let mut ty = base.clone();
      for _ in 0..def.k.stars { ty = make_ptr(ty) }
      for d in def.k.dims.iter_mut().rev() {
        self.analyze_expr(d);
        match d.val {
          Some(n) if n > 0 => ty = Rc::new(TyKind::Array(ty, n)),
          Some(_) => {
            dlog.error("array dimension must be positive");
            return
          }
          None => {
            dlog.error("array dimension must be a constant expression");
            return
          }
        }
      }
      if ty.is_void() {
        dlog.error("cannot declare a variable of type void");
        continue
      }
      if let Some(init) = &mut def.k.init {
        self.analyze_init(dlog, &ty, init);
      } else if ty.is_const() {
        dlog.error(format_args!("const variable '{}' must be initialized", def.k.name));
      }
      def.k.ty = Some(ty.clone());
      if !self.values.define(def.k.name, ty) {
        dlog.error(format_args!("symbol '{}' has already been defined", def.k.name));
      }
    }
  }

  /// Check value initialization: const and array types require structural
  /// identity, other types use the can-accept relation.
  fn check_init(&self, log: Logger, ty: &Ty, init: &Ty, name: Symbol) {
    let ok = if ty.is_const() || ty.is_array() {
      ty.is_identical(init)
    } else {
      ty.value_type(true).can_accept(init)
    };
    if !ok {
      if name == Symbol::UNDER {
        log.error("type mismatch when initializing");
      } else {
        log.error(format_args!("type mismatch when initializing '{name}'"));
      }
    }
  }

  fn analyze_init(&mut self, log: Logger, ty: &Ty, init: &mut Init) {
    match init {
      Init::Expr(e) => {
        self.analyze_expr(e);
        if let Some(ety) = &e.ty {
          // scalar initialization from an expression
          let ok = if ty.is_const() && !ty.is_array() {
            // a const scalar takes any acceptable value expression
            ty.unqual().value_type(true).can_accept(ety)
          } else if ty.is_array() {
            false
          } else {
            ty.value_type(true).can_accept(ety)
          };
          if !ok {
            log.error("type mismatch when initializing");
          }
        }
      }
      Init::List(elems) => {
        let Some(elem_ty) = ty.deref_ty() else {
          log.error("initializer list requires an array type");
          return
        };
        let len = ty.array_len().unwrap_or(0);
        if elems.len() as u32 > len {
          log.error("too many elements in initializer list");
        }
        for e in elems.iter_mut() {
          self.analyze_init(log, &elem_ty, e);
        }
      }
    }
  }

  fn analyze_stmt(&mut self, stmt: &mut Stmt) {
    let span = stmt.span;
    match &mut stmt.k {
      StmtKind::Decl(decl) => self.analyze_var_decl(span, decl),
      StmtKind::Expr(e) => { self.analyze_expr(e); }
      StmtKind::Block(stmts) => {
        self.enter_scopes();
        for s in stmts { self.analyze_stmt(s) }
        self.exit_scopes();
      }
      StmtKind::If { cond, then, els } => {
        self.check_cond(cond);
        self.analyze_stmt(then);
        if let Some(els) = els { self.analyze_stmt(els) }
      }
      StmtKind::While { cond, body } => {
        self.check_cond(cond);
        self.loop_depth += 1;
        self.analyze_stmt(body);
        self.loop_depth -= 1;
      }
      StmtKind::Break | StmtKind::Continue => {
        if self.loop_depth == 0 {
          self.logger(span).error("break/continue outside of a loop");
        }
      }
      StmtKind::Return(val) => {
        let log = self.logger(span);
        let Some(ret) = self.ret_ty.clone() else {
          log.error("return outside of a function");
          return
        };
        match val {
          Some(e) => {
            self.analyze_expr(e);
            if ret.is_void() {
              log.error("void function cannot return a value");
            } else if let Some(ety) = &e.ty {
              self.check_init(log, &ret, ety, Symbol::UNDER);
            }
          }
          None => {
            if !ret.is_void() {
              log.error("non-void function must return a value");
            }
          }
        }
      }
      StmtKind::Empty => {}
    }
  }

  fn check_cond(&mut self, cond: &mut Expr) {
    self.analyze_expr(cond);
    if let Some(ty) = &cond.ty {
      if !ty.is_integer() && !ty.is_pointer() {
        self.logger(cond.span).error("condition must be an integer or pointer");
      }
    }
  }

  /// Analyze an expression and record its type in `e.ty`. A `None` type
  /// after this call means an error was already reported.
  pub fn analyze_expr(&mut self, e: &mut Expr) {
    e.ty = self.expr_ty(e);
  }

  fn expr_ty(&mut self, e: &mut Expr) -> Option<Ty> {
    let log = self.logger(e.span);
    match &mut e.kind {
      ExprKind::Int(_) => Some(rvalue(int32())),
      ExprKind::Str(_) => Some(rvalue(make_ptr(make_int(IntTy::Int(Size::S8))))),
      ExprKind::Id(name) => match self.values.get(*name) {
        Some(ty) => Some(ty.clone()),
        None => {
          log.error(format_args!("undeclared identifier '{name}'"));
          None
        }
      },
      ExprKind::Binary { op, lhs, rhs } => {
        self.analyze_expr(lhs);
        self.analyze_expr(rhs);
        self.binary_ty(log, *op, lhs, rhs)
      }
      ExprKind::Unary { op, arg } => {
        self.analyze_expr(arg);
        let aty = arg.ty.clone()?;
        match op {
          UnaryOp::Neg | UnaryOp::Not => {
            if !aty.is_integer() {
              log.error("integer operand required");
              None
            } else {
              Some(rvalue(aty.unqual().clone()))
            }
          }
          UnaryOp::LNot => {
            if !aty.is_integer() && !aty.is_pointer() {
              log.error("integer or pointer operand required");
              None
            } else {
              Some(rvalue(int32()))
            }
          }
          UnaryOp::Deref => match aty.deref_ty() {
            Some(inner) => Some(inner),
            None => {
              log.error("cannot dereference a non-pointer");
              None
            }
          },
          UnaryOp::Addr => {
            if aty.is_right_value() {
              log.error("cannot take the address of a temporary");
              None
            } else {
              Some(rvalue(make_ptr(aty)))
            }
          }
        }
      }
      ExprKind::Cast { ty, arg } => {
        self.analyze_expr(arg);
        let target = self.resolve(ty, log)?;
        let aty = arg.ty.clone()?;
        if !aty.can_cast_to(&target) {
          log.error("illegal type cast");
          None
        } else {
          Some(rvalue(target))
        }
      }
      ExprKind::Call { callee, args } => {
        let fty = match self.values.get(*callee) {
          Some(ty) => ty.clone(),
          None => {
            log.error(format_args!("undeclared function '{callee}'"));
            return None
          }
        };
        let Some((params, ret)) = fty.func_sig() else {
          log.error(format_args!("'{callee}' is not a function"));
          return None
        };
        let (params, ret) = (params.clone(), ret.clone());
        if params.len() != args.len() {
          log.error(format_args!("wrong number of arguments to '{callee}'"));
        }
        for (a, p) in args.iter_mut().zip(&params) {
          self.analyze_expr(a);
          if let Some(aty) = &a.ty {
            if !p.value_type(true).can_accept(aty) {
              self.logger(a.span).error("argument type mismatch");
            }
          }
        }
        Some(rvalue(ret))
      }
      ExprKind::Index { base, index } => {
        self.analyze_expr(base);
        self.analyze_expr(index);
        if !index.ty.as_ref().is_some_and(|t| t.is_integer()) {
          log.error("array subscript must be an integer");
        }
        let bty = base.ty.clone()?;
        match bty.deref_ty() {
          Some(elem) => {
            // warn on a provably out-of-bounds constant subscript
            if let (Some(len), Some(n)) = (bty.array_len(), index.val) {
              if n >= len {
                self.logger(index.span).warning("subscript out of bounds");
              }
            }
            Some(elem)
          }
          None => {
            log.error("subscripted value is not an array or pointer");
            None
          }
        }
      }
      ExprKind::Member { base, field, arrow } => {
        self.analyze_expr(base);
        let bty = base.ty.clone()?;
        let sty = if *arrow {
          match bty.deref_ty() {
            Some(inner) => inner,
            None => {
              log.error("'->' requires a pointer to a struct");
              return None
            }
          }
        } else { bty };
        if !sty.is_struct() {
          log.error("member access requires a struct");
          return None
        }
        match sty.field(*field) {
          Some((_, fty)) => Some(fty),
          None => {
            log.error(format_args!("no field named '{field}'"));
            None
          }
        }
      }
    }
  }

  fn binary_ty(&mut self, log: Logger, op: BinaryOp, lhs: &Expr, rhs: &Expr) -> Option<Ty> {
    let lt = lhs.ty.clone()?;
    let rt = rhs.ty.clone()?;
    match op {
      BinaryOp::Assign => {
        if lt.is_right_value() {
          log.error("cannot assign to a temporary");
          return None
        }
        if lt.is_const() {
          log.error("cannot assign to a const value");
          return None
        }
        if !lt.value_type(true).can_accept(&rt) {
          log.error("type mismatch in assignment");
          return None
        }
        Some(rvalue(lt))
      }
      BinaryOp::Add | BinaryOp::Sub => {
        // pointer arithmetic with integers is permitted
        if lt.is_pointer() && rt.is_integer() {
          return Some(rvalue(lt.unqual().clone()))
        }
        if lt.is_integer() && rt.is_pointer() && op == BinaryOp::Add {
          return Some(rvalue(rt.unqual().clone()))
        }
        self.int_binary(log, &lt, &rt)
      }
      BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod |
      BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor |
      BinaryOp::Shl | BinaryOp::Shr => self.int_binary(log, &lt, &rt),
      BinaryOp::LAnd | BinaryOp::LOr => {
        let ok = |t: &Ty| t.is_integer() || t.is_pointer();
        if !ok(&lt) || !ok(&rt) {
          log.error("integer or pointer operands required");
          return None
        }
        Some(rvalue(int32()))
      }
      BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le |
      BinaryOp::Gt | BinaryOp::Ge => {
        let compatible = (lt.is_integer() && rt.is_integer())
          || (lt.is_pointer() && rt.is_pointer() && lt.is_identical(&rt));
        if !compatible {
          log.error("incomparable operand types");
          return None
        }
        Some(rvalue(int32()))
      }
    }
  }

  fn int_binary(&mut self, log: Logger, lt: &Ty, rt: &Ty) -> Option<Ty> {
    match lt.common_int_ty(rt) {
      Some(common) => Some(rvalue(make_int(common))),
      None => {
        log.error("integer operands required");
        None
      }
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::intern;
  use crate::front::parser::Parser;
  use crate::front::eval::Evaluator;
  use crate::logger;

  fn analyze(src: &str) -> usize {
    let _guard = logger::lock_for_tests();
    logger::reset();
    let mut items = Parser::new(intern("t.c"), src).parse_program();
    Evaluator::new().eval_program(&mut items);
    Analyzer::new(intern("t.c")).analyze_program(&mut items);
    logger::error_num()
  }

  #[test]
  fn accepts_well_typed_programs() {
    assert_eq!(analyze("
      struct pt { int x; int y; };
      typedef int word;
      enum { A, B = 3 };
      int g(int n);
      word f(word n, int a[]) {
        struct pt p;
        p.x = a[n] + B;
        while (n) { n = n - 1; if (n == 1) break; }
        return g(p.x);
      }
    "), 0);
  }

  #[test]
  fn rejects_assignment_to_const() {
    assert_eq!(analyze("void f() { const int x = 1; x = 2; }"), 1);
  }

  #[test]
  fn rejects_recursive_struct() {
    assert_ne!(analyze("struct a { struct a inner; };"), 0);
  }

  #[test]
  fn rejects_deep_struct_cycle() {
    // the cycle passes through an intermediate struct; name comparison with
    // only the enclosing struct would miss it
    assert_ne!(analyze("
      struct a { int x; };
      struct b { struct a first; };
      struct a { struct b second; };
    "), 0);
  }

  #[test]
  fn aliases_do_not_collide_with_enums() {
    assert_eq!(analyze("enum color { RED }; typedef int color_t; color_t f() { return RED; }"), 0);
  }

  #[test]
  fn undeclared_identifier_is_reported() {
    assert_eq!(analyze("int f() { return nope; }"), 1);
  }
}
