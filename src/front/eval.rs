//! Compile-time constant evaluation over the AST.
//!
//! Runs between parsing and semantic analysis. Folds integer constant
//! expressions into each node's `val` slot, tracks `const int` variables and
//! enumerators in nested value environments, and assigns enumerator values
//! by continuing the count from the previous element. Division by zero is
//! never folded here; the instruction survives to the IR where the constant
//! folding pass reports it.

use std::collections::HashMap;
use crate::Symbol;
use crate::types::{IntTy, Size};
use crate::types::ast::{
  BinaryOp, Expr, ExprKind, Init, Item, ItemKind, Stmt, StmtKind, TypeSpec, UnaryOp,
};

/// The constant evaluator.
#[derive(Debug, Default)]
pub struct Evaluator {
  envs: Vec<HashMap<Symbol, u32>>,
  last_enum_val: u32,
}

/// Is this the type of a foldable `const int` variable?
fn is_const_int(spec: &TypeSpec) -> bool {
  match spec {
    TypeSpec::Const(inner) => matches!(**inner,
      TypeSpec::Int | TypeSpec::UInt | TypeSpec::Char | TypeSpec::UChar),
    _ => false,
  }
}

impl Evaluator {
  /// A fresh evaluator with one global environment.
  #[must_use] pub fn new() -> Self {
    Evaluator { envs: vec![HashMap::new()], last_enum_val: 0 }
  }

  fn get(&self, name: Symbol) -> Option<u32> {
    self.envs.iter().rev().find_map(|e| e.get(&name).copied())
  }

  fn add(&mut self, name: Symbol, val: u32) {
    self.envs.last_mut().expect("no environment").insert(name, val);
  }

  /// Evaluate a whole translation unit.
  pub fn eval_program(&mut self, items: &mut [Item]) {
    for item in items {
      self.eval_item(item);
    }
  }

  fn eval_item(&mut self, item: &mut Item) {
    match &mut item.k {
      ItemKind::VarDecl(decl) => self.eval_var_decl(decl),
      ItemKind::Func(f) => {
        if let Some(body) = &mut f.body {
          self.envs.push(HashMap::new());
          for s in body { self.eval_stmt(s) }
          self.envs.pop();
        }
      }
      ItemKind::StructDef { fields, .. } => {
        for (_, _, dims) in fields {
          for d in dims { self.eval_expr(d); }
        }
      }
      ItemKind::EnumDef { elems, .. } => {
        self.last_enum_val = 0;
        for (name, init) in elems {
          let val = match init {
            Some(e) => self.eval_expr(e).unwrap_or(self.last_enum_val),
            None => self.last_enum_val,
          };
          self.add(*name, val);
          self.last_enum_val = val.wrapping_add(1);
        }
      }
      ItemKind::TypeAlias { .. } => {}
    }
  }

  fn eval_var_decl(&mut self, decl: &mut crate::types::ast::VarDecl) {
    let foldable = is_const_int(&decl.base);
    for def in &mut decl.defs {
      for d in &mut def.k.dims { self.eval_expr(d); }
      if let Some(init) = &mut def.k.init {
        let val = self.eval_init(init);
        if foldable && def.k.stars == 0 && def.k.dims.is_empty() {
          if let Some(v) = val { self.add(def.k.name, v) }
        }
      }
    }
  }

  fn eval_init(&mut self, init: &mut Init) -> Option<u32> {
    match init {
      Init::Expr(e) => self.eval_expr(e),
      Init::List(elems) => {
        for e in elems { self.eval_init(e); }
        None
      }
    }
  }

  fn eval_stmt(&mut self, stmt: &mut Stmt) {
    match &mut stmt.k {
      StmtKind::Decl(decl) => self.eval_var_decl(decl),
      StmtKind::Expr(e) => { self.eval_expr(e); }
      StmtKind::Block(stmts) => {
        self.envs.push(HashMap::new());
        for s in stmts { self.eval_stmt(s) }
        self.envs.pop();
      }
      StmtKind::If { cond, then, els } => {
        self.eval_expr(cond);
        self.eval_stmt(then);
        if let Some(els) = els { self.eval_stmt(els) }
      }
      StmtKind::While { cond, body } => {
        self.eval_expr(cond);
        self.eval_stmt(body);
      }
      StmtKind::Return(Some(e)) => { self.eval_expr(e); }
      StmtKind::Return(None) | StmtKind::Break | StmtKind::Continue | StmtKind::Empty => {}
    }
  }

  /// Evaluate an expression, recording the folded value in `e.val`.
  fn eval_expr(&mut self, e: &mut Expr) -> Option<u32> {
    let val = match &mut e.kind {
      ExprKind::Int(n) => Some(*n),
      ExprKind::Str(_) => None,
      ExprKind::Id(name) => self.get(*name),
      ExprKind::Binary { op, lhs, rhs } => {
        let l = self.eval_expr(lhs);
        let r = self.eval_expr(rhs);
        match (op, l, r) {
          (BinaryOp::Assign, ..) => None,
          (op, Some(l), Some(r)) => apply_binary(*op, l, r),
          _ => None,
        }
      }
      ExprKind::Unary { op, arg } => {
        let a = self.eval_expr(arg);
        match (op, a) {
          (UnaryOp::Neg, Some(n)) => Some(n.wrapping_neg()),
          (UnaryOp::Not, Some(n)) => Some(!n),
          (UnaryOp::LNot, Some(n)) => Some(u32::from(n == 0)),
          _ => None,
        }
      }
      ExprKind::Cast { ty, arg } => {
        let a = self.eval_expr(arg);
        match ty {
          TypeSpec::Char => a.map(|n| IntTy::Int(Size::S8).truncate(n)),
          TypeSpec::UChar => a.map(|n| IntTy::UInt(Size::S8).truncate(n)),
          TypeSpec::Int | TypeSpec::UInt => a,
          _ => None,
        }
      }
      ExprKind::Call { args, .. } => {
        for a in args { self.eval_expr(a); }
        None
      }
      ExprKind::Index { base, index } => {
        self.eval_expr(base);
        self.eval_expr(index);
        None
      }
      ExprKind::Member { base, .. } => {
        self.eval_expr(base);
        None
      }
    };
    e.val = val;
    val
  }
}

fn apply_binary(op: BinaryOp, l: u32, r: u32) -> Option<u32> {
  let (sl, sr) = (l as i32, r as i32);
  Some(match op {
    BinaryOp::Assign => return None,
    BinaryOp::Add => l.wrapping_add(r),
    BinaryOp::Sub => l.wrapping_sub(r),
    BinaryOp::Mul => l.wrapping_mul(r),
    // signed by default here; the IR-level folder handles unsigned operands
    BinaryOp::Div => sl.checked_div(sr)? as u32,
    BinaryOp::Mod => sl.checked_rem(sr)? as u32,
    BinaryOp::BitAnd => l & r,
    BinaryOp::BitOr => l | r,
    BinaryOp::BitXor => l ^ r,
    BinaryOp::Shl => l.wrapping_shl(r),
    BinaryOp::Shr => sl.wrapping_shr(r) as u32,
    BinaryOp::LAnd => u32::from(l != 0 && r != 0),
    BinaryOp::LOr => u32::from(l != 0 || r != 0),
    BinaryOp::Eq => u32::from(l == r),
    BinaryOp::Ne => u32::from(l != r),
    BinaryOp::Lt => u32::from(sl < sr),
    BinaryOp::Le => u32::from(sl <= sr),
    BinaryOp::Gt => u32::from(sl > sr),
    BinaryOp::Ge => u32::from(sl >= sr),
  })
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::intern;
  use crate::front::parser::Parser;

  fn eval(src: &str) -> Vec<Item> {
    let mut items = Parser::new(intern("t.c"), src).parse_program();
    Evaluator::new().eval_program(&mut items);
    items
  }

  fn global_init_val(item: &Item) -> Option<u32> {
    let ItemKind::VarDecl(d) = &item.k else { panic!("not a var decl") };
    match d.defs[0].k.init.as_ref()? {
      Init::Expr(e) => e.val,
      Init::List(_) => None,
    }
  }

  #[test]
  fn const_propagation_through_names() {
    let items = eval("const int n = 4; int x = n * 2 + 1;");
    assert_eq!(global_init_val(&items[1]), Some(9));
  }

  #[test]
  fn enum_values_continue_counting() {
    let items = eval("enum { A, B = 10, C }; int x = C;");
    assert_eq!(global_init_val(&items[1]), Some(11));
  }

  #[test]
  fn division_by_zero_does_not_fold() {
    let items = eval("int x = 1 / 0;");
    assert_eq!(global_init_val(&items[0]), None);
  }

  #[test]
  fn char_cast_truncates() {
    let items = eval("int x = (unsigned char)300;");
    assert_eq!(global_init_val(&items[0]), Some(44));
  }
}
