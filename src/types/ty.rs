//! The static type system shared by the AST and the IR.
//!
//! Types are immutable values behind [`Rc`], so cloning a [`Ty`] is cheap.
//! The `Const` and `RightValue` qualifiers are layered as wrappers around a
//! base type; most predicates look through the wrappers.

use std::rc::Rc;
use crate::Symbol;
use super::{IntTy, Size};

/// A reference-counted type. Cloning is cheap.
pub type Ty = Rc<TyKind>;

/// The different kinds of MimiC types.
#[derive(Debug, PartialEq, Eq, Hash)]
pub enum TyKind {
  /// The `void` type. Only legal as a function return type.
  Void,
  /// An integral type.
  Int(IntTy),
  /// A pointer to the inner type. Arithmetic with integers is permitted.
  Ptr(Ty),
  /// A fixed-length array. Decays to a pointer when passed as a parameter.
  Array(Ty, u32),
  /// A nominal structure type with ordered fields.
  Struct(Symbol, Vec<(Symbol, Ty)>),
  /// A function type: parameter types and return type.
  Func(Vec<Ty>, Ty),
  /// A `const`-qualified type.
  Const(Ty),
  /// A right-value (non-assignable temporary) of the inner type.
  RightValue(Ty),
}

/// Make a primitive integer type.
#[must_use] pub fn make_int(ity: IntTy) -> Ty { Rc::new(TyKind::Int(ity)) }

/// Make the default `int` type (signed, 32 bits).
#[must_use] pub fn make_i32() -> Ty { make_int(IntTy::Int(Size::S32)) }

/// Make the `void` type.
#[must_use] pub fn make_void() -> Ty { Rc::new(TyKind::Void) }

/// Make a pointer to `base`.
#[must_use] pub fn make_ptr(base: Ty) -> Ty { Rc::new(TyKind::Ptr(base)) }

/// Operations on reference-counted types. These live on [`Ty`] rather than
/// [`TyKind`] so they can share and produce `Rc` handles cheaply.
pub trait TyExt: Sized {
  /// Strip `Const` and `RightValue` qualifiers, yielding the base type.
  fn unqual(&self) -> &Ty;
  /// Is this type (behind qualifiers) `void`?
  fn is_void(&self) -> bool;
  /// Is this type (behind qualifiers) an integer?
  fn is_integer(&self) -> bool;
  /// Is this type (behind qualifiers) a pointer?
  fn is_pointer(&self) -> bool;
  /// Is this type (behind qualifiers) an array?
  fn is_array(&self) -> bool;
  /// Is this type (behind qualifiers) a struct?
  fn is_struct(&self) -> bool;
  /// Is this type (behind qualifiers) a function?
  fn is_func(&self) -> bool;
  /// Is this type `const`-qualified (possibly under a `RightValue` wrapper)?
  fn is_const(&self) -> bool;
  /// Is this type a right-value?
  fn is_right_value(&self) -> bool;
  /// Is this an unsigned integral type? Pointers count as unsigned.
  fn is_unsigned(&self) -> bool;
  /// The integral type behind qualifiers, if any.
  fn int_ty(&self) -> Option<IntTy>;
  /// The size of a value of this type in bytes.
  fn size(&self) -> u32;
  /// The alignment of a value of this type in bytes.
  fn align(&self) -> u32;
  /// Structural identity, ignoring qualifiers. Structs are nominal.
  fn is_identical(&self, other: &Ty) -> bool;
  /// Can a value of type `rhs` be implicitly accepted where `self` is
  /// expected?
  fn can_accept(&self, rhs: &Ty) -> bool;
  /// Is an explicit cast from `self` to `target` legal?
  fn can_cast_to(&self, target: &Ty) -> bool;
  /// The type obtained by dereferencing this pointer or indexing this array.
  fn deref_ty(&self) -> Option<Ty>;
  /// The array length, if this is an array type.
  fn array_len(&self) -> Option<u32>;
  /// Look up a struct field by name, returning its index and type.
  fn field(&self, name: Symbol) -> Option<(usize, Ty)>;
  /// The byte offset of the field at `index` in this struct.
  fn field_offset(&self, index: usize) -> Option<u32>;
  /// Convert this type's value category: `true` wraps into a right-value,
  /// `false` strips the right-value wrapper.
  fn value_type(&self, right: bool) -> Ty;
  /// The parameter and return types, if this is a function type.
  fn func_sig(&self) -> Option<(&Vec<Ty>, &Ty)>;
  /// The common type of two integral operands under the usual arithmetic
  /// conversions.
  fn common_int_ty(&self, other: &Ty) -> Option<IntTy>;
}

impl TyExt for Ty {
  fn unqual(&self) -> &Ty {
    let mut t = self;
    loop {
      match &**t {
        TyKind::Const(inner) | TyKind::RightValue(inner) => t = inner,
        _ => return t,
      }
    }
  }

  fn is_void(&self) -> bool { matches!(**self.unqual(), TyKind::Void) }

  fn is_integer(&self) -> bool { matches!(**self.unqual(), TyKind::Int(_)) }

  fn is_pointer(&self) -> bool { matches!(**self.unqual(), TyKind::Ptr(_)) }

  fn is_array(&self) -> bool { matches!(**self.unqual(), TyKind::Array(..)) }

  fn is_struct(&self) -> bool { matches!(**self.unqual(), TyKind::Struct(..)) }

  fn is_func(&self) -> bool { matches!(**self.unqual(), TyKind::Func(..)) }

  fn is_const(&self) -> bool {
    match &**self {
      TyKind::Const(_) => true,
      TyKind::RightValue(inner) => inner.is_const(),
      _ => false,
    }
  }

  fn is_right_value(&self) -> bool {
    matches!(**self, TyKind::RightValue(_))
  }

  fn is_unsigned(&self) -> bool {
    match &**self.unqual() {
      TyKind::Int(ity) => !ity.signed(),
      TyKind::Ptr(_) => true,
      _ => false,
    }
  }

  fn int_ty(&self) -> Option<IntTy> {
    if let TyKind::Int(ity) = **self.unqual() { Some(ity) } else { None }
  }

  fn size(&self) -> u32 {
    match &**self.unqual() {
      TyKind::Void | TyKind::Func(..) => 0,
      TyKind::Int(ity) => ity.size().bytes(),
      TyKind::Ptr(_) => 4,
      TyKind::Array(elem, len) => elem.size() * len,
      TyKind::Struct(_, fields) => {
        // fields are padded to their own alignment, struct to max alignment
        let mut off = 0;
        let mut align = 1;
        for (_, ty) in fields {
          let a = ty.align();
          align = align.max(a);
          off = (off + a - 1) / a * a + ty.size();
        }
        (off + align - 1) / align * align
      }
      TyKind::Const(_) | TyKind::RightValue(_) => unreachable!("stripped by unqual()"),
    }
  }

  fn align(&self) -> u32 {
    match &**self.unqual() {
      TyKind::Void | TyKind::Func(..) => 1,
      TyKind::Int(ity) => ity.size().bytes(),
      TyKind::Ptr(_) => 4,
      TyKind::Array(elem, _) => elem.align(),
      TyKind::Struct(_, fields) =>
        fields.iter().map(|(_, ty)| ty.align()).max().unwrap_or(1),
      TyKind::Const(_) | TyKind::RightValue(_) => unreachable!("stripped by unqual()"),
    }
  }

  fn is_identical(&self, other: &Ty) -> bool {
    match (&**self.unqual(), &**other.unqual()) {
      (TyKind::Void, TyKind::Void) => true,
      (TyKind::Int(a), TyKind::Int(b)) => a == b,
      (TyKind::Ptr(a), TyKind::Ptr(b)) => a.is_identical(b),
      (TyKind::Array(a, n), TyKind::Array(b, m)) => n == m && a.is_identical(b),
      (TyKind::Struct(a, _), TyKind::Struct(b, _)) => a == b,
      (TyKind::Func(ap, ar), TyKind::Func(bp, br)) =>
        ar.is_identical(br) && ap.len() == bp.len() &&
        ap.iter().zip(bp).all(|(x, y)| x.is_identical(y)),
      _ => false,
    }
  }

  fn can_accept(&self, rhs: &Ty) -> bool {
    if self.is_const() && !self.is_right_value() { return false }
    match (&**self.unqual(), &**rhs.unqual()) {
      (TyKind::Int(_), TyKind::Int(_)) => true,
      (TyKind::Ptr(a), TyKind::Ptr(b)) => a.is_identical(b),
      // arrays decay to pointers
      (TyKind::Ptr(a), TyKind::Array(b, _)) => a.is_identical(b),
      _ => self.is_identical(rhs),
    }
  }

  fn can_cast_to(&self, target: &Ty) -> bool {
    let castable = |t: &Ty| t.is_integer() || t.is_pointer();
    castable(self) && castable(target)
  }

  fn deref_ty(&self) -> Option<Ty> {
    match &**self.unqual() {
      TyKind::Ptr(inner) | TyKind::Array(inner, _) => Some(inner.clone()),
      _ => None,
    }
  }

  fn array_len(&self) -> Option<u32> {
    if let TyKind::Array(_, n) = **self.unqual() { Some(n) } else { None }
  }

  fn field(&self, name: Symbol) -> Option<(usize, Ty)> {
    if let TyKind::Struct(_, fields) = &**self.unqual() {
      fields.iter().enumerate()
        .find(|(_, (f, _))| *f == name)
        .map(|(i, (_, ty))| (i, ty.clone()))
    } else { None }
  }

  fn field_offset(&self, index: usize) -> Option<u32> {
    if let TyKind::Struct(_, fields) = &**self.unqual() {
      let mut off = 0;
      for (i, (_, ty)) in fields.iter().enumerate() {
        let a = ty.align();
        off = (off + a - 1) / a * a;
        if i == index { return Some(off) }
        off += ty.size();
      }
      None
    } else { None }
  }

  fn value_type(&self, right: bool) -> Ty {
    match (&**self, right) {
      (TyKind::RightValue(inner), false) => inner.clone(),
      (TyKind::RightValue(_), true) | (_, false) => self.clone(),
      (_, true) => Rc::new(TyKind::RightValue(self.clone())),
    }
  }

  fn func_sig(&self) -> Option<(&Vec<Ty>, &Ty)> {
    if let TyKind::Func(params, ret) = &**self.unqual() { Some((params, ret)) } else { None }
  }

  fn common_int_ty(&self, other: &Ty) -> Option<IntTy> {
    let (a, b) = (self.int_ty()?, other.int_ty()?);
    let signed = a.signed() && b.signed();
    Some(if signed { IntTy::Int(Size::S32) } else { IntTy::UInt(Size::S32) })
  }
}

impl std::fmt::Display for TyKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      TyKind::Void => write!(f, "void"),
      TyKind::Int(ity) => write!(f, "{ity}"),
      TyKind::Ptr(inner) => write!(f, "{inner}*"),
      TyKind::Array(inner, n) => write!(f, "{inner}[{n}]"),
      TyKind::Struct(name, _) => write!(f, "struct {name}"),
      TyKind::Func(params, ret) => {
        write!(f, "{ret}(")?;
        for (i, p) in params.iter().enumerate() {
          if i != 0 { write!(f, ", ")? }
          write!(f, "{p}")?;
        }
        write!(f, ")")
      }
      TyKind::Const(inner) => write!(f, "const {inner}"),
      TyKind::RightValue(inner) => write!(f, "{inner}"),
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::intern;

  #[test]
  fn qualifiers() {
    let base = make_i32();
    let c: Ty = Rc::new(TyKind::Const(base.clone()));
    let rv = c.value_type(true);
    assert!(c.is_const() && !c.is_right_value());
    assert!(rv.is_const() && rv.is_right_value());
    assert!(rv.value_type(false).is_const());
    assert!(base.is_identical(&c));
    // a const left-value is not assignable-to
    assert!(!c.can_accept(&base));
    assert!(base.can_accept(&rv));
  }

  #[test]
  fn acceptance() {
    let int = make_i32();
    let u8ty = make_int(IntTy::UInt(Size::S8));
    let arr: Ty = Rc::new(TyKind::Array(int.clone(), 4));
    let ptr = make_ptr(int.clone());
    assert!(int.can_accept(&u8ty));
    assert!(ptr.can_accept(&arr));
    assert!(!int.can_accept(&arr));
    assert!(!arr.can_accept(&ptr));
    assert!(ptr.can_cast_to(&int));
    assert!(!arr.can_cast_to(&int));
  }

  #[test]
  fn layout() {
    let s: Ty = Rc::new(TyKind::Struct(intern("pair"), vec![
      (intern("a"), make_int(IntTy::Int(Size::S8))),
      (intern("b"), make_i32()),
    ]));
    assert_eq!(s.size(), 8);
    assert_eq!(s.align(), 4);
    assert_eq!(s.field_offset(0), Some(0));
    assert_eq!(s.field_offset(1), Some(4));
  }
}
