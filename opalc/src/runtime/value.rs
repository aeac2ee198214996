///
/// Runtime Values
///
/// The interpreter's value representation. Containers use shared interior
/// mutability (Rc<RefCell<...>>) because Opal assignment semantics are
/// reference semantics for mutable containers: two bindings naming the same
/// mut list observe each other's writes.
///
/// Struct fields keep declaration order (IndexMap) so that printed values
/// and iteration are deterministic.
///

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use lasso::Spur;

use crate::ast::Block;
use crate::typechecker::types::Type;

#[derive(Debug, Clone)]
pub enum Value {
    Nothing,
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Bool(bool),
    List(Rc<RefCell<Vec<Value>>>),
    Tuple(Rc<Vec<Value>>),
    Struct(Rc<RefCell<IndexMap<String, Value>>>),
    Procedure(Rc<ProcedureValue>),
    /// A user-defined nominal wrapper around its body value.
    Wrapped { type_name: Rc<str>, inner: Rc<Value> },
}

/// A callable value: a declared procedure or a lambda. Lambdas carry the
/// snapshot of every outer binding the checker recorded as captured.
#[derive(Debug)]
pub struct ProcedureValue {
    pub params: Vec<(Spur, Type)>,
    pub body: Block,
    pub captured: Vec<(Spur, Type, Value)>,
    pub is_lambda: bool,
}

impl Value {
    pub fn str(s: impl AsRef<str>) -> Value {
        Value::Str(Rc::from(s.as_ref()))
    }

    pub fn list(values: Vec<Value>) -> Value {
        Value::List(Rc::new(RefCell::new(values)))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nothing => "nothing",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Bool(_) => "bool",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Struct(_) => "struct",
            Value::Procedure(_) => "procedure",
            Value::Wrapped { .. } => "user-defined",
        }
    }

    pub fn is_truthy(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nothing, Value::Nothing) => true,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::List(a), Value::List(b)) => *a.borrow() == *b.borrow(),
            (Value::Tuple(a), Value::Tuple(b)) => a == b,
            (Value::Struct(a), Value::Struct(b)) => *a.borrow() == *b.borrow(),
            // Procedure values compare by identity.
            (Value::Procedure(a), Value::Procedure(b)) => Rc::ptr_eq(a, b),
            (
                Value::Wrapped { type_name: an, inner: av },
                Value::Wrapped { type_name: bn, inner: bv },
            ) => an == bn && av == bv,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nothing => write!(f, "nothing"),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Str(s) => write!(f, "{}", s),
            Value::Bool(b) => write!(f, "{}", b),
            Value::List(values) => {
                write!(f, "[")?;
                for (i, v) in values.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
            Value::Tuple(values) => {
                write!(f, "(")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, ")")
            }
            Value::Struct(fields) => {
                write!(f, "{{")?;
                for (i, (name, v)) in fields.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", name, v)?;
                }
                write!(f, "}}")
            }
            Value::Procedure(_) => write!(f, "<procedure>"),
            Value::Wrapped { type_name, inner } => write!(f, "{}({})", type_name, inner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_equality() {
        assert_eq!(Value::Int(3), Value::Int(3));
        assert_ne!(Value::Int(3), Value::Float(3.0));
        assert_eq!(
            Value::list(vec![Value::Int(1), Value::Int(2)]),
            Value::list(vec![Value::Int(1), Value::Int(2)])
        );
    }

    #[test]
    fn test_list_values_share_storage() {
        let a = Value::list(vec![Value::Int(1)]);
        let b = a.clone();
        if let Value::List(cell) = &a {
            cell.borrow_mut().push(Value::Int(2));
        }
        assert_eq!(a, b);
    }

    #[test]
    fn test_display() {
        let v = Value::list(vec![Value::Int(1), Value::str("x")]);
        assert_eq!(v.to_string(), "[1, x]");
    }
}
