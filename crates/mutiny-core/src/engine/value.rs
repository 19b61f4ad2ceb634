//! Runtime value representation

use std::rc::Rc;

use crate::llir::Const;

/// A value flowing through executed code
///
/// Reference types are `Rc`-shared; execution is single-threaded within a
/// process, and values never cross the fork boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// The unit (void) value
    Unit,

    /// 64-bit signed integer
    I64(i64),

    /// 64-bit float
    F64(f64),

    /// Raw pointer carried as an integer
    Ptr(u64),

    /// Immutable string
    Str(Rc<str>),

    /// Immutable list
    List(Rc<Vec<Value>>),

    /// Function reference by unmangled symbol name
    Func(Rc<str>),
}

impl Value {
    /// Shorthand string constructor
    #[must_use]
    pub fn str(value: impl AsRef<str>) -> Self {
        Value::Str(Rc::from(value.as_ref()))
    }

    /// Shorthand list constructor
    #[must_use]
    pub fn list(values: Vec<Value>) -> Self {
        Value::List(Rc::new(values))
    }

    /// Materialise an IR constant
    #[must_use]
    pub fn from_const(constant: &Const) -> Self {
        match constant {
            Const::Unit => Value::Unit,
            Const::I64(v) => Value::I64(*v),
            Const::F64(v) => Value::F64(*v),
            Const::Ptr(v) => Value::Ptr(*v),
            Const::Str(s) => Value::str(s),
            Const::List(items) => Value::list(items.iter().map(Value::from_const).collect()),
            Const::Func(name) => Value::Func(Rc::from(name.as_str())),
        }
    }

    /// Short type name for diagnostics
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Unit => "unit",
            Value::I64(_) => "i64",
            Value::F64(_) => "f64",
            Value::Ptr(_) => "ptr",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Func(_) => "func",
        }
    }

    /// The integer payload, if this is an `I64`
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I64(v) => Some(*v),
            _ => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Unit => write!(f, "()"),
            Value::I64(v) => write!(f, "{v}"),
            Value::F64(v) => write!(f, "{v}"),
            Value::Ptr(v) => write!(f, "0x{v:x}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::List(values) => {
                write!(f, "[")?;
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{value}")?;
                }
                write!(f, "]")
            }
            Value::Func(name) => write!(f, "<fn {name}>"),
        }
    }
}
