use std::{fmt, rc::Rc};

/// A runtime value
///
/// The control core only needs values for block names, catch tags, tagbody
/// labels, dynamic variables, and the evaluation stack, so the variant set is
/// deliberately small. Equality is value equality; catch tags in particular
/// match by `==`, never by the lexical name used at the catch site.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Value {
    /// The empty value, also the false-ish list terminator
    #[default]
    Nil,
    /// True or false
    Bool(bool),
    /// A signed integer
    Int(i64),
    /// A symbol, compared by name
    Symbol(Rc<str>),
    /// An immutable string
    Str(Rc<str>),
    /// An immutable list of values
    List(Rc<[Value]>),
}

impl Value {
    /// Makes a symbol value from a name
    pub fn symbol(name: &str) -> Self {
        Self::Symbol(Rc::from(name))
    }

    /// Makes a string value
    pub fn string(s: &str) -> Self {
        Self::Str(Rc::from(s))
    }

    /// Makes a list value
    pub fn list(items: impl Into<Rc<[Value]>>) -> Self {
        Self::List(items.into())
    }

    /// Returns the symbol's name, or `None` for other variants
    pub fn as_symbol(&self) -> Option<&Rc<str>> {
        match self {
            Self::Symbol(name) => Some(name),
            _ => None,
        }
    }

    /// Everything is truthy except `Nil` and `Bool(false)`
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Self::Nil | Self::Bool(false))
    }

    /// A display name for the value's type
    pub fn type_as_string(&self) -> &'static str {
        match self {
            Self::Nil => "nil",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Symbol(_) => "symbol",
            Self::Str(_) => "string",
            Self::List(_) => "list",
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nil => f.write_str("nil"),
            Self::Bool(true) => f.write_str("t"),
            Self::Bool(false) => f.write_str("false"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Symbol(name) => f.write_str(name),
            Self::Str(s) => write!(f, "\"{s}\""),
            Self::List(items) => {
                f.write_str("(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str(")")
            }
        }
    }
}
