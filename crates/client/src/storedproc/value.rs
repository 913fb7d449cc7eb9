use std::fmt;

/// Dynamically-typed argument/result value for stored-procedure calls.
///
/// `Vector` is a fixed-arity ordered sequence; `List` is an ordered
/// sequence that additionally carries a trailing null sentinel on the wire.
/// Both exist because the server distinguishes them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SerialValue {
    Str(String),
    Int(i64),
    Null,
    Vector(Vec<SerialValue>),
    List(Vec<SerialValue>),
    Bytes(Vec<u8>),
}

impl SerialValue {
    pub fn vector(items: impl IntoIterator<Item = SerialValue>) -> Self {
        SerialValue::Vector(items.into_iter().collect())
    }

    pub fn list(items: impl IntoIterator<Item = SerialValue>) -> Self {
        SerialValue::List(items.into_iter().collect())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SerialValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            SerialValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SerialValue::Null)
    }
}

impl From<&str> for SerialValue {
    fn from(value: &str) -> Self {
        SerialValue::Str(value.to_string())
    }
}

impl From<String> for SerialValue {
    fn from(value: String) -> Self {
        SerialValue::Str(value)
    }
}

impl From<i64> for SerialValue {
    fn from(value: i64) -> Self {
        SerialValue::Int(value)
    }
}

impl From<i32> for SerialValue {
    fn from(value: i32) -> Self {
        SerialValue::Int(value as i64)
    }
}

impl From<Vec<u8>> for SerialValue {
    fn from(value: Vec<u8>) -> Self {
        SerialValue::Bytes(value)
    }
}

impl<T: Into<SerialValue>> From<Option<T>> for SerialValue {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => SerialValue::Null,
        }
    }
}

impl fmt::Display for SerialValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SerialValue::Str(s) => write!(f, "{s:?}"),
            SerialValue::Int(i) => write!(f, "{i}"),
            SerialValue::Null => write!(f, "null"),
            SerialValue::Vector(items) | SerialValue::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            SerialValue::Bytes(b) => write!(f, "#[{} bytes]", b.len()),
        }
    }
}
