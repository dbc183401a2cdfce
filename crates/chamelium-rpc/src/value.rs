use std::fmt;

/// A decoded XML-RPC value.
///
/// Struct members keep their wire order; XML-RPC does not require member
/// ordering but the appliance emits a stable one and tests rely on
/// deterministic re-encoding.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i32),
    Bool(bool),
    Str(String),
    Double(f64),
    Bytes(Vec<u8>),
    Array(Vec<Value>),
    Struct(Vec<(String, Value)>),
    Nil,
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Bool(_) => "boolean",
            Value::Str(_) => "string",
            Value::Double(_) => "double",
            Value::Bytes(_) => "base64",
            Value::Array(_) => "array",
            Value::Struct(_) => "struct",
            Value::Nil => "nil",
        }
    }

    pub fn as_int(&self) -> Result<i32, RpcError> {
        match self {
            Value::Int(v) => Ok(*v),
            other => Err(RpcError::unexpected("int", other)),
        }
    }

    pub fn as_bool(&self) -> Result<bool, RpcError> {
        match self {
            Value::Bool(v) => Ok(*v),
            // The appliance occasionally reports booleans as 0/1 ints.
            Value::Int(v) => Ok(*v != 0),
            other => Err(RpcError::unexpected("boolean", other)),
        }
    }

    pub fn as_str(&self) -> Result<&str, RpcError> {
        match self {
            Value::Str(v) => Ok(v),
            other => Err(RpcError::unexpected("string", other)),
        }
    }

    pub fn as_bytes(&self) -> Result<&[u8], RpcError> {
        match self {
            Value::Bytes(v) => Ok(v),
            other => Err(RpcError::unexpected("base64", other)),
        }
    }

    pub fn as_array(&self) -> Result<&[Value], RpcError> {
        match self {
            Value::Array(v) => Ok(v),
            other => Err(RpcError::unexpected("array", other)),
        }
    }

    /// Looks up a struct member by name.
    pub fn struct_field(&self, name: &str) -> Result<&Value, RpcError> {
        match self {
            Value::Struct(members) => members
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v)
                .ok_or_else(|| RpcError::Malformed(format!("struct has no member {name:?}"))),
            other => Err(RpcError::unexpected("struct", other)),
        }
    }
}

/// A positional call argument.
///
/// Each argument carries its own type tag, and [`Arg::Omitted`] is skipped
/// entirely when the request is built: the appliance distinguishes
/// "argument absent" from "argument zero" for capture crop rectangles.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Int(i32),
    Bool(bool),
    Array(Vec<Arg>),
    Blob(Vec<u8>),
    Omitted,
}

/// An application-level fault reported by the appliance, or a synthesized
/// fault describing a transport/decoding failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    pub code: i32,
    pub message: String,
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fault {}: {}", self.code, self.message)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("appliance reported {0}")]
    Fault(Fault),
    #[error("invalid endpoint url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected http status {0}")]
    HttpStatus(u16),
    #[error("response of {len} bytes exceeds the {max} byte limit")]
    ResponseTooLarge { len: usize, max: usize },
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("expected {expected} value, got {got}")]
    UnexpectedType {
        expected: &'static str,
        got: &'static str,
    },
}

impl RpcError {
    pub(crate) fn unexpected(expected: &'static str, got: &Value) -> RpcError {
        RpcError::UnexpectedType {
            expected,
            got: got.type_name(),
        }
    }

    /// Renders this error as fault state: application faults pass through,
    /// everything else becomes a code-0 fault carrying the error text.
    /// Network failures, malformed replies and application faults all
    /// surface the same way, and callers probe firmware capabilities by
    /// inspecting the fault string.
    pub fn to_fault(&self) -> Fault {
        match self {
            RpcError::Fault(fault) => fault.clone(),
            other => Fault {
                code: 0,
                message: other.to_string(),
            },
        }
    }
}
