//! Faults raised inside the VM and how they map onto status codes.

use crate::Status;
use moonstack_core::Value;

/// A fault travelling toward the nearest protected boundary.
#[derive(Clone, Debug, thiserror::Error)]
pub enum LuaError {
    /// Runtime fault carrying a message, usually with a `source:line:` prefix.
    #[error("{0}")]
    Runtime(String),
    /// `error(v)` with a value that is not a string.
    #[error("(error object is a {} value)", .0.type_name())]
    Value(Value),
    #[error("{0}")]
    Syntax(String),
    #[error("{0}")]
    File(String),
    #[error("not enough memory")]
    OutOfMemory,
    /// The error handler itself faulted.
    #[error("error in error handling")]
    ErrorHandler(Box<LuaError>),
    #[error("{0}")]
    StackOverflow(String),
    /// Host misuse of the API. Never caught by a protected call.
    #[error("API contract violation: {0}")]
    ContractViolation(String),
    /// A coroutine is suspending. Only `resume` consumes this.
    #[error("attempt to yield across a native boundary")]
    Yield,
}

pub type LuaResult<T> = Result<T, LuaError>;

impl LuaError {
    pub fn runtime(msg: impl Into<String>) -> Self {
        LuaError::Runtime(msg.into())
    }

    pub fn contract(msg: impl Into<String>) -> Self {
        LuaError::ContractViolation(msg.into())
    }

    /// The status a protected boundary reports for this fault.
    pub fn status(&self) -> Status {
        match self {
            LuaError::Runtime(_)
            | LuaError::Value(_)
            | LuaError::StackOverflow(_)
            | LuaError::ContractViolation(_) => Status::ErrRun,
            LuaError::Syntax(_) => Status::ErrSyntax,
            LuaError::File(_) => Status::ErrFile,
            LuaError::OutOfMemory => Status::ErrMem,
            LuaError::ErrorHandler(_) => Status::ErrErr,
            LuaError::Yield => Status::Yield,
        }
    }

    /// Whether `pcall` may convert this fault into a status.
    pub fn is_catchable(&self) -> bool {
        !matches!(self, LuaError::ContractViolation(_) | LuaError::Yield)
    }
}
