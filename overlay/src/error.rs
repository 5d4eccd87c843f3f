use thiserror::Error;

use crate::{ClassId, Selector};

/// Failures raised while sending a message.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DispatchError {
    /// Neither an override nor a declared method answers the selector.
    #[error("{class} does not understand {selector}")]
    DoesNotUnderstand { class: String, selector: Selector },
    #[error("{selector} takes {expected} arguments, got {got}")]
    ArityMismatch {
        selector: Selector,
        expected: usize,
        got: usize,
    },
    #[error("dispatch nesting exceeded {depth} frames")]
    StackOverflow { depth: usize },
    /// Raised by a method or override body.
    #[error("{0}")]
    Failed(String),
}

/// Failures raised while installing an override.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OverrideError {
    #[error("instances of {class} cannot be specialized")]
    SpecializationUnsupported { class: String },
    #[error("unknown class {0:?}")]
    UnknownClass(ClassId),
}

pub type DispatchResult = Result<crate::Value, DispatchError>;
