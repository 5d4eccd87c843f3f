use std::{fmt, sync::Arc};

use crate::{DispatchResult, Receiver, Runtime, Selector, Supermethod, Value};

type Body = dyn Fn(&Message<'_>) -> DispatchResult + Send + Sync;

/// Calling convention of a callable, as far as the engine needs to know it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Signature {
    /// Number of arguments, excluding the receiver. `None` accepts anything.
    pub arity: Option<usize>,
}

/// A callable method body together with the state it captured.
///
/// Used both for the methods a class declares and for overrides.
#[derive(Clone)]
pub struct Behavior {
    body: Arc<Body>,
    signature: Signature,
}

/// One message send as seen by the body handling it.
pub struct Message<'a> {
    pub runtime: &'a Runtime,
    pub receiver: &'a Receiver,
    pub selector: &'a Selector,
    pub args: &'a [Value],
}

impl Behavior {
    pub fn new<F>(body: F) -> Self
    where
        F: Fn(&Message<'_>) -> DispatchResult + Send + Sync + 'static,
    {
        Self {
            body: Arc::new(body),
            signature: Signature::default(),
        }
    }

    pub fn with_arity<F>(arity: usize, body: F) -> Self
    where
        F: Fn(&Message<'_>) -> DispatchResult + Send + Sync + 'static,
    {
        Self {
            body: Arc::new(body),
            signature: Signature { arity: Some(arity) },
        }
    }

    #[inline]
    pub fn signature(&self) -> Signature {
        self.signature
    }

    /// Adopt `signature` unless this behavior declared its own.
    pub(crate) fn inheriting(mut self, signature: Signature) -> Self {
        if self.signature.arity.is_none() {
            self.signature = signature;
        }
        self
    }

    #[inline]
    pub(crate) fn call(&self, message: &Message<'_>) -> DispatchResult {
        (self.body)(message)
    }

    pub fn ptr_eq(&self, other: &Behavior) -> bool {
        Arc::ptr_eq(&self.body, &other.body)
    }
}

impl fmt::Debug for Behavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Behavior")
            .field("signature", &self.signature)
            .finish_non_exhaustive()
    }
}

impl Message<'_> {
    /// Argument `index`, or nil when the sender passed fewer.
    pub fn arg(&self, index: usize) -> Value {
        self.args.get(index).cloned().unwrap_or_default()
    }

    /// The implementation the running override shadows.
    pub fn supermethod(&self) -> Option<Supermethod> {
        self.runtime.supermethod()
    }

    /// Invoke the shadowed implementation, or answer nil if there is none.
    pub fn call_super(&self, args: &[Value]) -> DispatchResult {
        match self.supermethod() {
            Some(supermethod) => supermethod.call(args),
            None => Ok(Value::Nil),
        }
    }

    /// Forward this very send to the shadowed implementation.
    pub fn forward(&self) -> DispatchResult {
        self.call_super(self.args)
    }

    /// Unregister the running override for future sends.
    pub fn remove_current(&self) {
        self.runtime.remove_current()
    }
}
