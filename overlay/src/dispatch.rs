use std::{fmt, sync::Arc};

use crate::{
    Behavior, ClassId, DispatchError, DispatchResult, Fallback, Message, MethodKind, OverrideKey,
    OverrideStack, Receiver, Runtime, Scope, Selector, Signature, Value,
    context::{self, ExecutionFrame, FrameGuard, FrameTarget},
};

/// The implementation a send resolved to.
#[derive(Clone)]
pub(crate) enum Target {
    Override {
        scope: Scope,
        stack: Arc<OverrideStack>,
        position: usize,
    },
    Native(Behavior),
}

/// The implementation beneath the running override, bound to the receiver
/// and selector of the send that is running it.
#[derive(Clone)]
pub struct Supermethod {
    runtime: Runtime,
    receiver: Receiver,
    selector: Selector,
    target: Target,
}

impl Target {
    fn behavior(&self) -> &Behavior {
        match self {
            Target::Override {
                stack, position, ..
            } => match stack.record(*position) {
                Some(record) => &record.behavior,
                None => unreachable!("frame position {position} outside its stack"),
            },
            Target::Native(behavior) => behavior,
        }
    }
}

impl Supermethod {
    pub fn call(&self, args: &[Value]) -> DispatchResult {
        self.runtime
            .invoke(&self.receiver, &self.selector, args, self.target.clone())
    }

    /// Key of the override this calls into, `None` for an original method.
    pub fn key(&self) -> Option<&OverrideKey> {
        match &self.target {
            Target::Override {
                stack, position, ..
            } => stack.record(*position).map(|r| &r.key),
            Target::Native(_) => None,
        }
    }

    pub fn is_original(&self) -> bool {
        matches!(self.target, Target::Native(_))
    }

    pub fn signature(&self) -> Signature {
        self.target.behavior().signature()
    }
}

impl fmt::Debug for Supermethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Supermethod")
            .field("receiver", &self.receiver)
            .field("selector", &self.selector)
            .field("key", &self.key())
            .finish()
    }
}

impl Runtime {
    /// Send `selector` to `receiver`.
    ///
    /// An instance-scoped override of a specialized object wins, then the
    /// class chain is walked from the object's logical class: at each class
    /// the newest type-scoped override wins over the method the class
    /// declares. Without either the send fails with
    /// [`DispatchError::DoesNotUnderstand`], as does any send to an object
    /// of another runtime.
    pub fn send(
        &self,
        receiver: impl Into<Receiver>,
        selector: impl Into<Selector>,
        args: &[Value],
    ) -> DispatchResult {
        let receiver = receiver.into();
        let selector = selector.into();
        self.dispatch(&receiver, &selector, args)
    }

    pub fn dispatch(&self, receiver: &Receiver, selector: &Selector, args: &[Value]) -> DispatchResult {
        log::trace!("[{}] send {selector} to {receiver:?}", self.settings().name);
        match self.resolve(receiver, selector) {
            Some(target) => self.invoke(receiver, selector, args, target),
            None => Err(DispatchError::DoesNotUnderstand {
                class: self.receiver_class_name(receiver),
                selector: selector.clone(),
            }),
        }
    }

    pub fn responds_to(&self, receiver: impl Into<Receiver>, selector: impl Into<Selector>) -> bool {
        self.resolve(&receiver.into(), &selector.into()).is_some()
    }

    /// The implementation beneath the override running on this thread, or
    /// `None` when there is nothing beneath it or no override is running.
    pub fn supermethod(&self) -> Option<Supermethod> {
        let frame = context::current_frame_for(self.id())?;
        let FrameTarget::Override {
            scope,
            position,
            stack,
            ..
        } = &frame.target
        else {
            return None;
        };
        let target = match position.checked_sub(1) {
            Some(below) => Target::Override {
                scope: scope.clone(),
                stack: stack.clone(),
                position: below,
            },
            None => self.resolve_fallback(stack.fallback(), scope.method_kind(), &frame.selector)?,
        };
        Some(Supermethod {
            runtime: self.clone(),
            receiver: frame.receiver.clone(),
            selector: frame.selector.clone(),
            target,
        })
    }

    /// Remove the override running on this thread. Sends already under way,
    /// this one included, keep the stack they resolved; later sends no longer
    /// see the override. Does nothing outside an override.
    pub fn remove_current(&self) {
        let Some(frame) = context::current_frame_for(self.id()) else {
            return;
        };
        if let FrameTarget::Override { scope, key, .. } = &frame.target {
            self.remove(scope, frame.selector.clone(), key);
        }
    }

    /// Key of the override running on this thread.
    pub fn current_key(&self) -> Option<OverrideKey> {
        context::current_frame_for(self.id())?.key().cloned()
    }

    pub(crate) fn resolve(&self, receiver: &Receiver, selector: &Selector) -> Option<Target> {
        match receiver {
            Receiver::Object(object) if !self.owns(object) => None,
            Receiver::Object(object) => {
                if let Some(state) = self.local_state(object) {
                    if let Some(stack) = state.stacks.get(selector) {
                        if let Some(position) = stack.top() {
                            return Some(Target::Override {
                                scope: Scope::Instance(object.clone()),
                                stack,
                                position,
                            });
                        }
                    }
                }
                self.resolve_from(self.class_of(object), MethodKind::Instance, selector)
            }
            Receiver::Class(class) => self.resolve_from(*class, MethodKind::Class, selector),
        }
    }

    /// Walk the class chain starting at `class`.
    fn resolve_from(&self, class: ClassId, kind: MethodKind, selector: &Selector) -> Option<Target> {
        for class in self.classes().ancestry(class) {
            let address = (class.id(), kind, selector.clone());
            if let Some(stack) = self.shared.registry.stacks.get(&address) {
                if let Some(position) = stack.top() {
                    let scope = match kind {
                        MethodKind::Instance => Scope::Class(class.id()),
                        MethodKind::Class => Scope::ClassObject(class.id()),
                    };
                    return Some(Target::Override {
                        scope,
                        stack,
                        position,
                    });
                }
            }
            if let Some(method) = class.method(kind, selector) {
                return Some(Target::Native(method));
            }
        }
        None
    }

    fn resolve_fallback(&self, fallback: &Fallback, kind: MethodKind, selector: &Selector) -> Option<Target> {
        match fallback {
            Fallback::Native(method) => Some(Target::Native(method.clone())),
            Fallback::Inherited(class) => self.resolve_from(*class, kind, selector),
            Fallback::Unimplemented => None,
        }
    }

    /// Signature of whatever `receiver` currently answers `selector` with.
    pub(crate) fn signature_of(&self, receiver: &Receiver, selector: &Selector) -> Signature {
        self.resolve(receiver, selector)
            .map(|target| target.behavior().signature())
            .unwrap_or_default()
    }

    pub(crate) fn signature_at(&self, class: ClassId, kind: MethodKind, selector: &Selector) -> Signature {
        self.resolve_from(class, kind, selector)
            .map(|target| target.behavior().signature())
            .unwrap_or_default()
    }

    /// Run `target` inside a fresh frame.
    pub(crate) fn invoke(
        &self,
        receiver: &Receiver,
        selector: &Selector,
        args: &[Value],
        target: Target,
    ) -> DispatchResult {
        let behavior = target.behavior().clone();
        if self.settings().check_arity {
            if let Some(expected) = behavior.signature().arity {
                if expected != args.len() {
                    return Err(DispatchError::ArityMismatch {
                        selector: selector.clone(),
                        expected,
                        got: args.len(),
                    });
                }
            }
        }

        let frame_target = match target {
            Target::Override {
                scope,
                stack,
                position,
            } => {
                let key = match stack.record(position) {
                    Some(record) => record.key.clone(),
                    None => unreachable!("frame position {position} outside its stack"),
                };
                FrameTarget::Override {
                    scope,
                    key,
                    position,
                    stack,
                }
            }
            Target::Native(_) => FrameTarget::Original,
        };
        let frame = ExecutionFrame {
            runtime: self.id(),
            receiver: receiver.clone(),
            selector: selector.clone(),
            target: frame_target,
        };
        let _guard = FrameGuard::push(frame, self.settings().max_dispatch_depth)?;

        behavior.call(&Message {
            runtime: self,
            receiver,
            selector,
            args,
        })
    }

    fn receiver_class_name(&self, receiver: &Receiver) -> String {
        let class = match receiver {
            Receiver::Object(object) if !self.owns(object) => {
                return format!("object {} of a foreign runtime", object.id().0);
            }
            Receiver::Object(object) => self.class_of(object),
            Receiver::Class(class) => *class,
        };
        self.classes()
            .get(class)
            .map(|c| c.name().to_owned())
            .unwrap_or_else(|| format!("{class:?}"))
    }
}
