//! Per-thread record of which implementation is running.
//!
//! Every body the dispatcher runs gets a frame pushed right before it runs
//! and popped right after, including when it returns an error or panics.
//! Nested sends on one thread stack their frames; other threads have their
//! own stack and never see these frames.

use std::{cell::RefCell, marker::PhantomData, sync::Arc};

use crate::{DispatchError, OverrideKey, OverrideStack, Receiver, RuntimeId, Scope, Selector};

thread_local! {
    static FRAMES: RefCell<Vec<ExecutionFrame>> = const { RefCell::new(Vec::new()) };
}

/// What a frame is executing.
#[derive(Debug, Clone)]
pub enum FrameTarget {
    /// The override at `position` of the `stack` snapshot the send resolved.
    Override {
        scope: Scope,
        key: OverrideKey,
        position: usize,
        stack: Arc<OverrideStack>,
    },
    /// A method a class declared.
    Original,
}

#[derive(Debug, Clone)]
pub struct ExecutionFrame {
    pub runtime: RuntimeId,
    pub receiver: Receiver,
    pub selector: Selector,
    pub target: FrameTarget,
}

/// Pops its frame on drop. Not `Send`: it must be dropped on the thread
/// whose stack it pushed to.
pub(crate) struct FrameGuard {
    depth: usize,
    _not_send: PhantomData<*const ()>,
}

impl ExecutionFrame {
    pub fn key(&self) -> Option<&OverrideKey> {
        match &self.target {
            FrameTarget::Override { key, .. } => Some(key),
            FrameTarget::Original => None,
        }
    }

    pub fn is_type_scoped(&self) -> bool {
        match &self.target {
            FrameTarget::Override { scope, .. } => scope.is_type_scoped(),
            FrameTarget::Original => false,
        }
    }
}

impl FrameGuard {
    /// Push `frame`, refusing when the thread already holds `max_depth` frames.
    pub(crate) fn push(frame: ExecutionFrame, max_depth: usize) -> Result<Self, DispatchError> {
        FRAMES.with(|frames| {
            let mut frames = frames.borrow_mut();
            if frames.len() >= max_depth {
                return Err(DispatchError::StackOverflow { depth: max_depth });
            }
            log::trace!(
                "push frame {} {:?} on {:?}",
                frames.len(),
                frame.selector,
                frame.receiver
            );
            frames.push(frame);
            Ok(Self {
                depth: frames.len(),
                _not_send: PhantomData,
            })
        })
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        let _ = FRAMES.try_with(|frames| {
            let mut frames = frames.borrow_mut();
            debug_assert_eq!(
                frames.len(),
                self.depth,
                "execution frames popped out of order"
            );
            frames.pop();
        });
    }
}

/// The innermost frame on this thread, if any body is running.
pub fn current_frame() -> Option<ExecutionFrame> {
    FRAMES.with(|frames| frames.borrow().last().cloned())
}

/// The innermost frame if it belongs to `runtime`.
pub(crate) fn current_frame_for(runtime: RuntimeId) -> Option<ExecutionFrame> {
    FRAMES.with(|frames| {
        frames
            .borrow()
            .last()
            .filter(|frame| frame.runtime == runtime)
            .cloned()
    })
}

/// Number of frames on this thread.
pub fn depth() -> usize {
    FRAMES.with(|frames| frames.borrow().len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ClassId;

    fn frame(runtime: u64, selector: &str) -> ExecutionFrame {
        ExecutionFrame {
            runtime: RuntimeId(runtime),
            receiver: Receiver::Class(ClassId(0)),
            selector: Selector::new(selector),
            target: FrameTarget::Original,
        }
    }

    #[test]
    fn guards_nest_and_unwind() {
        assert!(current_frame().is_none());
        {
            let _outer = FrameGuard::push(frame(1, "outer"), 8).unwrap();
            {
                let _inner = FrameGuard::push(frame(1, "inner"), 8).unwrap();
                assert_eq!(depth(), 2);
                assert_eq!(current_frame().unwrap().selector.as_str(), "inner");
            }
            assert_eq!(current_frame().unwrap().selector.as_str(), "outer");
        }
        assert_eq!(depth(), 0);
    }

    #[test]
    fn depth_limit() {
        let _a = FrameGuard::push(frame(1, "a"), 1).unwrap();
        let err = FrameGuard::push(frame(1, "b"), 1).err();
        assert_eq!(err, Some(DispatchError::StackOverflow { depth: 1 }));
        assert_eq!(depth(), 1);
    }

    #[test]
    fn frames_are_filtered_by_runtime() {
        let _a = FrameGuard::push(frame(1, "a"), 8).unwrap();
        assert!(current_frame_for(RuntimeId(1)).is_some());
        assert!(current_frame_for(RuntimeId(2)).is_none());
    }

    #[test]
    fn frames_pop_on_panic() {
        let result = std::panic::catch_unwind(|| {
            let _a = FrameGuard::push(frame(1, "a"), 8).unwrap();
            panic!("body failed");
        });
        assert!(result.is_err());
        assert_eq!(depth(), 0);
    }

    #[test]
    fn threads_do_not_share_frames() {
        let _a = FrameGuard::push(frame(1, "main"), 8).unwrap();
        let seen = std::thread::spawn(depth).join().unwrap();
        assert_eq!(seen, 0);
    }
}
