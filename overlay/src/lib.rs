mod associated;
mod behavior;
mod class;
mod conformance;
pub mod context;
mod dispatch;
mod error;
pub mod notify;
mod object;
pub mod observer;
mod registry;
mod runtime;
mod selector;
mod settings;
mod specialize;
mod stack;
mod value;

pub use associated::*;
pub use behavior::*;
pub use class::*;
pub use conformance::*;
pub use context::{ExecutionFrame, FrameTarget};
pub use dispatch::Supermethod;
pub use error::*;
pub use notify::{Notification, NotificationCenter, SubscriptionId};
pub use object::*;
pub use observer::{Change, ObserverToken, ObservingOptions};
pub use registry::{OverrideRegistry, Scope, ScopeId};
pub use runtime::{Runtime, RuntimeId};
pub use selector::*;
pub use settings::*;
pub use specialize::ShadowTable;
pub use stack::*;
pub use value::*;
