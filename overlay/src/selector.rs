use std::{fmt, sync::Arc};

use uuid::Uuid;

macro_rules! name_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(Arc<str>);

        impl $name {
            pub fn new(name: impl AsRef<str>) -> Self {
                Self(Arc::from(name.as_ref()))
            }

            #[inline]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:?})", stringify!($name), &*self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(Arc::from(value))
            }
        }
    };
}

name_type! {
    /// A method name. Selectors compare by name, so two selectors built from
    /// the same string dispatch to the same method.
    Selector
}

name_type! {
    /// A named capability an object may report conformance to.
    Interface
}

name_type! {
    /// Distinguishes independently removable overrides stacked on the same
    /// scope and selector.
    OverrideKey
}

impl OverrideKey {
    /// A fresh key for callers that do not care about naming their override.
    pub fn generate() -> Self {
        let id = Uuid::new_v4();
        let mut buf = Uuid::encode_buffer();
        Self::new(id.hyphenated().encode_upper(&mut buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selectors_compare_by_name() {
        assert_eq!(Selector::new("say"), Selector::from("say"));
        assert_ne!(Selector::new("say"), Selector::new("log"));
    }

    #[test]
    fn generated_keys_are_distinct_uuids() {
        let a = OverrideKey::generate();
        let b = OverrideKey::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
        assert!(Uuid::parse_str(a.as_str()).is_ok());
    }
}
