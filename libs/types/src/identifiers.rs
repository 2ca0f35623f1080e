//! Typed integer identifiers
//!
//! Zero-cost wrappers that keep logical keys, registry namespaces and raw
//! integers from being confused in function signatures.

/// Generates a `#[repr(transparent)]` wrapper around an integer id
#[macro_export]
macro_rules! define_typed_id {
    (
        $(#[$meta:meta])*
        $name:ident, $inner:ty
    ) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default,
            ::serde::Serialize, ::serde::Deserialize,
        )]
        #[serde(transparent)]
        #[repr(transparent)]
        pub struct $name(pub $inner);

        impl $name {
            #[inline(always)]
            pub const fn new(inner: $inner) -> Self {
                Self(inner)
            }

            #[inline(always)]
            pub const fn inner(self) -> $inner {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<$inner> for $name {
            #[inline(always)]
            fn from(inner: $inner) -> Self {
                Self(inner)
            }
        }

        impl From<$name> for $inner {
            #[inline(always)]
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_typed_id!(
    /// Stable logical identity of a distributed object; never changes across migrations
    LocationKey, i64
);

define_typed_id!(
    /// Registry namespace: the same key may be registered once per type
    LocationType, u32
);

impl LocationType {
    pub const DEFAULT: LocationType = LocationType(0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_ids_are_transparent() {
        assert_eq!(std::mem::size_of::<LocationKey>(), 8);
        assert_eq!(LocationKey::from(100).inner(), 100);
        assert_eq!(i64::from(LocationKey::new(7)), 7);
        assert_eq!(LocationType::new(3).to_string(), "3");
        assert_eq!(bincode::serialize(&LocationKey(5)).unwrap(), 5i64.to_le_bytes());
    }
}
