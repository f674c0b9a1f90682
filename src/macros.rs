#![allow(unused_macros)]

/// Defines a `u32`-backed arena index newtype.
///
/// ```rust, ignore
///  id_type!(
///      /// Index of a class in the program arena.
///      ClassId
///  );
///  let id = ClassId::new(3);
///  assert_eq!(id.index(), 3);
/// ```
macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u32);

        impl $name {
            /// Creates an id from a raw arena index.
            #[must_use]
            pub const fn new(index: u32) -> Self {
                Self(index)
            }

            /// Returns the raw arena index.
            #[must_use]
            pub const fn index(self) -> usize {
                self.0 as usize
            }

            #[allow(clippy::cast_possible_truncation)]
            pub(crate) fn from_usize(index: usize) -> Self {
                Self(index as u32)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

/// Helper macro for the common "append and return the new id" arena operation
///
/// ```rust, ignore
///  let id = push_arena!(self.classes, ClassId, class);
/// ```
macro_rules! push_arena {
    ($arena:expr, $id:ident, $item:expr) => {{
        let id = $id::from_usize($arena.len());
        $arena.push($item);
        id
    }};
}
