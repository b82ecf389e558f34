//! Strongly-typed identifiers.
//!
//! All ids are integers on the wire (`{"id": 42}`) and big-endian
//! 8-byte keys in the store, so lexicographic key order equals numeric
//! order.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! integer_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            /// Big-endian key bytes.
            pub fn to_key(self) -> [u8; 8] {
                self.0.to_be_bytes()
            }

            /// Parse from the first 8 bytes of a key. `None` if too short.
            pub fn from_key(bytes: &[u8]) -> Option<Self> {
                let buf: [u8; 8] = bytes.get(..8)?.try_into().ok()?;
                Some(Self(u64::from_be_bytes(buf)))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(v: u64) -> Self {
                Self(v)
            }
        }
    };
}

integer_id!(
    /// Study group identifier. Also addresses the group's room.
    GroupId
);
integer_id!(
    /// User identifier, issued by the external identity directory.
    UserId
);
integer_id!(
    /// Owning class / cohort identifier.
    CohortId
);
integer_id!(
    /// Linked course identifier.
    CourseId
);
integer_id!(
    /// Join request identifier.
    RequestId
);
integer_id!(
    /// Group message identifier.
    MessageId
);
