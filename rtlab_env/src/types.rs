//! Common identifier types shared by the engines and the scenario harness.
//!
//! Every simulated entity is named by a small `Copy` id. Ids serialize as
//! bare integers so snapshots stay plain JSON for the presentation side, and
//! display with a one-letter prefix (`W0`, `T3`, `O7`) for logs and events.

use serde::{Deserialize, Serialize};

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u32);

        impl $name {
            /// Returns the id as a vector index.
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl From<u32> for $name {
            fn from(raw: u32) -> Self {
                Self(raw)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

entity_id!(
    /// A simulated execution unit (processor/thread pair).
    WorkerId,
    "W"
);
entity_id!(
    /// A simulated unit of work (goroutine-like task).
    TaskId,
    "T"
);
entity_id!(
    /// A logical heap record in the collector simulator.
    ObjectId,
    "O"
);
entity_id!(
    /// A simulated channel.
    ChannelId,
    "C"
);
entity_id!(
    /// A simulated mutex.
    MutexId,
    "M"
);
entity_id!(
    /// A simulated wait group.
    WaitGroupId,
    "G"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_display_with_prefix() {
        assert_eq!(WorkerId(0).to_string(), "W0");
        assert_eq!(TaskId(12).to_string(), "T12");
        assert_eq!(ObjectId::from(7).to_string(), "O7");
    }

    #[test]
    fn test_ids_serialize_transparently() {
        let json = serde_json::to_string(&TaskId(3)).unwrap();
        assert_eq!(json, "3");
        let back: TaskId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, TaskId(3));
    }

    #[test]
    fn test_ids_order_by_value() {
        assert!(ChannelId(1) < ChannelId(2));
        assert_eq!(MutexId(4).index(), 4);
        assert_eq!(WaitGroupId(0), WaitGroupId::from(0));
    }
}
