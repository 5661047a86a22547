//! Room model: identifiers, join policies, authority map, event store seam

pub mod room;
pub mod store;
pub mod types;

pub use room::{JoinPolicy, MembershipState, Room};
pub use store::{HistoryEntry, MembershipChange, MemoryRoomStore, RoomStore, StoreError};
pub use types::{PowerTier, RoomId, Timestamp, UserId};
