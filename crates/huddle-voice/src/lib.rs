//! # huddle-voice
//!
//! Ephemeral call state for Huddle. Media never touches the server: calls are a
//! peer-to-peer mesh and this crate only tracks who is in which room, when a
//! call session started, and which invitations are still ringing.
//!
//! - [`room`]: canonical room keys and the membership store
//! - [`session`]: per-room call session lifecycle (started → ended)
//! - [`invite`]: pending call invitations
//! - [`coordinator`]: the single-lock composition the gateway talks to
//!
//! Everything here is in-memory and starts empty; a restart drops all calls.

pub mod clock;
pub mod coordinator;
pub mod invite;
pub mod room;
pub mod session;

pub use clock::{Clock, ManualClock, SystemClock};
pub use coordinator::{CallCoordinator, Joined, Left, VoiceStats};
pub use invite::{CallType, InviteTarget, Invitation};
pub use room::RoomKey;
pub use session::{CallDuration, CallEnded, CallStarted, LifecycleEvent};
