//! # palaver-shared
//!
//! Wire protocol frames, id newtypes and durable event records shared by the
//! relay and by any process that produces events for it (the HTTP request
//! tier, moderation tooling, tests).  This crate performs no I/O.

pub mod constants;
pub mod event;
pub mod protocol;
pub mod types;

pub use event::{EventKind, EventRecord};
pub use protocol::{ClientFrame, ServerFrame};
pub use types::{ChatId, ChatKind, ConnId, MemberRole, MessageKind, UserId};
