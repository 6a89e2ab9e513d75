//! Notification content and its wire representation.
//!
//! - `NotificationPayload` / `PayloadBuilder`: pure construction of push content
//!   from domain events (new follower, comment reply, promotion, ...)
//! - `NotificationEvent`: the dispatch request published on the commit log

mod event;
mod payload;

pub use event::NotificationEvent;
pub use payload::{
    NotificationKind, NotificationPayload, PayloadBuilder, MAX_BODY_CHARS, TYPE_ATTRIBUTE,
};
pub(crate) use payload::truncate_chars;
