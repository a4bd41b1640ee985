//! Database models split into separate files, re-exported at `crate::db::models`.

pub mod event;
pub mod link;
pub mod mirror_job;
pub mod rsvp;
pub mod user;

pub use self::event::*;
pub use self::link::*;
pub use self::mirror_job::*;
pub use self::rsvp::*;
pub use self::user::*;
