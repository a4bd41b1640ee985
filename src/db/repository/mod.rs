pub mod event;
pub mod links;
pub mod mirror_job;
pub mod rsvp;
pub mod user;

pub use event::EventRepository;
pub use links::{CalendarLinkRepository, MessageLinkRepository};
pub use mirror_job::MirrorJobRepository;
pub use rsvp::RsvpRepository;
pub use user::{EventTypeRepository, UserRepository};
