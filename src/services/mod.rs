pub mod events;
pub mod google_calendar;
pub mod init;
pub mod mirror;
pub mod reconcile;
pub mod rsvp;
pub mod slack;
