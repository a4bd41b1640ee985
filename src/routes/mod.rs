pub mod events;
pub mod health;
pub mod ping;
pub mod reconcile;
