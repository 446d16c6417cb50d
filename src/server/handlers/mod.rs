pub mod ask;
pub mod health;
pub mod index;
pub mod sessions;
pub mod tickets;
