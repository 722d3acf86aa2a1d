pub mod chat;
pub mod controller;
pub mod location;
pub mod offer_timer;
pub mod store;
pub mod watchdog;
