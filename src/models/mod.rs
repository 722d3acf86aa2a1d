pub mod chat;
pub mod driver;
pub mod ride;
pub mod stats;
pub mod trip;
