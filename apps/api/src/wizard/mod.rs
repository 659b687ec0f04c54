pub mod handlers;
pub mod notices;
pub mod recovery;
pub mod registry;
pub mod session;
pub mod snapshot;
pub mod steps;
pub mod store;
