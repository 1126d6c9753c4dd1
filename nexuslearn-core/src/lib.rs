pub mod decks;
pub mod errors;
pub mod filters;
pub mod groups;
pub mod identity;
pub mod models;
pub mod repo;
pub mod scheduler;
pub mod users;

pub use errors::*;
pub use filters::*;
pub use identity::*;
pub use models::*;
pub use repo::*;
pub use scheduler::*;
