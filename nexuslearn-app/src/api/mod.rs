pub mod auth;
pub mod dto;
pub mod error;
pub mod path;
pub mod routes;
pub mod server;
