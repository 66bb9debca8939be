pub mod auth;
pub mod db_session;

pub use auth::{AdminKey, RequireAdmin};
pub use db_session::DbSession;
