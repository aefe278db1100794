//! JWT validation for the stream endpoint.
//!
//! Authentication itself lives with the CRM collaborator that issues the
//! tokens; this service only verifies signatures and resolves the user id.

mod claims;
mod jwt;

pub use claims::Claims;
pub use jwt::JwtValidator;
