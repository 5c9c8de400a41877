//! Bearer-token authentication.

pub mod extract;
pub mod token;

pub use extract::{HostCaller, RegistrarCaller};
pub use token::{bearer_token, generate_token, hash_token};
