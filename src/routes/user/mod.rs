mod handler;
mod model;

pub use handler::{login, me, register};
pub use model::{AuthResponse, LoginRequest, RegisterRequest};
