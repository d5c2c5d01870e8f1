// Public routes: no token required
pub mod auth;
pub mod root;

pub use auth::{login_post, register_post};
pub use root::{health, root};
