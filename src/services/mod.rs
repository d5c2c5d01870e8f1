pub mod user_service;

pub use user_service::{Approver, LoginRequest, Role, UserError, UserService};
