// Protected routes: bearer token required
pub mod approvals;

pub use approvals::{approvals_get, approvals_put};
