// Generic lifecycle routes, one set per registered entity collection
pub mod nested;
pub mod record;
pub mod schema;
pub mod stats;
pub mod utils;

pub use nested::{get as nested_get, get_through as through_get};
pub use record::{activate as record_activate, delete as record_delete, get as record_get, patch as record_patch, put as record_put};
pub use schema::{get as schema_get, post as schema_post};
pub use stats::{get as stats_get, record_get as record_stats_get};
pub use utils::NestedRoute;
