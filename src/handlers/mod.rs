// Request handlers, grouped by access tier:
// public (no token), data (entity lifecycle routes), protected (bearer token).
pub mod data;
pub mod protected;
pub mod public;
