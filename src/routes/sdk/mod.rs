pub mod routes;

// SDK responses share the management API shape
pub use crate::routes::flags::EvaluateResponse;
