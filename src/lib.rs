pub mod config;
pub mod evaluation;
pub mod recording;
pub mod routes;
pub mod service;
pub mod state;
pub mod store;
