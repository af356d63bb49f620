//! HTTP and websocket front end for the research loop.

pub mod config;
pub mod error;
pub mod payload;
pub mod routes;
pub mod state;
