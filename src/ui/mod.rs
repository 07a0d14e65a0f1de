//! Control API
//!
//! A small JSON API over HTTP for whatever front end drives the streamer.

pub mod handlers;
pub mod server;

pub use server::{router, AppState, WebServer};
