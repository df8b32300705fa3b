//! posthub server - Post API with real-time fan-out.
//!
//! This crate provides:
//! - A JSON API for creating, reading, updating, and deleting posts
//! - Bearer token authentication for that API
//! - A WebSocket hub that pushes every newly created post to all connected
//!   clients
//!
//! # Architecture
//!
//! Each WebSocket client becomes a [`hub::Connection`] with its own bounded
//! send queue. A single hub actor owns membership, and the
//! [`hub::Broadcaster`] fans messages out to a snapshot of it. Posts live in
//! an in-memory [`store::PostStore`].

pub mod auth;
pub mod config;
pub mod error;
pub mod hub;
pub mod routes;
pub mod store;
pub mod types;
