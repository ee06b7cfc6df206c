//! The `persistence` module provides the route map: the bidirectional ID
//! translation store used by protocol bridges.
//!
//! It uses `sled` as an embedded key-value store; both directions of a pair
//! live in one tree so they can be changed in a single transaction.

pub mod route_map;

pub use route_map::{Namespace, RouteMapRepository, SledRouteMap};
