//! Core data models for the lazy-loading object proxy.
//!
//! These types are shared by every store implementation and by the HTTP
//! layer; none of them is tied to a particular backend.

pub mod bucket;
pub mod listing;
pub mod object;
pub mod range;
