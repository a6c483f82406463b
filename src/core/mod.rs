//! Core module - Artifacts, stores and the resource cache

pub mod artifact;
pub mod cache;
pub mod error;
