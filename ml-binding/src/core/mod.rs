//! Core types shared across the engine

pub mod unified_error;
