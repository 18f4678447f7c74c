//! Face Swap Service
//!
//! This library provides the core of the faceswap-api service: synchronous
//! image swaps and asynchronous video jobs whose frames are run through a
//! shared face-swap engine on background tasks, with progress polling,
//! one-shot result download and retention of abandoned work.

pub mod app_state;
pub mod config;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
