//! PushTo Bridge
//!
//! Runs a push-to mount session headless: configuration, the error model of
//! the application and a command-driven host loop around `pushto_core`.

pub mod config;
pub mod host;
pub mod model;
pub mod view;
