//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared configuration and logging primitives for the ONQL SDK."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Shared primitives for the ONQL SDK workspace.
//! This crate exposes configuration loading and tracing setup consumed by the
//! SDK and the operator CLI.

pub mod config;
pub mod logging;

pub use config::{BusConfig, LoadedSdkConfig, LoggingConfig, SdkConfig, DEFAULT_BUS_URL, DEFAULT_NAMESPACE};
pub use logging::{init_tracing, LogFormat};
