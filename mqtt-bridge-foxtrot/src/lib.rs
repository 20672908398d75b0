//! MQTT bridge for the Tecomat Foxtrot PLC.
//!
//! This bridge polls configured variables over the controller's text line
//! protocol and publishes their values to an MQTT broker, announcing every
//! variable as a Home Assistant sensor. Power variables can additionally be
//! integrated into an energy total.
//!
//! # Topics
//!
//! ```text
//! <base>/<name>/state                              measurement, 3 decimals
//! <base>/<name>/energy/state                       energy total, 3 decimals
//! <base>/<name>/set                                subscribed, ignored
//! <base>/bridge/status                             bridge status document
//! <discovery_prefix>/sensor/<sanitized>/config     discovery
//! <discovery_prefix>/sensor/<sanitized>_energy/config
//! ```
//!
//! All publishes are retained with QoS 1.

pub mod config;
pub mod controller;
pub mod coordinator;
pub mod discovery;
pub mod energy;
pub mod messaging;
pub mod protocol;
pub mod registry;
pub mod runtime;
pub mod scheduler;
pub mod topics;
