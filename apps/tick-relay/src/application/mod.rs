//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with external systems.

/// Port interfaces for external systems (upstream stream, storage, sinks).
pub mod ports;

/// Application services: the core relay service and its schedule.
pub mod services;
