//! # gcpubsub Test Suite
//!
//! End-to-end flows driving [`gcpubsub::Component`] against the in-memory
//! broker.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! ├── fixtures.rs       # Test bed, scripted handlers, metric readers
//! └── integration/      # Publish, receive and telemetry flows
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p gcpubsub-tests
//! cargo test -p gcpubsub-tests integration::receive_flows::
//! ```

#![allow(dead_code)]

pub mod fixtures;
pub mod integration;
