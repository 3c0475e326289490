//! # Topic Router Test Suite
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! └── integration/
//!     ├── flows.rs      # registration, routing, options passthrough
//!     ├── delivery.rs   # failure paths, redelivery, transactions
//!     └── lifecycle.rs  # close, scoped routers, producer-only processes
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p router-tests
//! cargo test -p router-tests integration::delivery::
//! ```

#![allow(dead_code)]
