//! Multi-vendor hosting provider abstraction (spec §4.I).
//!
//! One [`provider::VendorProvider`] trait, with a [`rest::RestBackend`]
//! implementation for centralized REST-style hosts and a
//! [`decentralized::RadicleBackend`] implementation that serves the same
//! surface off a local session clone plus host-fetched signed events.

pub mod decentralized;
pub mod error;
pub mod model;
pub mod provider;
pub mod rest;

pub use decentralized::{EventSource, RadicleBackend, RawEvent};
pub use error::Error;
pub use provider::{poll_import_until_done, VendorProvider};
pub use rest::RestBackend;
