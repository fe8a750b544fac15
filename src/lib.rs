//! Client for the Home Connect appliance cloud.
//!
//! A [`Session`] holds the OAuth2 tokens and performs every authenticated
//! request. The [`ApplianceRegistry`] lists the paired appliances, and each
//! [`Appliance`] exposes its status, programs, settings and live event
//! stream.

pub mod api;
pub mod appliance;
pub mod catalog;
pub mod config;
pub mod enums;
pub mod error;
pub mod registry;
pub mod scope;
pub mod session;
pub mod sse;
pub mod stream;
pub mod types;

pub use appliance::Appliance;
pub use error::{Error, Result};
pub use registry::ApplianceRegistry;
pub use session::{AuthState, Session, SessionConfig, SessionEvent};
pub use stream::{ApplianceEvent, EventConnector, SseConnector, StreamState};
pub use types::{ApplianceDetails, EventKind, EventRecord, Program, ProgramOption, TokenRecord};
