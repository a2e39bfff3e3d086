//! # vigil-core
//!
//! Connection hub for the Vigil realtime server.
//!
//! This crate provides the building blocks:
//!
//! - **Registry** - Active connections partitioned by channel, with metadata
//! - **Manager** - Admission, retirement and shutdown
//! - **Broadcast** - Concurrent fan-out to a channel, an identity or everyone
//! - **Supervisor** - Periodic server heartbeats and stale-connection eviction
//! - **Session** - Per-connection read loop answering control messages
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Transport  │────▶│   Manager   │────▶│  Registry   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        │                   │                   ▲
//!        ▼                   ▼                   │
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Session   │────▶│  Broadcast  │◀────│ Supervisor  │
//! └─────────────┘     └─────────────┘     └─────────────┘
//! ```
//!
//! Every write to a connection goes through its [`ConnectionHandle`], whose
//! single writer task keeps frames from interleaving.

pub mod auth;
pub mod broadcast;
pub mod channel;
pub mod handle;
pub mod manager;
pub mod metadata;
pub mod metrics;
pub mod notify;
pub mod providers;
pub mod registry;
pub mod session;
pub mod supervisor;

pub use auth::{AuthError, Identity, IdentityVerifier, JwtVerifier, RejectAll};
pub use broadcast::{BroadcastReport, DeliveryError};
pub use channel::ChannelKind;
pub use handle::ConnectionHandle;
pub use manager::{AdmissionError, Admitted, ConnectionManager, LivenessPolicy, ManagerConfig};
pub use metadata::{ConnectionId, ConnectionMetadata};
pub use notify::DomainEvent;
pub use providers::{DataProviders, ProviderContext};
pub use registry::{ConnectionEntry, Registry, RegistryError, RegistryStats};
pub use session::run_session;
