//! QCBridge Core Library
//!
//! Drives an installed Psi4 engine on behalf of callers speaking the
//! QCSchema-style canonical request/result contract: resolve the installed
//! version, pick a compatible invocation protocol, execute inside an
//! isolated scratch directory, normalize the raw output back into the
//! canonical shape, and classify failures into a retry-informing taxonomy.

pub mod classify;
pub mod discovery;
pub mod dispatch;
pub mod error;
pub mod exec;
pub mod harness;
pub mod normalize;
pub mod protocol;
pub mod schema;
pub mod scratch;
pub mod telemetry;
pub mod version;
pub mod wire;

pub use classify::{classify, ErrorKind};
pub use discovery::{EngineDiscovery, SystemDiscovery};
pub use dispatch::{EmbeddedEngine, RawEngineOutput};
pub use error::{HarnessError, Result};
pub use harness::EngineHarness;
pub use normalize::normalize;
pub use protocol::{select, ProtocolVariant};
pub use schema::{
    CanonicalResult, ComputationRequest, EnginePayloadError, ModelSpec, Molecule, Provenance,
    TaskConfig,
};
pub use scratch::{ScratchScope, SCRATCH_ENV};
pub use telemetry::init_tracing;
pub use version::{EngineVersion, ResolvedEngine, VersionCache, VersionResolver, ENGINE_BINARY};

/// QCBridge version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
