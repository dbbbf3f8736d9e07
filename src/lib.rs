//! dynbridge - Dynamic-Library Foreign-Function Bridge
//!
//! Loads shared units of compiled code at run time, resolves named entry
//! points into arity-tagged references, and exchanges boxed primitive values
//! across the boundary safely.
//!
//! # Architecture
//!
//! ```text
//! Host Program
//!       │
//!       ▼
//! Loader (owns the loaded-module table)
//!       │  load / resolve / initialize / unload
//!       ▼
//! SymbolRef (arity-tagged entry point)
//!       │  RawValue calling convention
//!       ▼
//! Dynamic Unit (libloading)
//! ```
//!
//! Host-side primitives take the same calling convention in the other
//! direction: the [`registry::PrimitiveRegistry`] exposes named functions
//! with a fixed arity so units (or the host itself) can invoke them with
//! boxed values.
//!
//! # Lifecycle
//!
//! Each loaded unit moves through `Loaded -> Initialized -> Ready`; its
//! optional init symbol runs exactly once, before any export is invoked.
//! Calls in the wrong state, stale handles, and double unloads are explicit
//! state errors, never undefined behavior.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use dynbridge::{from_foreign, to_foreign, ForeignValue, PrimitiveRegistry};
//!
//! let registry = PrimitiveRegistry::new();
//! registry
//!     .register(
//!         "increment",
//!         1,
//!         Arc::new(|args: &[ForeignValue]| Ok(to_foreign(from_foreign(&args[0])? + 1))),
//!     )
//!     .unwrap();
//!
//! let out = registry.call("increment", &[to_foreign(41)]).unwrap();
//! assert_eq!(from_foreign(&out).unwrap(), 42);
//! ```

pub mod config;
pub mod error;
pub mod loader;
pub mod manifest;
pub mod registry;
pub mod value;

pub use error::BridgeError;
pub use loader::{LibraryHandle, Loader, SymbolRef, UnitState};
pub use manifest::{ManifestError, UnitExport, UnitManifest};
pub use registry::{PrimitiveFn, PrimitiveRegistry};
pub use value::{from_foreign, to_foreign, ForeignValue, RawValue, MAX_ARITY};
