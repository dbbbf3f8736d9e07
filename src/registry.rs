//! Primitive Registry
//!
//! Host-side registry of foreign-callable primitives. Each primitive is
//! exposed under a flat name with a fixed arity; calls receive exactly that
//! many boxed values and return exactly one (unit for void-like primitives).
//!
//! Registration serializes on the table's write lock; lookups and calls take
//! shared access, and the primitive runs outside the lock.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::BridgeError;
use crate::value::{ForeignValue, MAX_ARITY};

/// Primitive function signature: boxed arguments in, one boxed value out.
pub type PrimitiveFn = Arc<dyn Fn(&[ForeignValue]) -> Result<ForeignValue, BridgeError> + Send + Sync>;

/// A registered primitive.
pub struct PrimitiveDef {
    pub name: String,
    pub arity: usize,
    func: PrimitiveFn,
}

impl fmt::Debug for PrimitiveDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrimitiveDef")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish()
    }
}

/// Registry of foreign-callable primitives keyed by name.
pub struct PrimitiveRegistry {
    inner: RwLock<HashMap<String, PrimitiveDef>>,
}

impl PrimitiveRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Expose `func` under `name` with exactly `arity` arguments.
    ///
    /// Registering the same name twice is an error, as is an arity above the
    /// dispatch maximum.
    pub fn register(
        &self,
        name: impl Into<String>,
        arity: usize,
        func: PrimitiveFn,
    ) -> Result<(), BridgeError> {
        let name = name.into();
        if arity > MAX_ARITY {
            return Err(BridgeError::UnsupportedArity {
                arity,
                max: MAX_ARITY,
            });
        }

        let mut inner = self.inner.write();
        if inner.contains_key(&name) {
            return Err(BridgeError::DuplicatePrimitive(name));
        }
        let def = PrimitiveDef {
            name: name.clone(),
            arity,
            func,
        };
        inner.insert(name, def);
        Ok(())
    }

    /// Call the primitive registered under `name`.
    ///
    /// An argument-count mismatch is a reported arity error, never silently
    /// truncated or padded.
    pub fn call(&self, name: &str, args: &[ForeignValue]) -> Result<ForeignValue, BridgeError> {
        let (arity, func) = {
            let inner = self.inner.read();
            let def = inner
                .get(name)
                .ok_or_else(|| BridgeError::UnknownPrimitive(name.to_string()))?;
            (def.arity, Arc::clone(&def.func))
        };

        if args.len() != arity {
            return Err(BridgeError::Arity {
                name: name.to_string(),
                expected: arity,
                got: args.len(),
            });
        }

        func(args)
    }

    /// Arity of the primitive registered under `name`, if any.
    pub fn lookup(&self, name: &str) -> Option<usize> {
        self.inner.read().get(name).map(|def| def.arity)
    }

    /// Check whether `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.inner.read().contains_key(name)
    }

    /// Names of all registered primitives.
    pub fn names(&self) -> Vec<String> {
        self.inner.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

impl Default for PrimitiveRegistry {
    fn default() -> Self {
        Self::new()
    }
}
