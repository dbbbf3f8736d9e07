//! Dynamic Unit Loader
//!
//! Safe wrapper around libloading for loading dynamic units, resolving
//! arity-tagged entry points, and enforcing the per-unit run lifecycle.
//!
//! The process-wide loaded-module table is owned by an explicit [`Loader`]
//! value and guarded by a mutex; it is not an ambient global. `load` and
//! `unload` serialize on that lock, while `resolve`, `state`, and calls
//! through a stable handle only take it briefly to look the unit up.

use std::collections::HashMap;
use std::ffi::CString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use libloading::{Library, Symbol};
use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::error::BridgeError;
use crate::value::{ForeignValue, RawValue, MAX_ARITY};

/// Run lifecycle of a loaded unit.
///
/// A unit starts in `Loaded`, passes through `Initialized` while its one-time
/// setup call runs, and reaches `Ready` when setup succeeds. Exported entry
/// points may only be invoked in `Ready`. The unloaded state is represented
/// by handle invalidation: operations on a closed handle fail with a state
/// error rather than touching freed memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    /// Opened by the OS loader, setup not yet run.
    Loaded,
    /// One-time setup has started (or failed part-way).
    Initialized,
    /// Setup complete; exports are callable.
    Ready,
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitState::Loaded => write!(f, "loaded"),
            UnitState::Initialized => write!(f, "initialized"),
            UnitState::Ready => write!(f, "ready"),
        }
    }
}

/// A unit held in the loader's table.
#[derive(Debug)]
struct LoadedUnit {
    path: PathBuf,
    library: Library,
    generation: u64,
    state: Mutex<UnitState>,
}

impl LoadedUnit {
    /// Look up an exported symbol and return its raw entry address.
    fn symbol_address(&self, name: &str) -> Result<usize, BridgeError> {
        let c_name = CString::new(name).map_err(|_| BridgeError::Resolve {
            unit: self.path.display().to_string(),
            symbol: name.to_string(),
            reason: "symbol name contains an embedded NUL".to_string(),
        })?;

        // Safety: the symbol is treated as an opaque address. Signature
        // checking is the bridge's job, done at call time via the arity
        // recorded in the SymbolRef.
        let symbol: Symbol<*const ()> = unsafe {
            self.library
                .get(c_name.as_bytes_with_nul())
                .map_err(|e| BridgeError::Resolve {
                    unit: self.path.display().to_string(),
                    symbol: name.to_string(),
                    reason: e.to_string(),
                })?
        };

        Ok(*symbol as usize)
    }
}

/// Opaque ownership token for a loaded unit.
///
/// Exactly one handle exists per successful load. The handle is invalidated
/// by [`Loader::unload`]; any operation through it afterwards fails with a
/// state error.
#[derive(Debug)]
pub struct LibraryHandle {
    generation: u64,
    path: PathBuf,
}

impl LibraryHandle {
    /// Path (or OS-loader name) the unit was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Generation number issued by the loader's table.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// A resolved, arity-tagged entry point.
///
/// Holds a non-owning back-reference to its unit; calling through a stale
/// reference fails closed instead of dereferencing freed memory. An in-flight
/// call keeps the unit alive until it returns, so `unload` can never free
/// code out from under a running call.
#[derive(Debug, Clone)]
pub struct SymbolRef {
    name: String,
    arity: usize,
    addr: usize,
    unit: Weak<LoadedUnit>,
    generation: u64,
}

impl SymbolRef {
    /// Symbol name this reference was resolved from.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Argument count recorded at resolution.
    pub fn arity(&self) -> usize {
        self.arity
    }

    /// Generation of the owning unit.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Invoke the entry point with exactly `arity` boxed arguments.
    ///
    /// Fails with a state error if the unit has been unloaded or has not
    /// completed initialization, and with an arity error on an argument
    /// count mismatch. Mismatches are reported, never truncated or padded.
    pub fn call(&self, args: &[ForeignValue]) -> Result<ForeignValue, BridgeError> {
        let unit = self.unit.upgrade().ok_or_else(|| BridgeError::State {
            operation: format!("call '{}'", self.name),
            state: "unloaded".to_string(),
        })?;

        let state = *unit.state.lock();
        if state != UnitState::Ready {
            return Err(BridgeError::State {
                operation: format!("call '{}'", self.name),
                state: state.to_string(),
            });
        }

        if args.len() != self.arity {
            return Err(BridgeError::Arity {
                name: self.name.clone(),
                expected: self.arity,
                got: args.len(),
            });
        }

        let raw_args: Vec<RawValue> = args.iter().map(|a| a.to_raw()).collect();

        // Safety: the address came from the unit's export table, the unit is
        // kept alive by the Arc upgraded above, and the argument count was
        // checked against the arity recorded at resolution. The entry point
        // must follow the documented RawValue convention.
        let raw = unsafe { dispatch(self.addr, &raw_args)? };
        ForeignValue::from_raw(raw)
    }
}

struct LoaderInner {
    units: HashMap<u64, Arc<LoadedUnit>>,
    by_path: HashMap<PathBuf, u64>,
    search_paths: Vec<PathBuf>,
    next_generation: u64,
}

/// Owner of the loaded-module table.
pub struct Loader {
    inner: Mutex<LoaderInner>,
}

impl Loader {
    /// Create a loader with the platform default search paths.
    pub fn new() -> Self {
        Self::with_search_paths(DEFAULT_SEARCH_PATHS.clone())
    }

    /// Create a loader with an explicit search path list.
    pub fn with_search_paths(search_paths: Vec<PathBuf>) -> Self {
        Self {
            inner: Mutex::new(LoaderInner {
                units: HashMap::new(),
                by_path: HashMap::new(),
                search_paths,
                next_generation: 1,
            }),
        }
    }

    /// Append a search path.
    pub fn add_search_path(&self, path: impl AsRef<Path>) {
        self.inner
            .lock()
            .search_paths
            .push(path.as_ref().to_path_buf());
    }

    /// Locate a unit by bare name or path without loading it.
    pub fn find_library(&self, name: &str) -> Option<PathBuf> {
        let inner = self.inner.lock();
        locate(&inner.search_paths, Path::new(name))
    }

    /// Open the dynamic unit at `target`.
    ///
    /// `target` may be an absolute path, a path relative to the working
    /// directory, or a bare name that is mapped to the platform library
    /// filename and searched for on the configured paths. A name not found
    /// on the search paths is handed to the OS loader, which applies its own
    /// lookup rules. Loading the same canonical path twice while the first
    /// load is live is an error.
    pub fn load(&self, target: impl AsRef<Path>) -> Result<LibraryHandle, BridgeError> {
        let target = target.as_ref();
        let display = target.display().to_string();

        let mut inner = self.inner.lock();

        let resolved = match locate(&inner.search_paths, target) {
            Some(path) => path,
            None if is_bare_name(target) => {
                // Delegate to the OS loader's own search rules.
                PathBuf::from(platform_filename(&target.to_string_lossy()))
            }
            None => {
                return Err(BridgeError::Load {
                    path: display,
                    reason: "no such unit on the search path".to_string(),
                });
            }
        };

        let canonical = std::fs::canonicalize(&resolved).unwrap_or_else(|_| resolved.clone());
        if inner.by_path.contains_key(&canonical) {
            return Err(BridgeError::Load {
                path: display,
                reason: "unit is already loaded".to_string(),
            });
        }

        // Safety: loading a dynamic unit runs its initializers; we trust the
        // caller-supplied path the same way the OS loader does.
        let library = unsafe {
            Library::new(&resolved).map_err(|e| BridgeError::Load {
                path: display.clone(),
                reason: e.to_string(),
            })?
        };

        let generation = inner.next_generation;
        inner.next_generation += 1;

        let unit = Arc::new(LoadedUnit {
            path: canonical.clone(),
            library,
            generation,
            state: Mutex::new(UnitState::Loaded),
        });
        inner.units.insert(generation, unit);
        inner.by_path.insert(canonical.clone(), generation);

        Ok(LibraryHandle {
            generation,
            path: canonical,
        })
    }

    /// Resolve an exported symbol into an arity-tagged [`SymbolRef`].
    ///
    /// The expected arity is supplied out-of-band by the caller and recorded
    /// in the reference; the OS loader performs no signature checking.
    pub fn resolve(
        &self,
        handle: &LibraryHandle,
        name: &str,
        arity: usize,
    ) -> Result<SymbolRef, BridgeError> {
        if arity > MAX_ARITY {
            return Err(BridgeError::UnsupportedArity {
                arity,
                max: MAX_ARITY,
            });
        }

        let unit = self.unit_for(handle, "resolve")?;
        let addr = unit.symbol_address(name)?;

        Ok(SymbolRef {
            name: name.to_string(),
            arity,
            addr,
            generation: unit.generation,
            unit: Arc::downgrade(&unit),
        })
    }

    /// Run the unit's one-time setup. Must be called exactly once per load,
    /// before any exported entry point is invoked.
    ///
    /// With `Some(symbol)`, the symbol is resolved as an arity-0 entry point
    /// and invoked; it returns a boxed status where `0` (or unit) means
    /// success and any other integer fails with an init error. With `None`
    /// the unit has no setup requirement and moves directly to ready.
    ///
    /// A failed initialization leaves the unit un-runnable: its exports stay
    /// guarded and a second `initialize` is rejected.
    pub fn initialize(
        &self,
        handle: &LibraryHandle,
        init: Option<&str>,
    ) -> Result<(), BridgeError> {
        let unit = self.unit_for(handle, "initialize")?;

        {
            let mut state = unit.state.lock();
            if *state != UnitState::Loaded {
                return Err(BridgeError::State {
                    operation: "initialize".to_string(),
                    state: state.to_string(),
                });
            }
            *state = UnitState::Initialized;
        }

        if let Some(symbol) = init {
            let addr = unit.symbol_address(symbol)?;

            // Safety: arity-0 entry point following the RawValue convention;
            // the unit is alive for the duration of the call.
            let raw = unsafe { dispatch(addr, &[])? };
            match ForeignValue::from_raw(raw)? {
                ForeignValue::Unit | ForeignValue::Int(0) => {}
                ForeignValue::Int(status) => {
                    return Err(BridgeError::Init {
                        unit: unit.path.display().to_string(),
                        status,
                    });
                }
                other => {
                    return Err(BridgeError::Conversion {
                        expected: "int status",
                        got: other.tag_name().to_string(),
                    });
                }
            }
        }

        *unit.state.lock() = UnitState::Ready;
        Ok(())
    }

    /// Current lifecycle state of the unit behind `handle`.
    pub fn state(&self, handle: &LibraryHandle) -> Result<UnitState, BridgeError> {
        Ok(*self.unit_for(handle, "query state of")?.state.lock())
    }

    /// Release the unit behind `handle`.
    ///
    /// The handle is invalidated; a second `unload` on the same handle is
    /// rejected with a state error. The OS handle is dropped once the last
    /// in-flight call through a resolved symbol has returned.
    pub fn unload(&self, handle: &LibraryHandle) -> Result<(), BridgeError> {
        let mut inner = self.inner.lock();
        let unit = inner
            .units
            .remove(&handle.generation)
            .ok_or_else(|| BridgeError::State {
                operation: "unload".to_string(),
                state: "unloaded".to_string(),
            })?;
        inner.by_path.remove(&unit.path);
        Ok(())
    }

    /// Paths of all currently loaded units.
    pub fn loaded_paths(&self) -> Vec<PathBuf> {
        self.inner
            .lock()
            .units
            .values()
            .map(|u| u.path.clone())
            .collect()
    }

    fn unit_for(
        &self,
        handle: &LibraryHandle,
        operation: &str,
    ) -> Result<Arc<LoadedUnit>, BridgeError> {
        self.inner
            .lock()
            .units
            .get(&handle.generation)
            .cloned()
            .ok_or_else(|| BridgeError::State {
                operation: format!("{} '{}'", operation, handle.path.display()),
                state: "unloaded".to_string(),
            })
    }
}

impl Default for Loader {
    fn default() -> Self {
        Self::new()
    }
}

/// Invoke a RawValue-convention entry point at `addr`.
///
/// Rust FFI needs the exact parameter count at compile time, so the call is
/// dispatched through one function-pointer type per arity.
///
/// # Safety
///
/// `addr` must point at a live `extern "C"` function taking `args.len()`
/// `RawValue` parameters and returning one `RawValue`.
unsafe fn dispatch(addr: usize, args: &[RawValue]) -> Result<RawValue, BridgeError> {
    type Fn0 = extern "C" fn() -> RawValue;
    type Fn1 = extern "C" fn(RawValue) -> RawValue;
    type Fn2 = extern "C" fn(RawValue, RawValue) -> RawValue;
    type Fn3 = extern "C" fn(RawValue, RawValue, RawValue) -> RawValue;
    type Fn4 = extern "C" fn(RawValue, RawValue, RawValue, RawValue) -> RawValue;
    type Fn5 = extern "C" fn(RawValue, RawValue, RawValue, RawValue, RawValue) -> RawValue;
    type Fn6 =
        extern "C" fn(RawValue, RawValue, RawValue, RawValue, RawValue, RawValue) -> RawValue;

    let result = match args.len() {
        0 => std::mem::transmute::<usize, Fn0>(addr)(),
        1 => std::mem::transmute::<usize, Fn1>(addr)(args[0]),
        2 => std::mem::transmute::<usize, Fn2>(addr)(args[0], args[1]),
        3 => std::mem::transmute::<usize, Fn3>(addr)(args[0], args[1], args[2]),
        4 => std::mem::transmute::<usize, Fn4>(addr)(args[0], args[1], args[2], args[3]),
        5 => std::mem::transmute::<usize, Fn5>(addr)(args[0], args[1], args[2], args[3], args[4]),
        6 => std::mem::transmute::<usize, Fn6>(addr)(
            args[0], args[1], args[2], args[3], args[4], args[5],
        ),
        n => {
            return Err(BridgeError::UnsupportedArity {
                arity: n,
                max: MAX_ARITY,
            });
        }
    };

    Ok(result)
}

/// Resolve `target` to an existing file, trying the search paths for bare
/// names. Returns `None` when nothing on disk matches.
fn locate(search_paths: &[PathBuf], target: &Path) -> Option<PathBuf> {
    if target.exists() {
        return Some(target.to_path_buf());
    }

    if !is_bare_name(target) {
        return None;
    }

    let file = platform_filename(&target.to_string_lossy());
    for dir in search_paths {
        let candidate = dir.join(&file);
        if candidate.exists() {
            return Some(candidate);
        }
    }

    None
}

fn is_bare_name(target: &Path) -> bool {
    target.parent().map_or(true, |p| p.as_os_str().is_empty())
}

/// Platform default search paths, computed once per process.
static DEFAULT_SEARCH_PATHS: Lazy<Vec<PathBuf>> = Lazy::new(default_search_paths);

fn default_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        paths.push(cwd);
    }

    #[cfg(target_os = "linux")]
    {
        paths.push(PathBuf::from("/usr/lib"));
        paths.push(PathBuf::from("/usr/local/lib"));
        paths.push(PathBuf::from("/lib"));
        paths.push(PathBuf::from("/lib64"));
        paths.push(PathBuf::from("/usr/lib64"));

        if let Ok(ld_path) = std::env::var("LD_LIBRARY_PATH") {
            for p in ld_path.split(':') {
                paths.push(PathBuf::from(p));
            }
        }
    }

    #[cfg(target_os = "macos")]
    {
        paths.push(PathBuf::from("/usr/lib"));
        paths.push(PathBuf::from("/usr/local/lib"));
        paths.push(PathBuf::from("/opt/homebrew/lib"));

        if let Ok(dyld_path) = std::env::var("DYLD_LIBRARY_PATH") {
            for p in dyld_path.split(':') {
                paths.push(PathBuf::from(p));
            }
        }
    }

    #[cfg(target_os = "windows")]
    {
        paths.push(PathBuf::from("C:\\Windows\\System32"));

        if let Ok(path) = std::env::var("PATH") {
            for p in path.split(';') {
                paths.push(PathBuf::from(p));
            }
        }
    }

    paths
}

/// Map a bare name to the platform shared-library filename. Names that
/// already look like library filenames pass through unchanged.
fn platform_filename(name: &str) -> String {
    #[cfg(target_os = "linux")]
    {
        if name.contains(".so") {
            name.to_string()
        } else {
            format!("lib{}.so", name)
        }
    }

    #[cfg(target_os = "macos")]
    {
        if name.ends_with(".dylib") {
            name.to_string()
        } else {
            format!("lib{}.dylib", name)
        }
    }

    #[cfg(target_os = "windows")]
    {
        if name.ends_with(".dll") {
            name.to_string()
        } else {
            format!("{}.dll", name)
        }
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{to_foreign, TAG_INT};

    extern "C" fn raw_increment(v: RawValue) -> RawValue {
        RawValue {
            tag: TAG_INT,
            bits: ((v.bits as i64) + 1) as u64,
        }
    }

    extern "C" fn raw_sum3(a: RawValue, b: RawValue, c: RawValue) -> RawValue {
        RawValue {
            tag: TAG_INT,
            bits: ((a.bits as i64) + (b.bits as i64) + (c.bits as i64)) as u64,
        }
    }

    extern "C" fn raw_nothing() -> RawValue {
        RawValue { tag: 0, bits: 0 }
    }

    #[test]
    fn test_dispatch_arity_1() {
        let raw = unsafe { dispatch(raw_increment as usize, &[to_foreign(41).to_raw()]) }.unwrap();
        assert_eq!(ForeignValue::from_raw(raw).unwrap(), ForeignValue::Int(42));
    }

    #[test]
    fn test_dispatch_arity_3() {
        let args: Vec<RawValue> = [1, 2, 3].iter().map(|&v| to_foreign(v).to_raw()).collect();
        let raw = unsafe { dispatch(raw_sum3 as usize, &args) }.unwrap();
        assert_eq!(ForeignValue::from_raw(raw).unwrap(), ForeignValue::Int(6));
    }

    #[test]
    fn test_dispatch_arity_0_unit() {
        let raw = unsafe { dispatch(raw_nothing as usize, &[]) }.unwrap();
        assert!(ForeignValue::from_raw(raw).unwrap().is_unit());
    }

    #[test]
    fn test_dispatch_rejects_oversized_arity() {
        let args = vec![to_foreign(0).to_raw(); MAX_ARITY + 1];
        let err = unsafe { dispatch(raw_nothing as usize, &args) }.unwrap_err();
        assert!(matches!(err, BridgeError::UnsupportedArity { .. }));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_platform_filename() {
        assert_eq!(platform_filename("m"), "libm.so");
        assert_eq!(platform_filename("libc.so.6"), "libc.so.6");
        assert_eq!(platform_filename("libfoo.so"), "libfoo.so");
    }

    #[test]
    fn test_bare_name_detection() {
        assert!(is_bare_name(Path::new("m")));
        assert!(is_bare_name(Path::new("libm.so")));
        assert!(!is_bare_name(Path::new("./libm.so")));
        assert!(!is_bare_name(Path::new("/usr/lib/libm.so")));
    }

    #[test]
    fn test_load_missing_unit_fails() {
        let loader = Loader::with_search_paths(Vec::new());
        let err = loader.load("/no/such/unit.so").unwrap_err();
        assert!(matches!(err, BridgeError::Load { .. }));
    }

    #[test]
    fn test_resolve_rejects_oversized_arity() {
        let loader = Loader::new();
        // A fake handle is enough: the arity bound is checked first.
        let handle = LibraryHandle {
            generation: u64::MAX,
            path: PathBuf::from("fake"),
        };
        let err = loader.resolve(&handle, "f", MAX_ARITY + 1).unwrap_err();
        assert!(matches!(err, BridgeError::UnsupportedArity { .. }));
    }

    // Lifecycle tests against a real unit live in test/loader_integration.rs.
}
