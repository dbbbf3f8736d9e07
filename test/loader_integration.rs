//! Loader lifecycle tests against a real dynamic unit.
//!
//! The Linux C library is used as the test unit: it is always present, loads
//! through the OS loader's own search rules, and exports well-known symbols.
//! Its functions do not follow the bridge's RawValue convention, so these
//! tests exercise load/resolve/lifecycle guards without dispatching into
//! foreign code; the dispatch path itself is covered by in-process tests in
//! the loader module.

#![cfg(target_os = "linux")]

use dynbridge::{to_foreign, BridgeError, Loader, UnitState};

const LIBC: &str = "libc.so.6";

/// Load libc or skip the test on systems where the OS loader cannot find it.
fn load_libc(loader: &Loader) -> Option<dynbridge::LibraryHandle> {
    loader.load(LIBC).ok()
}

#[test]
fn load_resolve_unload_lifecycle() {
    let loader = Loader::new();
    let Some(handle) = load_libc(&loader) else {
        return;
    };

    assert_eq!(loader.state(&handle).unwrap(), UnitState::Loaded);
    assert_eq!(loader.loaded_paths().len(), 1);

    // Resolution works in any live state; the arity is recorded.
    let sym = loader.resolve(&handle, "abs", 1).expect("resolve abs");
    assert_eq!(sym.name(), "abs");
    assert_eq!(sym.arity(), 1);

    loader.unload(&handle).expect("first unload");
    assert!(loader.loaded_paths().is_empty());

    // The second unload is rejected, not undefined.
    let err = loader.unload(&handle).unwrap_err();
    assert!(matches!(err, BridgeError::State { .. }));
}

#[test]
fn absent_symbols_fail_with_resolve_errors() {
    let loader = Loader::new();
    let Some(handle) = load_libc(&loader) else {
        return;
    };

    let err = loader
        .resolve(&handle, "dynbridge_definitely_not_exported", 0)
        .unwrap_err();
    match err {
        BridgeError::Resolve { symbol, .. } => {
            assert_eq!(symbol, "dynbridge_definitely_not_exported");
        }
        other => panic!("expected a resolve error, got {}", other),
    }

    loader.unload(&handle).unwrap();
}

#[test]
fn calls_are_guarded_by_the_lifecycle_state() {
    let loader = Loader::new();
    let Some(handle) = load_libc(&loader) else {
        return;
    };

    let sym = loader.resolve(&handle, "abs", 1).unwrap();

    // Loaded but not initialized: the call is refused before any dispatch.
    let err = sym.call(&[to_foreign(-5)]).unwrap_err();
    assert!(matches!(err, BridgeError::State { .. }));

    // libc needs no setup call.
    loader.initialize(&handle, None).expect("initialize");
    assert_eq!(loader.state(&handle).unwrap(), UnitState::Ready);

    // Initialization runs exactly once per load.
    let err = loader.initialize(&handle, None).unwrap_err();
    assert!(matches!(err, BridgeError::State { .. }));

    // Ready, but the argument count still has to match the recorded arity.
    let err = sym.call(&[]).unwrap_err();
    assert!(matches!(
        err,
        BridgeError::Arity {
            expected: 1,
            got: 0,
            ..
        }
    ));

    loader.unload(&handle).unwrap();
}

#[test]
fn stale_references_fail_closed() {
    let loader = Loader::new();
    let Some(handle) = load_libc(&loader) else {
        return;
    };

    let sym = loader.resolve(&handle, "abs", 1).unwrap();
    loader.initialize(&handle, None).unwrap();
    loader.unload(&handle).unwrap();

    // The unit is gone: calls and resolutions through the old handle are
    // state errors, never dangling dereferences.
    let err = sym.call(&[to_foreign(-5)]).unwrap_err();
    assert!(matches!(err, BridgeError::State { .. }));

    let err = loader.resolve(&handle, "abs", 1).unwrap_err();
    assert!(matches!(err, BridgeError::State { .. }));

    let err = loader.state(&handle).unwrap_err();
    assert!(matches!(err, BridgeError::State { .. }));
}

#[test]
fn double_load_of_the_same_unit_is_rejected() {
    let loader = Loader::new();
    let Some(handle) = load_libc(&loader) else {
        return;
    };

    let err = loader.load(LIBC).unwrap_err();
    match err {
        BridgeError::Load { reason, .. } => assert!(reason.contains("already loaded")),
        other => panic!("expected a load error, got {}", other),
    }

    // After unload the same path can be loaded again.
    loader.unload(&handle).unwrap();
    let Some(handle) = load_libc(&loader) else {
        return;
    };
    loader.unload(&handle).unwrap();
}

#[test]
fn missing_units_are_load_errors() {
    let loader = Loader::new();
    let err = loader.load("/no/such/dir/libnothing.so").unwrap_err();
    match err {
        BridgeError::Load { path, .. } => assert!(path.contains("libnothing")),
        other => panic!("expected a load error, got {}", other),
    }
}
