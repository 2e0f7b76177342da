//! Integration Test: Core Crate Structural Rules
//!
//! **Policy**:
//! - Async code in the core MUST NOT block. Use `tokio::fs`, `tokio::time::sleep`.
//! - The circuit breaker MUST NOT take locks. Transitions are compare-and-swap
//!   on atomics so concurrent traffic never stalls behind a breaker.
//! - Production code MUST propagate errors instead of calling `unwrap()` or
//!   `expect()`.

use architectural_enforcement::{
    core_src, is_blocking_in_async, rust_sources, scan, uses_lock, uses_unwrap, Violation,
};

fn report(title: &str, violations: &[Violation]) {
    if violations.is_empty() {
        return;
    }
    eprintln!("\n❌ {title}");
    for violation in violations {
        eprintln!("  ❌ {violation}");
    }
    panic!("\nFound {} violation(s). Fix these before merging!", violations.len());
}

#[test]
fn test_core_sources_found() {
    let files = rust_sources(&core_src());
    assert!(
        files.iter().any(|p| p.ends_with("resilience/circuit_breaker.rs")),
        "core sources not found under {}",
        core_src().display()
    );
}

#[test]
fn test_no_blocking_io_in_async_code() {
    let violations = scan(&core_src(), "Blocking I/O in async code", |_, line| {
        is_blocking_in_async(line)
    });
    report("Blocking I/O calls found in async code", &violations);
}

#[test]
fn test_circuit_breaker_is_lock_free() {
    let violations = scan(&core_src(), "Lock in circuit breaker", |path, line| {
        path.ends_with("resilience/circuit_breaker.rs") && uses_lock(line)
    });
    report("Locks found in the circuit breaker", &violations);
}

#[test]
fn test_no_unwrap_in_production_code() {
    let violations = scan(&core_src(), "unwrap/expect in production code", |_, line| {
        uses_unwrap(line)
    });
    report("unwrap()/expect() found in production code", &violations);
}
