//! Integration Test: Timer Discipline
//!
//! **Policy**: Every delay in production code goes through the coalescing
//! scheduler so that page changes on all displays stay on the same
//! second boundary and `close()` can cancel them.
//!
//! **Exception**: `billboard/core/src/scheduler.rs` itself, which owns the
//! only real timer.

use std::path::Path;

const RAW_TIMERS: &[&str] = &[
    "tokio::time::sleep",
    "tokio::time::interval",
    "time::sleep(",
    "time::sleep_until(",
    "time::interval(",
    "thread::sleep(",
];

fn owns_timer(path: &Path) -> bool {
    path.ends_with("billboard/core/src/scheduler.rs")
}

#[test]
fn test_no_raw_timers_outside_scheduler() {
    let violations = architecture::scan(|path, lines, idx| {
        let code = lines[idx].1;
        if owns_timer(path) {
            return None;
        }
        RAW_TIMERS
            .iter()
            .any(|pattern| code.contains(pattern))
            .then_some("Raw timer")
    });

    if !violations.is_empty() {
        eprintln!("\n❌ Timers used outside the scheduler!\n");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }
        eprintln!("\n✅ REQUIRED:");
        eprintln!("  - scheduler.sleep(delay).await");
        eprintln!("  - scheduler.schedule_in(delay, offset_ms, task)");

        panic!(
            "\nFound {} raw timer(s) in production code.",
            violations.len()
        );
    }
}

#[test]
fn test_no_thread_sleep_anywhere() {
    let violations = architecture::scan(|_, lines, idx| {
        lines[idx]
            .1
            .contains("std::thread::sleep")
            .then_some("Thread sleep")
    });

    assert!(
        violations.is_empty(),
        "std::thread::sleep blocks a runtime worker:\n{}",
        violations
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    );
}
