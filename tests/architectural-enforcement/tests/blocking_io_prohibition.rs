//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: Async functions in production code MUST NOT use blocking I/O.
//! **Required**: `tokio::fs` and async `reqwest`, not `std::fs`, `std::net`
//! or `reqwest::blocking`.
//!
//! Synchronous functions (configuration loading before the runtime has
//! work to do, CLI parsing) are allowed to block.

const BLOCKING_CALLS: &[(&str, &str)] = &[
    ("std::fs::", "Blocking file I/O"),
    ("std::net::", "Blocking network I/O"),
    ("reqwest::blocking", "Blocking HTTP client"),
    ("std::process::Command", "Blocking process I/O"),
    ("std::io::stdin()", "Blocking stdin"),
];

#[test]
fn test_no_blocking_io_in_async_functions() {
    let violations = architecture::scan(|_, lines, idx| {
        let code = lines[idx].1;
        let (_, rule) = BLOCKING_CALLS
            .iter()
            .find(|(pattern, _)| code.contains(pattern))?;
        architecture::in_async_function(lines, idx).then_some(*rule)
    });

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: Blocking I/O inside async functions!\n");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }
        eprintln!("\n✅ REQUIRED async I/O:");
        eprintln!("  - tokio::fs::read_to_string(path).await");
        eprintln!("  - reqwest::Client::get(url).send().await");

        panic!(
            "\nFound {} blocking I/O violation(s) in production code.",
            violations.len()
        );
    }
}

#[test]
fn test_no_blocking_http_client_anywhere() {
    let violations =
        architecture::scan(|_, lines, idx| lines[idx].1.contains("reqwest::blocking").then_some("Blocking HTTP client"));

    assert!(violations.is_empty(), "{violations:?}");
}
