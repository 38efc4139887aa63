//! Domain-specific assertions for DriverLedger tests

use predicates::prelude::*;
use serde_json::Value;

/// Assert that stderr does NOT contain any of the given strings
///
/// Useful for verifying that certain log messages or errors don't appear.
///
/// # Example
///
/// ```rust
/// use ledger_test_helpers::assertions::stderr_not_contains;
/// use predicates::prelude::*;
///
/// assert!(stderr_not_contains(&["ERROR", "WARN"]).eval("all good"));
/// ```
pub fn stderr_not_contains(values: &[&str]) -> impl Predicate<str> {
    let owned_values: Vec<String> = values.iter().map(|&s| s.to_string()).collect();
    predicate::function(move |s: &str| !owned_values.iter().any(|v| s.contains(v.as_str())))
}

/// Assert that output is a single JSON document
pub fn valid_json() -> impl Predicate<str> {
    predicate::function(|s: &str| serde_json::from_str::<Value>(s.trim()).is_ok())
}

/// Assert that output is JSON whose value at `pointer` equals `expected`
///
/// # Example
///
/// ```rust
/// use ledger_test_helpers::assertions::json_pointer_eq;
/// use predicates::prelude::*;
/// use serde_json::json;
///
/// let output = r#"{"syncStatus":{"state":"synced"}}"#;
/// assert!(json_pointer_eq("/syncStatus/state", json!("synced")).eval(output));
/// ```
pub fn json_pointer_eq(pointer: &str, expected: Value) -> impl Predicate<str> {
    let pointer = pointer.to_string();
    predicate::function(move |s: &str| {
        serde_json::from_str::<Value>(s.trim())
            .ok()
            .and_then(|doc| doc.pointer(&pointer).cloned())
            .map_or(false, |found| found == expected)
    })
}

/// Assert that output mentions no user directory or email address
pub fn no_user_identifiers(user: &str) -> impl Predicate<str> {
    let needle = format!("users/{}", user);
    predicate::function(move |s: &str| !s.contains(&needle) && !s.contains('@'))
}
