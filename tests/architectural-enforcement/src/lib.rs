//! Architectural Enforcement Helpers
//!
//! Source scanning shared by the policy tests in `tests/`:
//! - Timers go through the scheduler, never straight to tokio or the OS
//! - No blocking I/O inside async functions
//!
//! Only production code is scanned. Everything from the first
//! `#[cfg(test)]` line of a file onward is skipped, as are comments.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Source directories holding production code, relative to the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["billboard/core/src", "billboard/daemon/src"];

/// Workspace root, resolved from this crate's manifest directory
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../..")
}

/// All `.rs` files under the production directories
#[must_use]
pub fn production_files() -> Vec<PathBuf> {
    let root = workspace_root();
    let mut files = Vec::new();
    for dir in PRODUCTION_DIRS {
        let path = root.join(dir);
        if !path.exists() {
            continue;
        }
        for entry in walkdir::WalkDir::new(path)
            .into_iter()
            .filter_map(Result::ok)
        {
            if entry.path().extension().and_then(|s| s.to_str()) == Some("rs") {
                files.push(entry.into_path());
            }
        }
    }
    files.sort();
    files
}

/// A source line that breaks a rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub path: PathBuf,
    pub line: usize,
    pub rule: &'static str,
    pub text: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} - {}: {}",
            self.path.display(),
            self.line,
            self.rule,
            self.text
        )
    }
}

/// Production lines of `content` as `(line_number, code)`, comments removed
#[must_use]
pub fn production_lines(content: &str) -> Vec<(usize, &str)> {
    content
        .lines()
        .enumerate()
        .take_while(|(_, line)| !line.trim_start().starts_with("#[cfg(test)]"))
        .map(|(idx, line)| (idx + 1, strip_comment(line)))
        .filter(|(_, code)| !code.trim().is_empty())
        .collect()
}

fn strip_comment(line: &str) -> &str {
    match line.find("//") {
        // Leave `://` inside URLs alone
        Some(pos) if pos > 0 && line[..pos].ends_with(':') => line,
        Some(pos) => &line[..pos],
        None => line,
    }
}

/// Whether the nearest function header at or above `idx` declares an `async fn`
#[must_use]
pub fn in_async_function(lines: &[(usize, &str)], idx: usize) -> bool {
    for (_, code) in lines[..=idx].iter().rev() {
        if is_fn_header(code) {
            return code.contains("async fn ");
        }
    }
    false
}

fn is_fn_header(code: &str) -> bool {
    let code = code.trim_start();
    code.starts_with("fn ") || code.contains(" fn ") || code.starts_with("async fn ")
}

/// Scan every production file with `check`, collecting violations
pub fn scan<F>(mut check: F) -> Vec<Violation>
where
    F: FnMut(&Path, &[(usize, &str)], usize) -> Option<&'static str>,
{
    let mut violations = Vec::new();
    for path in production_files() {
        let Ok(content) = fs::read_to_string(&path) else {
            continue;
        };
        let lines = production_lines(&content);
        for idx in 0..lines.len() {
            if let Some(rule) = check(&path, &lines, idx) {
                let (line, text) = lines[idx];
                violations.push(Violation {
                    path: path.clone(),
                    line,
                    rule,
                    text: text.trim().to_string(),
                });
            }
        }
    }
    violations
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_test_modules_and_comments_are_skipped() {
        let source = "fn a() {} // tokio::time::sleep\n\
                      let url = \"http://example.com\";\n\
                      #[cfg(test)]\n\
                      mod tests { fn b() { tokio::time::sleep(d); } }\n";
        let lines = production_lines(source);

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], (1, "fn a() {} "));
        assert!(lines[1].1.contains("http://example.com"));
    }

    #[test]
    fn test_async_detection_uses_nearest_function() {
        let source = "async fn run() {\n    work();\n}\nfn load() {\n    read();\n}\n";
        let lines = production_lines(source);

        assert!(in_async_function(&lines, 1));
        assert!(!in_async_function(&lines, 4));
    }

    #[test]
    fn test_production_sources_are_found() {
        let files = production_files();
        assert!(files.iter().any(|p| p.ends_with("billboard/core/src/scheduler.rs")));
        assert!(files.iter().any(|p| p.ends_with("billboard/daemon/src/main.rs")));
    }
}
