//! Architectural Enforcement
//!
//! Source scanners backing the integration tests in this package. They
//! enforce the core crate's structural rules:
//! - No blocking I/O inside async code
//! - No locks inside the circuit breaker (state changes are CAS only)
//! - No `unwrap()` / `expect()` in production code
//!
//! The scan is line based. Everything from a file's first `#[cfg(test)]`
//! onward is treated as test code, and `test_utils.rs` files are skipped
//! entirely.

use std::fs;
use std::path::{Path, PathBuf};

/// One rule violation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Violation {
    /// File containing the violation
    pub path: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// Rule that was broken
    pub rule: &'static str,
    /// Offending source line, trimmed
    pub text: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
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

/// A production source line with its surrounding context
#[derive(Clone, Debug)]
pub struct CodeLine<'a> {
    /// 1-based line number
    pub number: usize,
    /// Line with any trailing `//` comment removed
    pub code: &'a str,
    /// Full original line
    pub raw: &'a str,
    /// Whether the line sits inside an `async fn` or `async` block
    pub in_async: bool,
}

/// Workspace root (two levels above this package)
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(2)
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

/// Source directory of the core crate
#[must_use]
pub fn core_src() -> PathBuf {
    workspace_root().join("switchboard").join("core").join("src")
}

/// Every production `.rs` file under `dir`
#[must_use]
pub fn rust_sources(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .map(walkdir::DirEntry::into_path)
        .filter(|p| p.extension().and_then(|s| s.to_str()) == Some("rs"))
        .filter(|p| p.file_name().and_then(|s| s.to_str()) != Some("test_utils.rs"))
        .collect();
    files.sort();
    files
}

/// Split a file into production lines, tracking async context
#[must_use]
pub fn production_lines(content: &str) -> Vec<CodeLine<'_>> {
    let mut lines = Vec::new();
    let mut depth: usize = 0;
    // (depth at which the scope opened, scope is async)
    let mut scopes: Vec<(usize, bool)> = Vec::new();
    let mut pending: Option<bool> = None;

    for (idx, raw) in content.lines().enumerate() {
        let trimmed = raw.trim_start();
        if trimmed.starts_with("#[cfg(test)]") {
            break;
        }
        if trimmed.starts_with("//") {
            continue;
        }
        let code = raw.split("//").next().unwrap_or(raw);

        if code.contains("fn ") {
            pending = Some(code.contains("async fn "));
        }
        if code.contains("async move {") || code.contains("async {") {
            pending = Some(true);
        }

        let in_async_before = scopes.iter().any(|(_, is_async)| *is_async);
        for ch in code.chars() {
            match ch {
                '{' => {
                    if let Some(is_async) = pending.take() {
                        scopes.push((depth, is_async));
                    }
                    depth += 1;
                }
                '}' => {
                    depth = depth.saturating_sub(1);
                    if scopes.last().is_some_and(|(open, _)| *open == depth) {
                        scopes.pop();
                    }
                }
                ';' => {
                    // Trait method declarations end without a body
                    pending = None;
                }
                _ => {}
            }
        }
        let in_async = in_async_before || scopes.iter().any(|(_, is_async)| *is_async);

        lines.push(CodeLine {
            number: idx + 1,
            code,
            raw,
            in_async,
        });
    }
    lines
}

/// Apply `check` to every production line of every file under `dir`
pub fn scan<F>(dir: &Path, rule: &'static str, check: F) -> Vec<Violation>
where
    F: Fn(&Path, &CodeLine<'_>) -> bool,
{
    let mut violations = Vec::new();
    for path in rust_sources(dir) {
        let Ok(content) = fs::read_to_string(&path) else {
            continue;
        };
        for line in production_lines(&content) {
            if check(&path, &line) {
                violations.push(Violation {
                    path: path.clone(),
                    line: line.number,
                    rule,
                    text: line.raw.trim().to_string(),
                });
            }
        }
    }
    violations
}

/// Blocking calls that must not appear in async code
pub const BLOCKING_CALLS: &[&str] = &[
    "std::fs::",
    "std::net::",
    "std::thread::sleep",
    "std::process::Command",
    "std::io::stdin()",
    "reqwest::blocking",
];

/// Whether a line performs blocking I/O from async code
#[must_use]
pub fn is_blocking_in_async(line: &CodeLine<'_>) -> bool {
    line.in_async && BLOCKING_CALLS.iter().any(|call| line.code.contains(call))
}

/// Whether a line takes a lock
#[must_use]
pub fn uses_lock(line: &CodeLine<'_>) -> bool {
    ["Mutex", "RwLock", ".lock()"]
        .iter()
        .any(|token| line.code.contains(token))
}

/// Whether a line panics on `None`/`Err`
#[must_use]
pub fn uses_unwrap(line: &CodeLine<'_>) -> bool {
    line.code.contains(".unwrap()") || line.code.contains(".expect(")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
fn load() -> String {
    std::fs::read_to_string("x").unwrap_or_default()
}

async fn fetch() {
    let data = std::fs::read("y"); // blocking
    tokio::spawn(async move {
        std::thread::sleep(d);
    });
}

fn sync_after() {
    std::fs::write("z", "");
}

#[cfg(test)]
mod tests {
    async fn ignored() { std::fs::read("t").unwrap(); }
}
"#;

    #[test]
    fn test_async_tracking() {
        let lines = production_lines(SAMPLE);
        let blocking: Vec<_> = lines
            .iter()
            .filter(|l| is_blocking_in_async(l))
            .map(|l| l.number)
            .collect();

        assert_eq!(blocking, vec![7, 9]);
    }

    #[test]
    fn test_test_module_excluded() {
        let lines = production_lines(SAMPLE);
        assert!(lines.iter().all(|l| !uses_unwrap(l)));
        assert!(lines.iter().all(|l| !l.raw.contains("ignored")));
    }

    #[test]
    fn test_comment_stripped() {
        let lines = production_lines("let x = 1; // .unwrap() here\n");
        assert!(!uses_unwrap(&lines[0]));
    }
}
