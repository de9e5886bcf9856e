//! Pre-invocation ACL checks.
//!
//! The permission handler runs before every tool call, independently of the
//! audit hooks. Path checks operate on resolved paths: a block list that
//! looks at the raw argument can be bypassed with a symlink.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Path resolution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Resolve a path for policy checks: follow symlinks where the path exists;
/// for a path that does not exist yet, canonicalize the deepest existing
/// ancestor and normalise the remainder lexically. A write that would
/// *create* a file under a protected prefix is thereby still caught, and a
/// symlinked parent directory is still followed.
pub fn resolve_path(raw: impl AsRef<Path>) -> PathBuf {
    let path = raw.as_ref();
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };

    if let Ok(resolved) = absolute.canonicalize() {
        return resolved;
    }

    let mut tail: Vec<std::ffi::OsString> = Vec::new();
    let mut head = absolute.clone();
    while let (Some(parent), Some(name)) = (
        head.parent().map(Path::to_path_buf),
        head.file_name().map(|n| n.to_os_string()),
    ) {
        tail.push(name);
        head = parent;
        if let Ok(resolved) = head.canonicalize() {
            let mut out = resolved;
            for name in tail.iter().rev() {
                out.push(name);
            }
            return lexical_normalize(&out);
        }
    }

    lexical_normalize(&absolute)
}

/// Collapse `.` and `..` components without touching the filesystem.
fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Permission handler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionDecision {
    Allow,
    Deny { message: String },
}

/// Pre-invocation ACL callback, consulted by the SDK before each tool use.
#[async_trait]
pub trait PermissionHandler: Send + Sync {
    async fn check(&self, tool_name: &str, input: &Value) -> PermissionDecision;
}

/// Tools whose `file_path` argument is a write target.
const WRITE_TOOLS: &[&str] = &["Write", "Edit"];

/// Denies file writes whose resolved path falls under a blocked system
/// directory.
pub struct PathPolicy {
    blocked_prefixes: Vec<String>,
}

impl PathPolicy {
    pub fn new(blocked_prefixes: Vec<String>) -> Self {
        Self { blocked_prefixes }
    }

    /// The system directories the agent must never write to.
    pub fn with_system_defaults() -> Self {
        Self::new(
            ["/etc", "/usr", "/bin", "/sbin", "/var", "/boot", "/sys", "/proc", "/dev"]
                .into_iter()
                .map(str::to_owned)
                .collect(),
        )
    }

    fn blocked_prefix_for(&self, raw_path: &str) -> Option<&str> {
        let resolved = resolve_path(raw_path);
        let resolved = resolved.to_string_lossy();
        self.blocked_prefixes
            .iter()
            .find(|prefix| resolved.starts_with(prefix.as_str()))
            .map(String::as_str)
    }
}

#[async_trait]
impl PermissionHandler for PathPolicy {
    async fn check(&self, tool_name: &str, input: &Value) -> PermissionDecision {
        if WRITE_TOOLS.contains(&tool_name) {
            let raw_path = input
                .get("file_path")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if let Some(prefix) = self.blocked_prefix_for(raw_path) {
                tracing::warn!(tool_name, path = raw_path, prefix, "permission denied");
                return PermissionDecision::Deny {
                    message: format!("Cannot write to system directory: {prefix}"),
                };
            }
        }
        PermissionDecision::Allow
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lexical_normalize_collapses_dotdot() {
        assert_eq!(
            lexical_normalize(Path::new("/etc/../etc/passwd")),
            PathBuf::from("/etc/passwd")
        );
        assert_eq!(
            lexical_normalize(Path::new("/a/./b/../c")),
            PathBuf::from("/a/c")
        );
    }

    #[test]
    fn resolve_nonexistent_path_normalizes() {
        let resolved = resolve_path("/definitely/not/../not/here.txt");
        assert_eq!(resolved, PathBuf::from("/definitely/not/here.txt"));
    }

    #[cfg(unix)]
    #[test]
    fn resolve_follows_symlinked_parent_for_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("target");
        std::fs::create_dir(&target).unwrap();
        let link = dir.path().join("link");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        // `link/new.txt` does not exist; the symlinked parent must still
        // be followed.
        let resolved = resolve_path(link.join("new.txt"));
        let expected = target.canonicalize().unwrap().join("new.txt");
        assert_eq!(resolved, expected);
    }

    #[tokio::test]
    async fn write_to_blocked_prefix_denied() {
        let policy = PathPolicy::with_system_defaults();
        let decision = policy
            .check("Write", &json!({"file_path": "/etc/passwd"}))
            .await;
        assert!(matches!(
            decision,
            PermissionDecision::Deny { ref message } if message.contains("/etc")
        ));
    }

    #[tokio::test]
    async fn traversal_into_blocked_prefix_denied() {
        let policy = PathPolicy::with_system_defaults();
        let decision = policy
            .check("Edit", &json!({"file_path": "/tmp/../etc/passwd"}))
            .await;
        assert!(matches!(decision, PermissionDecision::Deny { .. }));
    }

    #[tokio::test]
    async fn write_outside_blocked_prefixes_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let policy = PathPolicy::with_system_defaults();
        let path = dir.path().join("out.txt");
        let decision = policy
            .check("Write", &json!({"file_path": path.to_string_lossy()}))
            .await;
        assert_eq!(decision, PermissionDecision::Allow);
    }

    #[tokio::test]
    async fn non_write_tools_are_not_path_checked() {
        let policy = PathPolicy::with_system_defaults();
        let decision = policy
            .check("Read", &json!({"file_path": "/etc/passwd"}))
            .await;
        assert_eq!(decision, PermissionDecision::Allow);
    }

    #[tokio::test]
    async fn prefix_match_is_plain_string_prefix() {
        // The block list compares raw string prefixes, so a sibling path
        // like "/etcetera" is also denied. The audit-side policy, whose
        // prefixes carry a trailing slash, is the boundary-aware layer.
        let policy = PathPolicy::with_system_defaults();
        let decision = policy
            .check("Write", &json!({"file_path": "/etcetera/notes.txt"}))
            .await;
        assert!(matches!(decision, PermissionDecision::Deny { .. }));
    }
}
