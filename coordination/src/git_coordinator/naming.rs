//! Branch naming and credential-path guarding.
//!
//! Kept as a small, heavily unit-tested sibling to `shell_safety`, the way
//! this codebase separates its injection-guarding concerns from the rest
//! of the git/process logic.

const MAX_BRANCH_LEN: usize = 60;

/// `agent/<ticket-id>-<slug(description)>`, truncated so the full branch
/// name never exceeds 60 characters. `slug` lowercases, strips anything
/// outside `[a-z0-9-]`, and collapses runs of `-`.
pub fn task_branch_name(ticket_id: &str, description: &str) -> String {
    let prefix = format!("agent/{ticket_id}-");
    let budget = MAX_BRANCH_LEN.saturating_sub(prefix.chars().count());
    let slug = slug(description, budget);
    format!("{prefix}{slug}")
}

fn slug(input: &str, max_len: usize) -> String {
    let mut out = String::new();
    let mut last_was_dash = false;
    for ch in input.to_lowercase().chars() {
        let mapped = if ch.is_ascii_alphanumeric() {
            Some(ch)
        } else {
            Some('-')
        };
        if let Some(c) = mapped {
            if c == '-' {
                if last_was_dash || out.is_empty() {
                    continue;
                }
                last_was_dash = true;
            } else {
                last_was_dash = false;
            }
            out.push(c);
        }
        if out.chars().count() >= max_len {
            break;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}

/// `[<ticket-id>] <description>`, exactly.
pub fn commit_message(ticket_id: &str, description: &str) -> String {
    format!("[{ticket_id}] {description}")
}

/// True if `path` names (or is nested under, at any depth) a `.ssh`
/// directory, or matches a private-key/known-hosts basename outside one.
/// Sibling names like `.ssh2`/`.sshconfig` are deliberately not matched.
pub fn is_forbidden_path(path: &str) -> bool {
    let normalized = path.replace('\\', "/");
    let tokens = ["~/.ssh", "$HOME/.ssh", "${HOME}/.ssh"];
    if tokens.iter().any(|t| normalized == *t || normalized.starts_with(&format!("{t}/"))) {
        return true;
    }

    let segments: Vec<&str> = normalized.split('/').filter(|s| !s.is_empty()).collect();
    if segments.iter().any(|s| *s == ".ssh") {
        // the `.ssh` directory itself, or anything nested under it at any
        // depth, regardless of basename.
        return true;
    }

    // not under a `.ssh` directory at all; still forbid key-like basenames
    // wherever they turn up (e.g. a key copied into the repo proper).
    segments.last().is_some_and(|b| is_forbidden_basename(b))
}

fn is_forbidden_basename(basename: &str) -> bool {
    basename.starts_with("id_rsa")
        || basename.starts_with("id_ed25519")
        || basename == "known_hosts"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_name_slugs_description() {
        let name = task_branch_name("T-42", "Fix Login Bug!!");
        assert_eq!(name, "agent/T-42-fix-login-bug");
    }

    #[test]
    fn branch_name_empty_description() {
        let name = task_branch_name("T-1", "");
        assert_eq!(name, "agent/T-1-");
    }

    #[test]
    fn branch_name_never_has_double_dash() {
        let name = task_branch_name("T-1", "a   b---c");
        assert!(!name.contains("--"));
    }

    #[test]
    fn branch_name_truncated_to_60_chars() {
        let long_desc = "a".repeat(200);
        let name = task_branch_name("T-1", &long_desc);
        assert!(name.len() <= MAX_BRANCH_LEN);
    }

    #[test]
    fn commit_message_format_is_exact() {
        assert_eq!(commit_message("T-9", "add retry logic"), "[T-9] add retry logic");
    }

    #[test]
    fn ssh_directory_itself_is_forbidden() {
        assert!(is_forbidden_path("/home/user/.ssh"));
        assert!(is_forbidden_path("~/.ssh"));
        assert!(is_forbidden_path("$HOME/.ssh"));
        assert!(is_forbidden_path("${HOME}/.ssh"));
    }

    #[test]
    fn ssh_nested_paths_are_forbidden() {
        assert!(is_forbidden_path("/home/user/.ssh/config"));
        assert!(is_forbidden_path("/home/user/.ssh/id_rsa"));
        assert!(is_forbidden_path("/home/user/.ssh/id_rsa.pub"));
        assert!(is_forbidden_path("/home/user/.ssh/id_ed25519"));
        assert!(is_forbidden_path("/home/user/.ssh/known_hosts"));
    }

    #[test]
    fn sibling_names_are_allowed() {
        assert!(!is_forbidden_path("/home/user/.ssh2"));
        assert!(!is_forbidden_path("/home/user/.sshconfig"));
    }

    #[test]
    fn unrelated_path_is_allowed() {
        assert!(!is_forbidden_path("/home/user/project/src/main.rs"));
    }
}
