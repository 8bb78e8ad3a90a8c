//! Command classification: interactive rejection and server demotion.

use super::types::{
    INTERACTIVE_BASENAMES, REPL_BASENAMES, REPL_NONINTERACTIVE_FLAGS, SERVER_BASENAMES,
    SERVER_SUBCOMMANDS,
};

fn basename(token: &str) -> &str {
    token.rsplit(['/', '\\']).next().unwrap_or(token)
}

/// True if `argv`'s first token names a program that blocks waiting for a
/// terminal (editors, pagers, shells, REPLs) and none of the remaining
/// tokens turn it into a one-shot invocation.
pub fn is_interactive_command(argv: &[String]) -> bool {
    let Some(first) = argv.first() else {
        return false;
    };
    let name = basename(first);
    if !INTERACTIVE_BASENAMES.contains(&name) {
        return false;
    }

    if REPL_BASENAMES.contains(&name) {
        let rest = &argv[1..];
        let has_eval_flag = rest.iter().any(|a| REPL_NONINTERACTIVE_FLAGS.contains(&a.as_str()));
        let has_file_arg = rest.iter().any(|a| !a.starts_with('-'));
        return !(has_eval_flag || has_file_arg);
    }

    true
}

/// True if `argv` matches a known server-launching pattern: a server
/// basename combined with a subcommand that starts a long-running process.
/// The subcommand may appear directly after the basename (`npm dev`) or
/// after an intermediate `run` (`npm run dev`).
pub fn is_server_command(argv: &[String]) -> bool {
    let Some(first) = argv.first() else {
        return false;
    };
    let name = basename(first);
    if !SERVER_BASENAMES.contains(&name) {
        return false;
    }
    argv[1..].iter().any(|a| SERVER_SUBCOMMANDS.contains(&a.as_str()))
}
