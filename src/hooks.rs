//! Entry points for the agent runtime's lifecycle hooks.
//!
//! Both hooks fail open: a payload we cannot read, a session we cannot
//! resolve or a store we cannot open never blocks the caller. `stop`
//! approves and `pretooluse` stays silent.

use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::json;
use shell_escape::escape;
use tracing::{debug, warn};

use crate::config::{self, Workspace};
use crate::decision::{self, StopDecision};
use crate::engine::Engine;
use crate::error::AppError;
use crate::store::Store;

const PROGRAM: &str = "planloop";

#[derive(Debug, Default, Deserialize)]
struct Payload {
    session_id: Option<String>,
    cwd: Option<String>,
    permission_mode: Option<String>,
    tool_name: Option<String>,
    tool_input: Option<ToolInput>,
}

#[derive(Debug, Default, Deserialize)]
struct ToolInput {
    command: Option<String>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|text| !text.trim().is_empty())
}

/// Reads the hook payload from stdin unless stdin is a terminal.
pub fn read_stdin() -> io::Result<String> {
    let mut stdin = io::stdin();
    if stdin.is_terminal() {
        return Ok(String::new());
    }
    let mut buffer = String::new();
    stdin.read_to_string(&mut buffer)?;
    Ok(buffer)
}

/// Stop hook. Values in the payload win over the global flags.
pub async fn stop(payload: &str, cwd: Option<PathBuf>, session_id: Option<String>) -> String {
    let decision = match evaluate_stop(payload, cwd, session_id).await {
        Ok(decision) => decision,
        Err(err) => {
            warn!(error = %err, "stop hook could not evaluate; approving");
            StopDecision::Approve
        }
    };
    decision
        .to_json()
        .unwrap_or_else(|_| r#"{"decision":"approve"}"#.to_string())
}

async fn evaluate_stop(
    payload: &str,
    cwd: Option<PathBuf>,
    session_id: Option<String>,
) -> Result<StopDecision, AppError> {
    let payload: Payload = if payload.trim().is_empty() {
        Payload::default()
    } else {
        serde_json::from_str(payload)?
    };
    let session_id = config::resolve_session(non_blank(payload.session_id).or(session_id))?;
    let cwd = non_blank(payload.cwd).map(PathBuf::from).or(cwd);
    let workspace = Workspace::resolve(cwd.as_deref())?;

    let store_path = workspace.store_path();
    if !store_path.exists() {
        debug!(path = %store_path.display(), "no store; nothing to drive");
        return Ok(StopDecision::Approve);
    }
    let mut lock = workspace.open_lock()?;
    let _guard = lock.write()?;
    let store = Store::open(&store_path).await?;
    decision::decide(&Engine::new(store, session_id)).await
}

/// Pre-tool-use hook. Returns the JSON to print, or `None` to pass through.
pub fn pretooluse(payload: &str) -> Option<String> {
    let payload: Payload = match serde_json::from_str(payload) {
        Ok(payload) => payload,
        Err(err) => {
            debug!(error = %err, "pretooluse payload unreadable");
            return None;
        }
    };
    if payload.tool_name.as_deref() != Some("Bash") {
        return None;
    }
    let command = non_blank(payload.tool_input.and_then(|input| input.command))?;
    let session_id = non_blank(payload.session_id)?;
    let cwd = non_blank(payload.cwd)?;

    let updated = inject_context(&command, Path::new(&cwd), &session_id)?;
    let decision = match payload.permission_mode.as_deref() {
        Some("ask") => "ask",
        _ => "allow",
    };
    let output = json!({
        "hookSpecificOutput": {
            "hookEventName": "PreToolUse",
            "permissionDecision": decision,
            "updatedInput": { "command": updated },
        }
    });
    Some(output.to_string())
}

/// Adds `--cwd` and `--session-id` right after the program word. `None`
/// when the command does not invoke us or already passes either flag.
fn inject_context(command: &str, cwd: &Path, session_id: &str) -> Option<String> {
    let at = program_insertion_point(command)?;
    let cwd = cwd.to_string_lossy();
    Some(format!(
        "{} --cwd {} --session-id {}{}",
        &command[..at],
        escape(cwd),
        escape(session_id.into()),
        &command[at..]
    ))
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Quote {
    Bare,
    Single,
    Double,
}

/// An unquoted word as a byte range of the command.
#[derive(Clone, Copy, Debug)]
struct Word {
    start: usize,
    end: usize,
    at_start: bool,
}

fn starts_command(byte: u8) -> bool {
    matches!(byte, b'\n' | b';' | b'&' | b'|' | b'(')
}

fn ends_word(byte: u8) -> bool {
    byte.is_ascii_whitespace() || starts_command(byte) || matches!(byte, b')' | b'\'' | b'"')
}

/// Splits the command into unquoted words, noting which ones sit at a
/// command position. Quoted text and escaped bytes never form words.
fn bare_words(command: &str) -> Vec<Word> {
    let bytes = command.as_bytes();
    let mut words = Vec::new();
    let mut quote = Quote::Bare;
    let mut escaped = false;
    let mut at_start = true;
    let mut idx = 0;

    while idx < bytes.len() {
        let byte = bytes[idx];
        if escaped {
            escaped = false;
            at_start = false;
            idx += 1;
            continue;
        }
        match quote {
            Quote::Single => {
                if byte == b'\'' {
                    quote = Quote::Bare;
                }
                idx += 1;
                continue;
            }
            Quote::Double => {
                match byte {
                    b'"' => quote = Quote::Bare,
                    b'\\' => escaped = true,
                    _ => {}
                }
                idx += 1;
                continue;
            }
            Quote::Bare => {}
        }

        match byte {
            b'\\' => escaped = true,
            b'\'' => {
                quote = Quote::Single;
                at_start = false;
            }
            b'"' => {
                quote = Quote::Double;
                at_start = false;
            }
            _ if starts_command(byte) => at_start = true,
            _ if byte.is_ascii_whitespace() => {}
            _ => {
                let end = bytes[idx..]
                    .iter()
                    .position(|b| ends_word(*b))
                    .map_or(bytes.len(), |offset| idx + offset);
                words.push(Word {
                    start: idx,
                    end,
                    at_start,
                });
                at_start = false;
                idx = end;
                continue;
            }
        }
        idx += 1;
    }
    words
}

/// Byte offset just past the first unquoted program word at a command
/// position that is followed by at least one argument. `None` when that
/// invocation already passes `--cwd` or `--session-id`.
fn program_insertion_point(command: &str) -> Option<usize> {
    let bytes = command.as_bytes();
    let words = bare_words(command);
    let found = words.iter().position(|word| {
        word.at_start
            && is_program(&bytes[word.start..word.end])
            && has_arguments(&bytes[word.end..])
    })?;
    let passes_context = words[found + 1..]
        .iter()
        .take_while(|word| !word.at_start)
        .any(|word| is_context_flag(&bytes[word.start..word.end]));
    (!passes_context).then_some(words[found].end)
}

fn is_context_flag(word: &[u8]) -> bool {
    [b"--cwd".as_slice(), b"--session-id".as_slice()]
        .into_iter()
        .any(|flag| {
            word == flag || word.strip_prefix(flag).is_some_and(|rest| rest.starts_with(b"="))
        })
}

fn is_program(word: &[u8]) -> bool {
    let name = match word.iter().rposition(|b| *b == b'/') {
        Some(slash) => &word[slash + 1..],
        None => word,
    };
    name == PROGRAM.as_bytes()
}

/// The program word must be followed by blanks and then something other
/// than a command separator.
fn has_arguments(rest: &[u8]) -> bool {
    let Some((first, _)) = rest.split_first() else {
        return false;
    };
    if !matches!(first, b' ' | b'\t') {
        return false;
    }
    rest.iter()
        .find(|b| !matches!(b, b' ' | b'\t'))
        .is_some_and(|next| !starts_command(*next) && *next != b')')
}

#[cfg(test)]
mod tests {
    use serde_json::Value;
    use tempfile::TempDir;

    use super::*;
    use crate::model::{Executor, PlanDraft};

    fn injected(command: &str) -> Option<String> {
        inject_context(command, Path::new("/work dir"), "s-1")
    }

    #[test]
    fn detects_invocations_at_command_positions() {
        for command in [
            "planloop step show-next",
            "  planloop step show-next",
            "cd /tmp && planloop plan list",
            "cd /tmp&&planloop plan list",
            "planloop\tstep show-next",
            "echo hi | planloop goal list 3",
            "pwd;planloop step show-next",
            "(planloop plan list)",
            "./target/debug/planloop plan list",
            "true\nplanloop plan list",
        ] {
            assert!(program_insertion_point(command).is_some(), "{command}");
        }
    }

    #[test]
    fn ignores_quoted_bare_and_embedded_names() {
        for command in [
            "planloop",
            "planloop && echo hi",
            "planloop;echo hi",
            "planloop.sh step",
            "echo planloop step",
            "echo 'planloop step show-next'",
            "echo \"planloop step show-next\"",
            "echo \"a\\\" ; planloop plan list\"",
            "xplanloop plan list",
        ] {
            assert!(program_insertion_point(command).is_none(), "{command}");
        }
    }

    #[test]
    fn flags_follow_the_program_word() {
        assert_eq!(
            injected("  planloop step show-next").unwrap(),
            "  planloop --cwd '/work dir' --session-id s-1 step show-next"
        );
        assert_eq!(
            injected("echo hi | planloop plan list").unwrap(),
            "echo hi | planloop --cwd '/work dir' --session-id s-1 plan list"
        );
        assert_eq!(
            injected("cd /tmp&&planloop plan list").unwrap(),
            "cd /tmp&&planloop --cwd '/work dir' --session-id s-1 plan list"
        );
    }

    #[test]
    fn quoted_arguments_survive_injection() {
        let command = "planloop plan add \"Bob's plan\" 'it''s (fine)'";
        let updated = injected(command).unwrap();
        assert!(updated.ends_with("plan add \"Bob's plan\" 'it''s (fine)'"));
    }

    #[test]
    fn commands_with_flags_are_left_alone() {
        assert!(injected("planloop --session-id x plan list").is_none());
        assert!(injected("planloop --cwd /a plan list").is_none());
        assert!(injected("planloop --session-id=x plan list").is_none());
        assert!(injected("cd /a && planloop plan list --cwd='/b c'").is_none());
    }

    #[test]
    fn flag_names_in_quoted_text_do_not_block_injection() {
        let updated = injected("planloop plan add Fix 'document the --cwd flag'").unwrap();
        assert_eq!(
            updated,
            "planloop --cwd '/work dir' --session-id s-1 plan add Fix 'document the --cwd flag'"
        );
        let updated = injected("planloop step add 1 \"pass --session-id=x\"").unwrap();
        assert!(updated.ends_with("step add 1 \"pass --session-id=x\""));
        assert!(injected("echo --cwd; planloop plan list").is_some());
        assert!(injected("planloop plan list --cwdx").is_some());
    }

    #[test]
    fn pretooluse_emits_updated_command() {
        let payload = r#"{
            "tool_name": "Bash",
            "tool_input": {"command": "planloop step show-next"},
            "session_id": "abc",
            "cwd": "/repo",
            "permission_mode": "ask"
        }"#;
        let output: Value = serde_json::from_str(&pretooluse(payload).unwrap()).unwrap();
        let specific = &output["hookSpecificOutput"];
        assert_eq!(specific["hookEventName"], "PreToolUse");
        assert_eq!(specific["permissionDecision"], "ask");
        assert_eq!(
            specific["updatedInput"]["command"],
            "planloop --cwd /repo --session-id abc step show-next"
        );
    }

    #[test]
    fn pretooluse_passes_through_other_tools_and_bad_input() {
        assert!(pretooluse("not json").is_none());
        assert!(pretooluse(r#"{"tool_name":"Read","session_id":"a","cwd":"/"}"#).is_none());
        let without_session = r#"{"tool_name":"Bash","tool_input":{"command":"planloop plan list"},"cwd":"/"}"#;
        assert!(pretooluse(without_session).is_none());
    }

    #[tokio::test]
    async fn stop_approves_when_it_cannot_evaluate() {
        assert_eq!(stop("{", None, None).await, r#"{"decision":"approve"}"#);
        assert_eq!(stop("", None, None).await, r#"{"decision":"approve"}"#);
    }

    #[tokio::test]
    async fn stop_approves_without_store() {
        let dir = TempDir::new().unwrap();
        let output = stop("", Some(dir.path().to_path_buf()), Some("s".to_string())).await;
        assert_eq!(output, r#"{"decision":"approve"}"#);
        assert!(!Workspace::at(dir.path()).store_path().exists());
    }

    #[tokio::test]
    async fn stop_blocks_on_pending_ai_step() {
        let dir = TempDir::new().unwrap();
        let workspace = Workspace::at(dir.path());
        workspace.prepare().unwrap();
        let store = Store::open(&workspace.store_path()).await.unwrap();
        let engine = Engine::new(store, "s-stop");
        let plan = engine
            .add_plan(PlanDraft {
                title: "Plan".to_string(),
                content: "Content".to_string(),
            })
            .await
            .unwrap();
        engine
            .add_steps(plan.id, vec!["Do it".to_string()], Executor::Ai, None)
            .await
            .unwrap();
        engine.activate(plan.id, false).await.unwrap();
        drop(engine);

        let payload = json!({
            "session_id": "s-stop",
            "cwd": dir.path().to_string_lossy(),
        })
        .to_string();
        let output: Value = serde_json::from_str(&stop(&payload, None, None).await).unwrap();
        assert_eq!(output["decision"], "block");
        let reason = output["reason"].as_str().unwrap();
        assert!(reason.starts_with("Planloop (auto):"));
        assert!(reason.contains("Content: Do it"));
    }
}
