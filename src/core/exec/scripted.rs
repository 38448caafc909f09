//! An executor that runs nothing.
//!
//! Backs `--dry-run` and the test suite: every invocation is recorded, the
//! reply comes from the first rule whose argv prefix matches (default: exit
//! 0, empty output), and the staged-write/copy/remove commands issued by
//! the provisioning file writer are replayed against an in-memory file map
//! so callers can inspect what would have been written where.

use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::error::{Error, Result, TargetDetails, TransportDetails};
use crate::exec::{CommandExecutor, CommandResult, Invocation};
use crate::provision::files;

enum Reply {
    Result(CommandResult),
    Transport,
}

struct Rule {
    prefix: Vec<String>,
    reply: Reply,
    /// Remaining uses; `None` means unlimited.
    remaining: Option<usize>,
}

#[derive(Default)]
struct State {
    log: Vec<Invocation>,
    files: BTreeMap<String, String>,
}

#[derive(Default)]
pub struct ScriptedExecutor {
    rules: Mutex<Vec<Rule>>,
    state: Mutex<State>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply with `result` to every command starting with `prefix`.
    pub fn respond(self, prefix: &[&str], result: CommandResult) -> Self {
        self.rule(prefix, Reply::Result(result), None)
    }

    /// Reply with `result` to the next matching command only.
    pub fn respond_once(self, prefix: &[&str], result: CommandResult) -> Self {
        self.rule(prefix, Reply::Result(result), Some(1))
    }

    pub fn fail(self, prefix: &[&str], exit_code: i32, stderr: &str) -> Self {
        self.respond(prefix, CommandResult::failed(exit_code, stderr))
    }

    /// Matching commands fail as if the target were unreachable.
    pub fn unreachable(self, prefix: &[&str]) -> Self {
        self.rule(prefix, Reply::Transport, None)
    }

    fn rule(self, prefix: &[&str], reply: Reply, remaining: Option<usize>) -> Self {
        if let Ok(mut rules) = self.rules.lock() {
            rules.push(Rule {
                prefix: prefix.iter().map(|s| s.to_string()).collect(),
                reply,
                remaining,
            });
        }
        self
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.state
            .lock()
            .map(|state| state.log.clone())
            .unwrap_or_default()
    }

    /// Rendered command lines, in order.
    pub fn commands(&self) -> Vec<String> {
        self.invocations().iter().map(Invocation::display).collect()
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().map(|state| state.log.len()).unwrap_or(0)
    }

    /// Files that would exist after replaying staged writes and copies.
    pub fn files(&self) -> BTreeMap<String, String> {
        self.state
            .lock()
            .map(|state| state.files.clone())
            .unwrap_or_default()
    }

    pub fn file(&self, path: &str) -> Option<String> {
        self.files().get(path).cloned()
    }

    fn reply_for(&self, argv: &[String]) -> Option<Reply> {
        let mut rules = self.rules.lock().ok()?;
        let index = rules.iter().position(|rule| {
            rule.remaining != Some(0) && argv.starts_with(&rule.prefix)
        })?;

        let rule = &mut rules[index];
        if let Some(remaining) = rule.remaining.as_mut() {
            *remaining -= 1;
        }
        Some(match &rule.reply {
            Reply::Result(result) => Reply::Result(result.clone()),
            Reply::Transport => Reply::Transport,
        })
    }

    fn replay_file_effects(state: &mut State, argv: &[String]) {
        if let Some((path, content)) = files::parse_staged_write(argv) {
            state.files.insert(path, content);
            return;
        }

        match argv {
            [cmd, from, to] if cmd == "cp" => {
                if let Some(content) = state.files.get(from).cloned() {
                    state.files.insert(to.clone(), content);
                }
            }
            [cmd, flag, path] if cmd == "rm" && flag == "-f" => {
                state.files.remove(path);
            }
            _ => {}
        }
    }
}

impl CommandExecutor for ScriptedExecutor {
    fn run(&self, invocation: &Invocation) -> Result<CommandResult> {
        invocation.command_line(&[])?;

        if let Ok(mut state) = self.state.lock() {
            state.log.push(invocation.clone());
        }

        let result = match self.reply_for(&invocation.argv) {
            Some(Reply::Transport) => {
                return Err(Error::ssh_connect_failed(
                    "Connection refused",
                    TransportDetails {
                        command: invocation.display(),
                        target: self.target(),
                        timeout_secs: None,
                        error: Some("scripted transport failure".to_string()),
                    },
                ));
            }
            Some(Reply::Result(result)) => result,
            None => CommandResult::ok(""),
        };

        if result.success() {
            if let Ok(mut state) = self.state.lock() {
                Self::replay_file_effects(&mut state, &invocation.argv);
            }
        }

        Ok(result)
    }

    fn target(&self) -> TargetDetails {
        TargetDetails {
            mode: "dry-run".to_string(),
            host: None,
            user: None,
        }
    }
}
