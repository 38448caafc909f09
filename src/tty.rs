//! Terminal I/O for the CLI.
//!
//! Secrets are read from stdin, never from argv.

use std::io::{self, BufRead, IsTerminal, Write};

use skydock::Error;

pub fn is_stdin_tty() -> bool {
    io::stdin().is_terminal()
}

/// One line from stdin with the trailing newline removed. Prompts on
/// stderr only when stdin is a terminal.
pub fn read_secret(prompt: &str, field: &str) -> skydock::Result<String> {
    if is_stdin_tty() {
        eprint!("{}", prompt);
        io::stderr().flush().ok();
    }

    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .map_err(|e| Error::internal_io(e.to_string(), Some(format!("read {}", field))))?;

    let secret = line.trim_end_matches(['\r', '\n']).to_string();
    if secret.is_empty() {
        return Err(Error::validation_missing_argument(vec![field.to_string()]));
    }
    Ok(secret)
}

/// Status line on stderr when a human is watching.
pub fn status(message: &str) {
    if io::stderr().is_terminal() {
        eprintln!("{}", message);
    }
}
