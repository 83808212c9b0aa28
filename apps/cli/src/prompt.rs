//! Terminal confirmation and secret prompts.

use std::io::{self, BufRead, Write};

use mountshare_core::{Confirmation, ConfirmationPolicy};
use tracing::warn;

/// Asks on stderr and reads the answer from stdin. Anything but `y`/`yes`
/// declines.
pub struct TerminalPrompt<R> {
    input: R,
}

impl TerminalPrompt<io::StdinLock<'static>> {
    pub fn stdin() -> Self {
        Self {
            input: io::stdin().lock(),
        }
    }
}

impl<R: BufRead> TerminalPrompt<R> {
    pub fn new(input: R) -> Self {
        Self { input }
    }

    fn ask(&mut self, question: &str) -> io::Result<bool> {
        let mut stderr = io::stderr();
        write!(stderr, "{} [y/N] ", question)?;
        stderr.flush()?;

        let mut answer = String::new();
        self.input.read_line(&mut answer)?;
        Ok(is_yes(&answer))
    }
}

impl<R: BufRead> ConfirmationPolicy for TerminalPrompt<R> {
    fn confirm(&mut self, request: &Confirmation) -> bool {
        match self.ask(&format!("{}?", request)) {
            Ok(answer) => answer,
            Err(e) => {
                warn!(error = %e, "could not read answer, declining");
                false
            }
        }
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// Reads the share secret twice without echo and checks they match.
pub fn read_secret(user: &str) -> io::Result<Option<String>> {
    let first = rpassword::prompt_password(format!("Share password for {}: ", user))?;
    let second = rpassword::prompt_password("Retype password: ")?;
    if first != second {
        return Ok(None);
    }
    Ok(Some(first))
}
