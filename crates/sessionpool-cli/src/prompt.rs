//! Interactive credential prompt

use std::io::{BufRead, BufReader, IsTerminal, Stdin, Write};

use parking_lot::Mutex;
use sessionpool_core::{CredentialPrompt, PoolError, Result};

/// Asks for missing connect parameters on a line-oriented reader.
///
/// An empty answer declines the prompt.
pub struct LinePrompt<R> {
    input: Mutex<R>,
}

impl<R: BufRead + Send> LinePrompt<R> {
    pub fn new(input: R) -> Self {
        Self {
            input: Mutex::new(input),
        }
    }
}

impl LinePrompt<BufReader<Stdin>> {
    /// Prompt on stdin, if stdin is a terminal
    pub fn stdin() -> Option<Self> {
        let stdin = std::io::stdin();
        stdin
            .is_terminal()
            .then(|| Self::new(BufReader::new(stdin)))
    }
}

impl<R: BufRead + Send> CredentialPrompt for LinePrompt<R> {
    fn prompt(&self, field: &str) -> Result<Option<String>> {
        eprint!("{}: ", field);
        std::io::stderr().flush()?;

        let mut line = String::new();
        let read = self.input.lock().read_line(&mut line)?;
        if read == 0 {
            return Err(PoolError::Other(format!("no input while prompting for {}", field)));
        }

        let answer = line.trim_end_matches(['\r', '\n']);
        Ok((!answer.is_empty()).then(|| answer.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_reads_one_answer_per_prompt() {
        let prompt = LinePrompt::new(Cursor::new("scott\n\n"));
        assert_eq!(prompt.prompt("user").unwrap().as_deref(), Some("scott"));
        assert_eq!(prompt.prompt("password").unwrap(), None);
        assert!(prompt.prompt("dsn").is_err());
    }
}
