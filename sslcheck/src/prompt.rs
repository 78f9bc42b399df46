use std::io::{self, BufRead, IsTerminal as _, Write};

use anyhow::Context as _;
use secrecy::SecretString;

use crate::term::{InputMode, InputModeGuard};

/// Interactive questions asked while collecting the credential bundle.
pub trait Prompter {
    /// Asks the user to pick one of `choices` and returns the selected index.
    ///
    /// `default` is accepted when the answer is empty.
    fn select(&mut self, message: &str, choices: &[String], default: Option<usize>) -> anyhow::Result<usize>;

    /// Reads a secret answer.
    fn password(&mut self, message: &str) -> anyhow::Result<SecretString>;
}

/// Line-oriented prompter.
///
/// Passphrases are read with echo disabled when `hide_input` is set.
pub struct TermPrompter<R, W> {
    input: R,
    output: W,
    hide_input: bool,
}

impl TermPrompter<io::StdinLock<'static>, io::Stdout> {
    pub fn stdio() -> Self {
        let stdin = io::stdin();
        let hide_input = stdin.is_terminal();

        Self {
            input: stdin.lock(),
            output: io::stdout(),
            hide_input,
        }
    }
}

impl<R: BufRead, W: Write> TermPrompter<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self {
            input,
            output,
            hide_input: false,
        }
    }

    fn read_answer(&mut self) -> anyhow::Result<String> {
        let mut line = String::new();

        let n = self.input.read_line(&mut line).context("failed to read answer")?;

        if n == 0 {
            anyhow::bail!("unexpected end of input");
        }

        let trimmed_len = line.trim_end_matches(['\r', '\n']).len();
        line.truncate(trimmed_len);

        Ok(line)
    }
}

impl<R: BufRead, W: Write> Prompter for TermPrompter<R, W> {
    fn select(&mut self, message: &str, choices: &[String], default: Option<usize>) -> anyhow::Result<usize> {
        anyhow::ensure!(!choices.is_empty(), "nothing to select for '{message}'");

        writeln!(self.output, "? {message}").context("write prompt")?;

        for (idx, choice) in choices.iter().enumerate() {
            let marker = if Some(idx) == default { '>' } else { ' ' };
            writeln!(self.output, "{marker} {}) {choice}", idx + 1).context("write prompt")?;
        }

        loop {
            match default {
                Some(default) => write!(self.output, "Choice [{}]: ", default + 1),
                None => write!(self.output, "Choice: "),
            }
            .context("write prompt")?;

            self.output.flush().context("flush prompt")?;

            let answer = self.read_answer()?;
            let answer = answer.trim();

            if answer.is_empty() {
                if let Some(default) = default {
                    return Ok(default);
                }
            } else if let Ok(number) = answer.parse::<usize>()
                && (1..=choices.len()).contains(&number)
            {
                return Ok(number - 1);
            }

            writeln!(self.output, "Please enter a number between 1 and {}", choices.len()).context("write prompt")?;
        }
    }

    fn password(&mut self, message: &str) -> anyhow::Result<SecretString> {
        write!(self.output, "? {message}").context("write prompt")?;
        self.output.flush().context("flush prompt")?;

        let answer = if self.hide_input {
            let guard = InputModeGuard::enable(InputMode::NoEcho).context("failed to disable input echo")?;
            let answer = self.read_answer();
            drop(guard);

            // The line feed typed by the user was not echoed.
            writeln!(self.output).context("write prompt")?;

            answer?
        } else {
            self.read_answer()?
        };

        Ok(SecretString::from(answer))
    }
}
