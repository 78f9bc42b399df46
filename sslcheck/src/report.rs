//! Console output: banner, status indicator and final result line.

use std::io::{self, IsTerminal as _, Write as _};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

const RULE: &str = "===============================";
const TITLE: &str = "==         SSL Checker       ==";
const PRESS_ANY_KEY: &str = "==== Press any key to exit ====";

const SPINNER_FRAMES: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
const SPINNER_INTERVAL: Duration = Duration::from_millis(80);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorMode {
    Always,
    Never,
    /// Colors when stdout is a terminal.
    Auto,
}

impl FromStr for ColorMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "always" => Ok(ColorMode::Always),
            "never" => Ok(ColorMode::Never),
            "auto" => Ok(ColorMode::Auto),
            _ => anyhow::bail!("unknown color mode '{s}' (expected always, never or auto)"),
        }
    }
}

/// Decides whether the console output is colored.
///
/// An explicit `mode` wins over the environment. Without one, `NO_COLOR` disables colors,
/// `FORCE_COLOR` forces them unless set to `0`, and `TERM=dumb` disables them.
/// Otherwise colors are used when `is_terminal` is set.
pub fn color_choice(mode: Option<ColorMode>, env: impl Fn(&str) -> Option<String>, is_terminal: bool) -> ColorChoice {
    let enabled = match mode {
        Some(ColorMode::Always) => true,
        Some(ColorMode::Never) => false,
        Some(ColorMode::Auto) => is_terminal,
        None => {
            if env("NO_COLOR").is_some() {
                false
            } else if let Some(force) = env("FORCE_COLOR") {
                force != "0"
            } else if env("TERM").as_deref() == Some("dumb") {
                false
            } else {
                is_terminal
            }
        }
    };

    if enabled { ColorChoice::Always } else { ColorChoice::Never }
}

type SharedWriter = Arc<Mutex<Box<dyn WriteColor + Send>>>;

fn write_colored<W>(out: &mut W, color: Option<Color>, text: &str) -> io::Result<()>
where
    W: WriteColor + ?Sized,
{
    match color {
        Some(color) => {
            out.set_color(ColorSpec::new().set_fg(Some(color)))?;
            write!(out, "{text}")?;
            out.reset()
        }
        None => write!(out, "{text}"),
    }
}

/// Where the user facing lines go.
#[derive(Clone)]
pub struct Console {
    out: SharedWriter,
    animate: bool,
}

impl Console {
    pub fn new(out: impl WriteColor + Send + 'static, animate: bool) -> Self {
        Self {
            out: Arc::new(Mutex::new(Box::new(out))),
            animate,
        }
    }

    pub fn stdout(color: Option<ColorMode>) -> Self {
        let is_terminal = io::stdout().is_terminal();
        let choice = color_choice(color, |key| std::env::var(key).ok(), is_terminal);
        Self::new(StandardStream::stdout(choice), is_terminal)
    }

    fn write_line(&self, color: Option<Color>, line: &str) {
        let mut out = self.out.lock().expect("poisoned");

        let result = write_colored(&mut **out, color, line)
            .and_then(|()| writeln!(out))
            .and_then(|()| out.flush());

        if let Err(error) = result {
            warn!(%error, "Failed to write to console");
        }
    }

    fn write_lines(&self, lines: &[&str]) {
        for line in lines {
            self.write_line(None, line);
        }
    }

    pub fn banner(&self) {
        self.write_lines(&[RULE, TITLE, RULE, ""]);
    }

    /// Printed once all the answers are collected.
    pub fn separator(&self) {
        self.write_lines(&[RULE, ""]);
    }

    /// Failure reported before the status indicator was started.
    pub fn plain_error(&self, message: &str) {
        self.write_line(Some(Color::Red), &format!(" {message}"));
    }

    pub fn help(&self, help: &str) {
        self.write_lines(&["", help]);
    }

    pub fn press_any_key(&self) {
        self.write_lines(&["", PRESS_ANY_KEY]);
    }

    /// Starts the status indicator with `text`.
    pub fn start(&self, text: &str) -> StatusIndicator {
        StatusIndicator::start(self.clone(), text)
    }
}

struct Ticker {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
    /// Columns covered by a frame and its text.
    width: usize,
}

/// Pending status line, finished with a success or failure mark.
pub struct StatusIndicator {
    console: Console,
    ticker: Option<Ticker>,
}

impl StatusIndicator {
    fn start(console: Console, text: &str) -> Self {
        let ticker = if console.animate {
            spawn_ticker(console.clone(), text.to_owned())
        } else {
            None
        };

        Self { console, ticker }
    }

    pub fn succeed(mut self, text: &str) {
        self.finish(Color::Green, "✔", text);
    }

    pub fn fail(mut self, text: &str) {
        self.finish(Color::Red, "✖", text);
    }

    fn stop_ticker(&mut self) {
        let Some(ticker) = self.ticker.take() else {
            return;
        };

        {
            // Taking the lock guarantees no frame is being written when the flag flips.
            let _out = self.console.out.lock().expect("poisoned");
            ticker.stop.store(true, Ordering::SeqCst);
        }

        if ticker.thread.join().is_err() {
            warn!("Spinner thread panicked");
        }

        // Blank the spinner line without relying on terminal escape sequences.
        let mut out = self.console.out.lock().expect("poisoned");
        let _ = write!(out, "\r{:width$}\r", "", width = ticker.width);
    }

    fn finish(&mut self, color: Color, symbol: &str, text: &str) {
        self.stop_ticker();
        self.console.write_line(Some(color), &format!("{symbol} {text}"));
    }
}

impl Drop for StatusIndicator {
    fn drop(&mut self) {
        self.stop_ticker();
    }
}

fn spawn_ticker(console: Console, text: String) -> Option<Ticker> {
    let stop = Arc::new(AtomicBool::new(false));
    let width = text.chars().count() + 2;

    let thread = std::thread::Builder::new()
        .name("spinner".to_owned())
        .spawn({
            let stop = Arc::clone(&stop);

            move || {
                for frame in SPINNER_FRAMES.iter().cycle() {
                    {
                        let mut out = console.out.lock().expect("poisoned");

                        if stop.load(Ordering::SeqCst) {
                            break;
                        }

                        let _ = write!(out, "\r")
                            .and_then(|()| write_colored(&mut **out, Some(Color::Yellow), &format!("{frame} {text}")))
                            .and_then(|()| out.flush());
                    }

                    std::thread::sleep(SPINNER_INTERVAL);

                    if stop.load(Ordering::SeqCst) {
                        break;
                    }
                }
            }
        });

    match thread {
        Ok(thread) => Some(Ticker { stop, thread, width }),
        Err(error) => {
            warn!(%error, "Failed to start spinner thread");
            None
        }
    }
}
