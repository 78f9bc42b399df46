//! Terminal input modes for hidden passphrase entry and single keypress reads.
//!
//! The previous mode is restored when the guard is dropped, or by the Ctrl-C handler when the
//! process is interrupted while a guard is active.

use std::io::{self, IsTerminal as _, Read as _};

use anyhow::Context as _;

/// Conventional exit status for a process ended by SIGINT.
const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Restores the saved terminal mode, then exits, when Ctrl-C is pressed.
pub fn install_interrupt_handler() -> anyhow::Result<()> {
    ctrlc::set_handler(|| {
        restore_saved_mode();
        std::process::exit(INTERRUPTED_EXIT_CODE);
    })
    .context("failed to set Ctrl-C handler")
}

/// Puts back the mode saved by the active guard, if any.
///
/// Returns whether a mode was restored.
pub(crate) fn restore_saved_mode() -> bool {
    imp::restore_saved_mode()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InputMode {
    /// Line editing kept, typed characters not echoed.
    NoEcho,
    /// No echo, no line buffering: each key is delivered immediately.
    Raw,
}

/// Reads a single key from stdin.
///
/// Returns immediately on end of input.
pub fn wait_for_keypress() -> io::Result<()> {
    let _guard = if io::stdin().is_terminal() {
        Some(InputModeGuard::enable(InputMode::Raw)?)
    } else {
        None
    };

    let mut buf = [0u8; 1];
    match io::stdin().lock().read(&mut buf) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(unix)]
use unix as imp;

#[cfg(windows)]
use windows as imp;

pub(crate) use imp::InputModeGuard;

#[cfg(unix)]
mod unix {
    use std::io;
    use std::mem::MaybeUninit;
    use std::sync::Mutex;

    use super::InputMode;

    static SAVED: Mutex<Option<libc::termios>> = Mutex::new(None);

    pub(crate) struct InputModeGuard {
        original: libc::termios,
    }

    pub(super) fn restore_saved_mode() -> bool {
        let Ok(mut saved) = SAVED.lock() else {
            return false;
        };

        match saved.take() {
            Some(original) => set_attributes(&original).is_ok(),
            None => false,
        }
    }

    impl InputModeGuard {
        pub(crate) fn enable(mode: InputMode) -> io::Result<Self> {
            let mut termios = MaybeUninit::<libc::termios>::uninit();

            // SAFETY: STDIN_FILENO is open for the whole process lifetime and `termios` points to
            // memory large enough for a `termios` structure.
            let ret = unsafe { libc::tcgetattr(libc::STDIN_FILENO, termios.as_mut_ptr()) };

            if ret != 0 {
                return Err(io::Error::last_os_error());
            }

            // SAFETY: tcgetattr returned 0, so the structure is fully initialized.
            let original = unsafe { termios.assume_init() };

            let mut updated = original;

            match mode {
                InputMode::NoEcho => {
                    updated.c_lflag &= !libc::ECHO;
                }
                InputMode::Raw => {
                    updated.c_lflag &= !(libc::ECHO | libc::ICANON);
                    updated.c_cc[libc::VMIN] = 1;
                    updated.c_cc[libc::VTIME] = 0;
                }
            }

            *SAVED.lock().expect("poisoned") = Some(original);

            if let Err(e) = set_attributes(&updated) {
                SAVED.lock().expect("poisoned").take();
                return Err(e);
            }

            Ok(Self { original })
        }
    }

    impl Drop for InputModeGuard {
        fn drop(&mut self) {
            if let Ok(mut saved) = SAVED.lock() {
                saved.take();
            }

            if let Err(error) = set_attributes(&self.original) {
                warn!(%error, "Failed to restore terminal mode");
            }
        }
    }

    fn set_attributes(termios: &libc::termios) -> io::Result<()> {
        // SAFETY: STDIN_FILENO is open for the whole process lifetime and `termios` is a valid
        // reference to an initialized structure.
        let ret = unsafe { libc::tcsetattr(libc::STDIN_FILENO, libc::TCSANOW, termios) };

        if ret != 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }
}

#[cfg(windows)]
mod windows {
    use std::io;
    use std::sync::Mutex;

    use windows_sys::Win32::Foundation::{HANDLE, INVALID_HANDLE_VALUE};
    use windows_sys::Win32::System::Console::{
        CONSOLE_MODE, ENABLE_ECHO_INPUT, ENABLE_LINE_INPUT, GetConsoleMode, GetStdHandle, STD_INPUT_HANDLE,
        SetConsoleMode,
    };

    use super::InputMode;

    static SAVED: Mutex<Option<CONSOLE_MODE>> = Mutex::new(None);

    pub(crate) struct InputModeGuard {
        handle: HANDLE,
        original: CONSOLE_MODE,
    }

    fn stdin_handle() -> io::Result<HANDLE> {
        // SAFETY: FFI call with no preconditions.
        let handle = unsafe { GetStdHandle(STD_INPUT_HANDLE) };

        if handle.is_null() || handle == INVALID_HANDLE_VALUE {
            Err(io::Error::last_os_error())
        } else {
            Ok(handle)
        }
    }

    fn set_mode(handle: HANDLE, mode: CONSOLE_MODE) -> io::Result<()> {
        // SAFETY: `handle` is the process standard input handle.
        let ret = unsafe { SetConsoleMode(handle, mode) };

        if ret == 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    pub(super) fn restore_saved_mode() -> bool {
        let Ok(mut saved) = SAVED.lock() else {
            return false;
        };

        match (saved.take(), stdin_handle()) {
            (Some(original), Ok(handle)) => set_mode(handle, original).is_ok(),
            _ => false,
        }
    }

    impl InputModeGuard {
        pub(crate) fn enable(mode: InputMode) -> io::Result<Self> {
            let handle = stdin_handle()?;

            let mut original: CONSOLE_MODE = 0;

            // SAFETY: `handle` is the process standard input handle and `original` is a valid
            // location for the mode to be written to.
            let ret = unsafe { GetConsoleMode(handle, &mut original) };

            if ret == 0 {
                return Err(io::Error::last_os_error());
            }

            let updated = match mode {
                InputMode::NoEcho => original & !ENABLE_ECHO_INPUT,
                InputMode::Raw => original & !(ENABLE_ECHO_INPUT | ENABLE_LINE_INPUT),
            };

            *SAVED.lock().expect("poisoned") = Some(original);

            if let Err(e) = set_mode(handle, updated) {
                SAVED.lock().expect("poisoned").take();
                return Err(e);
            }

            Ok(Self { handle, original })
        }
    }

    impl Drop for InputModeGuard {
        fn drop(&mut self) {
            if let Ok(mut saved) = SAVED.lock() {
                saved.take();
            }

            if let Err(error) = set_mode(self.handle, self.original) {
                warn!(%error, "Failed to restore console mode");
            }
        }
    }
}
