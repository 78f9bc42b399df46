#![allow(clippy::unwrap_used, reason = "test code can panic on errors")]
#![allow(clippy::print_stderr, reason = "test code reports skipped cases")]

mod cli;
