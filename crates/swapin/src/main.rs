//! Swapin.
//!
//! A command line tool that reads objects out of on-disk cache directories through the swap-in
//! coordinator, the same way a cache reader brings a swapped-out entry back into memory.

#![warn(missing_debug_implementations, unused_crate_dependencies, clippy::all)]

mod cli;
mod logging;

fn main() {
    match cli::execute() {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            logging::ensure_log_error(&error);
            std::process::exit(1);
        }
    }
}
