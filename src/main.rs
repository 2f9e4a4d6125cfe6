mod builtins;
mod environ;
mod error;
mod exec;
mod jobs;
mod parser;
mod shell;
mod signals;
mod utils;

use std::env;
use std::sync::{Arc, Mutex};

fn main() {
    // Parse command-line arguments.
    let mut emit_prompt = true;
    let mut verbose = false;
    for arg in env::args().skip(1) {
        match arg.as_str() {
            "-h" => utils::print_usage(),
            "-v" => verbose = true,
            "-p" => emit_prompt = false,
            _ => {}
        }
    }

    utils::init_logging(verbose);

    let queue = Arc::new(Mutex::new(jobs::JobQueue::default()));

    // Install the completion notifier before any job can be forked.
    if let Err(e) = signals::install_signal_handlers(Arc::clone(&queue)) {
        eprintln!("{}", e);
        std::process::exit(1);
    }

    let mut shell = shell::Shell::new(environ::Environ::from_process(), queue);
    let status = shell::run_shell(&mut shell, emit_prompt);
    std::process::exit(status);
}
