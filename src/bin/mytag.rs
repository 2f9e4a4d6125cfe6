/*
 * mytag.rs - A pipeline stage for testing the shell's plumbing
 *
 * usage: mytag <marker>
 * Copies stdin to stdout, appending " <marker>" to every line,
 * then prints <marker> on a line of its own.
 */

use std::env;
use std::io::{self, BufRead, Write};
use std::process;

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() != 2 {
        eprintln!("Usage: {} <marker>", args[0]);
        process::exit(1);
    }
    let marker = &args[1];

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for line in stdin.lock().lines() {
        let line = line.unwrap_or_else(|err| {
            eprintln!("mytag: read error: {}", err);
            process::exit(1);
        });
        if writeln!(out, "{} {}", line, marker).is_err() {
            process::exit(1);
        }
    }
    if writeln!(out, "{}", marker).and_then(|_| out.flush()).is_err() {
        process::exit(1);
    }
}
