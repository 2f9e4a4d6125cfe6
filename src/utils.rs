use simplelog::{ColorChoice, ConfigBuilder, LevelFilter, TermLogger, TerminalMode};
use std::io::{self, IsTerminal};
use std::process;

pub fn print_usage() -> ! {
    println!("Usage: sush [-hvp]");
    println!("   -h   Print this help message");
    println!("   -v   Enable verbose mode");
    println!("   -p   Do not print a command prompt");
    process::exit(1);
}

/// Sends log records to stderr. Verbose mode lowers the threshold to debug.
pub fn init_logging(verbose: bool) {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };
    let config = ConfigBuilder::new()
        .set_time_level(LevelFilter::Off)
        .set_target_level(LevelFilter::Off)
        .build();
    let color = color_choice(io::stderr().is_terminal());
    if TermLogger::init(level, config, TerminalMode::Stderr, color).is_err() {
        eprintln!("sush: logger already initialised");
    }
}

/// Colours only when a person is reading stderr.
fn color_choice(stderr_is_terminal: bool) -> ColorChoice {
    if stderr_is_terminal {
        ColorChoice::Auto
    } else {
        ColorChoice::Never
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_colour_off_a_terminal() {
        assert!(matches!(color_choice(false), ColorChoice::Never));
        assert!(matches!(color_choice(true), ColorChoice::Auto));
    }
}
