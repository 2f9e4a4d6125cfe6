use std::io;
use thiserror::Error;

/// Every failure the shell can report back to the read loop.
#[derive(Debug, Error)]
pub enum ShellError {
    #[error("Error - malformed command line.")]
    MalformedCommandLine,
    #[error("Error - background commands cannot use pipes or redirection.")]
    InvalidBackground,
    #[error("Error - could not open input file : {0}")]
    OpenInput(#[source] io::Error),
    #[error("Error - could not open output file : {0}")]
    OpenOutput(#[source] io::Error),
    #[error("Error - {0}")]
    Sys(#[from] nix::Error),
    #[error("Error - {0}")]
    Io(#[from] io::Error),
    #[error("Error - argument contains a NUL byte")]
    Nul(#[from] std::ffi::NulError),
    #[error("Error - task {0} is still queued.")]
    JobQueued(u32),
    #[error("Error - task {0} is still running")]
    JobRunning(u32),
    #[error("{0} is already finished, use output {0} to show results")]
    JobFinished(u32),
    #[error("Error - no task {0}")]
    NoSuchJob(u32),
    #[error("{0}")]
    Usage(&'static str),
    #[error("Error - getenv unknown variable {0}")]
    UnknownVariable(String),
}

pub type Result<T> = std::result::Result<T, ShellError>;

pub const ERROR_SETENV_ARG: &str = "Error - setenv takes two arguments";
pub const ERROR_UNSETENV_ARG: &str = "Error - unsetenv takes one argument";
pub const ERROR_GETENV_ARG: &str = "Error - getenv takes 0 or 1 arguments";
pub const ERROR_CD_ARG: &str = "Error - cd takes one argument";
pub const ERROR_CD_NOHOME: &str = "Error - cd no home directory";
pub const ERROR_PWD_ARG: &str = "Error - pwd takes no arguments";
pub const ERROR_EXIT_ARG: &str = "Error - exit takes no arguments";
pub const ERROR_QUEUE_ARG: &str = "Error - queue requires at least two arguments";
pub const ERROR_OUTPUT_ARG: &str = "Error - output takes one argument";
pub const ERROR_STATUS_ARG: &str = "Error - status takes 0 arguments";
pub const ERROR_CANCEL_ARG: &str = "Error - cancel takes one argument";
