use crate::builtins::Builtin;
use crate::environ::Environ;
use crate::error::{Result, ShellError};
use crate::parser::{Command, OutputRedirect};
use nix::fcntl::{fcntl, open, FcntlArg, OFlag};
use nix::sys::signal::{signal, SigHandler, Signal};
use nix::sys::stat::Mode;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{self, close, dup2, execvpe, fork, pipe2, ForkResult, Pid};
use std::ffi::CString;
use std::fs::File;
use std::io::{self, Write};
use std::mem::ManuallyDrop;
use std::os::unix::io::{FromRawFd, RawFd};
use std::thread;

/// Exit status reported for a program that could not be exec'd.
pub const EXEC_FAILED: i32 = 127;

/// Dups the shell's stdin/stdout on creation and puts them back on drop.
struct SavedStdio {
    stdin: RawFd,
    stdout: RawFd,
}

impl SavedStdio {
    fn save() -> Result<Self> {
        let stdin = dup_cloexec(libc_fd::STDIN)?;
        let stdout = match dup_cloexec(libc_fd::STDOUT) {
            Ok(fd) => fd,
            Err(e) => {
                let _ = close(stdin);
                return Err(e.into());
            }
        };
        Ok(SavedStdio { stdin, stdout })
    }
}

impl Drop for SavedStdio {
    fn drop(&mut self) {
        let restored = dup2(self.stdin, libc_fd::STDIN).and(dup2(self.stdout, libc_fd::STDOUT));
        if restored.is_err() {
            log::warn!("could not restore the shell's stdin/stdout");
        }
        let _ = close(self.stdin);
        let _ = close(self.stdout);
    }
}

fn dup_cloexec(fd: RawFd) -> nix::Result<RawFd> {
    fcntl(fd, FcntlArg::F_DUPFD_CLOEXEC(libc_fd::STDERR + 1))
}

mod libc_fd {
    use std::os::unix::io::RawFd;
    pub const STDIN: RawFd = 0;
    pub const STDOUT: RawFd = 1;
    pub const STDERR: RawFd = 2;
}

/// Opens the stage's input redirection read-only.
pub fn open_infile(path: &str) -> Result<RawFd> {
    open(path, OFlag::O_RDONLY | OFlag::O_CLOEXEC, Mode::empty())
        .map_err(|e| ShellError::OpenInput(e.into()))
}

/// Opens the stage's output redirection, truncating or appending.
pub fn open_outfile(target: &OutputRedirect) -> Result<RawFd> {
    let flags = match target {
        OutputRedirect::Overwrite(_) => OFlag::O_WRONLY | OFlag::O_CREAT | OFlag::O_TRUNC,
        OutputRedirect::Append(_) => OFlag::O_WRONLY | OFlag::O_CREAT | OFlag::O_APPEND,
    };
    open(target.path(), flags | OFlag::O_CLOEXEC, Mode::from_bits_truncate(0o777))
        .map_err(|e| ShellError::OpenOutput(e.into()))
}

/// File descriptors a stage child should install as its stdin and stdout.
/// `None` leaves the inherited descriptor in place.
#[derive(Debug, Clone, Copy, Default)]
pub struct StageIo {
    pub stdin: Option<RawFd>,
    pub stdout: Option<RawFd>,
}

impl StageIo {
    fn close_all(&self) {
        for fd in [self.stdin, self.stdout].into_iter().flatten() {
            let _ = close(fd);
        }
    }
}

/// Everything a child needs to exec, prepared before forking.
pub struct ExecImage {
    program: CString,
    argv: Vec<CString>,
    envp: Vec<CString>,
    builtin: Option<Builtin>,
}

impl ExecImage {
    pub fn new(command: &Command, env: &Environ) -> Result<Self> {
        Ok(ExecImage {
            program: CString::new(command.program_name.as_bytes())?,
            argv: command.c_argv()?,
            envp: env.envp(),
            builtin: Builtin::from_name(&command.program_name),
        })
    }
}

/// Body of a forked stage. Installs the stage's descriptors, then runs the
/// builtin in place or replaces the process with the program. Never returns.
pub fn exec_child(
    command: &Command,
    image: &ExecImage,
    io: StageIo,
    close_in_child: &[RawFd],
    env: &Environ,
) -> ! {
    if let Err(e) = install_stdio(io, close_in_child) {
        child_error(&format!("Error - could not set up stage : {}\n", e));
        child_exit(1);
    }

    // The Rust runtime ignores SIGPIPE and exec keeps ignored dispositions.
    // Writers into a closed pipe must die quietly instead.
    if unsafe { signal(Signal::SIGPIPE, SigHandler::SigDfl) }.is_err() {
        child_error("Error - could not reset SIGPIPE\n");
    }

    if let Some(builtin) = image.builtin {
        // Write through fd 1 directly; the std handle's lock may be held by
        // another thread of the parent at the moment of the fork.
        let mut out = ManuallyDrop::new(unsafe { File::from_raw_fd(libc_fd::STDOUT) });
        let mut env = env.clone();
        let code = match builtin.run(&command.argv, &mut env, &mut *out) {
            Ok(_) => 0,
            Err(e) => {
                child_error(&format!("{}\n", e));
                1
            }
        };
        child_exit(code);
    }

    let err = match execvpe(&image.program, &image.argv, &image.envp) {
        Ok(never) => match never {},
        Err(e) => e,
    };
    child_error(&format!("Error - could not execute : {}\n", err));
    child_exit(EXEC_FAILED)
}

/// Leaves a forked child without running destructors or flushing buffers
/// inherited from the parent.
fn child_exit(code: i32) -> ! {
    unsafe { libc::_exit(code as libc::c_int) }
}

fn install_stdio(io: StageIo, close_in_child: &[RawFd]) -> nix::Result<()> {
    if let Some(fd) = io.stdin {
        dup2(fd, libc_fd::STDIN)?;
    }
    if let Some(fd) = io.stdout {
        dup2(fd, libc_fd::STDOUT)?;
    }
    for fd in [io.stdin, io.stdout].into_iter().flatten() {
        if fd > libc_fd::STDERR {
            let _ = close(fd);
        }
    }
    for &fd in close_in_child {
        let _ = close(fd);
    }
    Ok(())
}

fn child_error(msg: &str) {
    let _ = unistd::write(libc_fd::STDERR, msg.as_bytes());
}

/// Converts a reaped status into a shell exit code.
pub fn exit_code(status: WaitStatus) -> i32 {
    match status {
        WaitStatus::Exited(_, code) => code,
        WaitStatus::Signaled(_, signal, _) => 128 + signal as i32,
        _ => 0,
    }
}

/// Runs a pipeline in the foreground and returns the last stage's exit code.
///
/// Stages are forked left to right. Each one gets its file redirections or
/// the pipe ends of its neighbours; the parent drops its copy of every pipe
/// end as soon as the stage using it has been forked so EOF reaches the
/// readers. Blocks until every forked stage has terminated. If a stage
/// cannot be set up, the ones already forked keep running and are reaped
/// off the read loop.
pub fn run_pipeline(commands: &[Command], env: &Environ) -> Result<i32> {
    // Buffered prompt text must not be duplicated into the children.
    io::stdout().flush()?;
    let _saved = SavedStdio::save()?;

    let (pids, spawned) = spawn_stages(commands, env);
    if let Err(e) = spawned {
        if !pids.is_empty() {
            log::warn!("pipeline setup failed; started stages {:?} are reaped in the background", pids);
            reap_in_background(pids);
        }
        return Err(e);
    }

    let mut code = 0;
    for pid in pids {
        let status = wait_for(pid)?;
        log::debug!("pid {} finished: {:?}", pid, status);
        code = exit_code(status);
    }
    Ok(code)
}

/// Forks every stage left to right and stops at the first setup failure.
/// Returns the pids forked so far together with the outcome.
fn spawn_stages(commands: &[Command], env: &Environ) -> (Vec<Pid>, Result<()>) {
    let mut pids: Vec<Pid> = Vec::with_capacity(commands.len());
    let mut prev_read: Option<RawFd> = None;
    let last = commands.len().saturating_sub(1);

    for (i, command) in commands.iter().enumerate() {
        match spawn_stage(command, i == last, prev_read.take(), env) {
            Ok((pid, next_read)) => {
                log::debug!("forked stage {} ({}) as pid {}", i, command.program_name, pid);
                pids.push(pid);
                prev_read = next_read;
            }
            Err(e) => return (pids, Err(e)),
        }
    }
    (pids, Ok(()))
}

/// Waits for stages abandoned by a failed pipeline on a detached thread, so
/// they may keep running without blocking the read loop or lingering as zombies.
fn reap_in_background(pids: Vec<Pid>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        for pid in pids {
            match wait_for(pid) {
                Ok(status) => log::debug!("abandoned stage {} finished: {:?}", pid, status),
                Err(e) => log::warn!("could not reap abandoned stage {}: {}", pid, e),
            }
        }
    })
}

/// Opens one stage's files, creates its outgoing pipe and forks it.
/// Consumes `prev_read`; returns the child's pid and the read end for the next stage.
fn spawn_stage(
    command: &Command,
    is_last: bool,
    prev_read: Option<RawFd>,
    env: &Environ,
) -> Result<(Pid, Option<RawFd>)> {
    let mut io = StageIo {
        stdin: prev_read,
        stdout: None,
    };
    let opened = command
        .check_channels()
        .and_then(|_| open_redirections(command))
        .and_then(|(infile, outfile)| {
            if infile.is_some() {
                io.stdin = infile;
            }
            io.stdout = outfile;
            let pipe_fds = if is_last {
                None
            } else {
                Some(pipe2(OFlag::O_CLOEXEC)?)
            };
            Ok(pipe_fds)
        });
    let pipe_fds = match opened {
        Ok(fds) => fds,
        Err(e) => {
            io.close_all();
            return Err(e);
        }
    };

    let mut close_in_child = Vec::new();
    if let Some((read_end, write_end)) = pipe_fds {
        io.stdout = Some(write_end);
        close_in_child.push(read_end);
    }

    let image = match ExecImage::new(command, env) {
        Ok(image) => image,
        Err(e) => {
            io.close_all();
            for &fd in &close_in_child {
                let _ = close(fd);
            }
            return Err(e);
        }
    };

    match unsafe { fork() } {
        Ok(ForkResult::Child) => exec_child(command, &image, io, &close_in_child, env),
        Ok(ForkResult::Parent { child }) => {
            io.close_all();
            Ok((child, pipe_fds.map(|(read_end, _)| read_end)))
        }
        Err(e) => {
            io.close_all();
            for &fd in &close_in_child {
                let _ = close(fd);
            }
            Err(e.into())
        }
    }
}

fn open_redirections(command: &Command) -> Result<(Option<RawFd>, Option<RawFd>)> {
    let outfile = match &command.outfile {
        Some(target) => Some(open_outfile(target)?),
        None => None,
    };
    let infile = match &command.infile {
        Some(path) => match open_infile(path) {
            Ok(fd) => Some(fd),
            Err(e) => {
                if let Some(fd) = outfile {
                    let _ = close(fd);
                }
                return Err(e);
            }
        },
        None => None,
    };
    Ok((infile, outfile))
}

/// Blocks until `pid` terminates, retrying on EINTR.
fn wait_for(pid: Pid) -> Result<WaitStatus> {
    loop {
        match waitpid(pid, None) {
            Ok(status @ (WaitStatus::Exited(..) | WaitStatus::Signaled(..))) => return Ok(status),
            Ok(_) => continue,
            Err(nix::errno::Errno::EINTR) => continue,
            Err(e) => return Err(e.into()),
        }
    }
}
