use crate::environ::Environ;
use crate::error::{Result, ShellError};
use crate::exec::{self, ExecImage, StageIo};
use crate::parser::{Command, OutputRedirect};
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{close, fork, mkstemp, ForkResult, Pid};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Stdin of every background job.
const NULL_DEVICE: &str = "/dev/null";

/// Name pattern for the files capturing background output.
const OUTPUT_TEMPLATE: &str = "background_cmd_XXXXXX";

/// Represents the state of a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Queued,
    Running,
    Complete,
}

/// A background job and the file holding its output.
#[derive(Debug)]
pub struct QueueItem {
    pub job_id: u32,
    pub command: Command,
    pub pid: Option<Pid>,
    pub output_path: PathBuf,
    pub state: JobState,
    /// A kill signal was sent; the notifier removes the job when it dies.
    pub cancel_requested: bool,
    env: Environ,
}

/// What the completion notifier did with a reaped child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reaped {
    Completed(u32),
    Canceled(u32),
}

/// Result of a successful `cancel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Canceled {
    /// The job had not started and is gone.
    Removed,
    /// The job's process was signalled; removal happens once it is reaped.
    Signaled(Pid),
}

/// FIFO of background jobs, running at most one of them at a time.
///
/// Jobs are keyed by their id, which only ever grows, so key order is
/// submission order. The queue is shared between the read loop and the
/// completion notifier behind one mutex; every operation below assumes the
/// caller holds it.
#[derive(Debug)]
pub struct JobQueue {
    items: BTreeMap<u32, QueueItem>,
    next_job_id: u32,
    job_running: bool,
    spool_dir: PathBuf,
}

impl Default for JobQueue {
    fn default() -> Self {
        JobQueue::new(std::env::temp_dir())
    }
}

/// Checks that a command leaves both of its channels to the queue.
pub fn is_valid_background(command: &Command) -> bool {
    command.has_default_channels()
}

impl JobQueue {
    /// Creates an empty queue whose output files live in `spool_dir`.
    pub fn new(spool_dir: impl Into<PathBuf>) -> Self {
        JobQueue {
            items: BTreeMap::new(),
            next_job_id: 1,
            job_running: false,
            spool_dir: spool_dir.into(),
        }
    }

    pub fn get(&self, job_id: u32) -> Option<&QueueItem> {
        self.items.get(&job_id)
    }

    pub fn is_job_running(&self) -> bool {
        self.job_running
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Adds a command to the back of the queue and returns its job id.
    ///
    /// Rejects commands that use a pipe or a redirection. Stdin is forced to
    /// the null device and stdout to a fresh temporary file. Starts the job
    /// right away when nothing else is running.
    pub fn enqueue(&mut self, mut command: Command, env: &Environ) -> Result<u32> {
        if !is_valid_background(&command) {
            return Err(ShellError::InvalidBackground);
        }

        let template = self.spool_dir.join(OUTPUT_TEMPLATE);
        let (fd, output_path) = mkstemp(&template)?;
        let _ = close(fd);

        command.infile = Some(NULL_DEVICE.to_string());
        command.outfile = Some(OutputRedirect::Overwrite(
            output_path.to_string_lossy().into_owned(),
        ));

        let job_id = self.next_job_id;
        self.next_job_id += 1;
        log::debug!("queued job {} ({}) -> {}", job_id, command.program_name, output_path.display());
        self.items.insert(
            job_id,
            QueueItem {
                job_id,
                command,
                pid: None,
                output_path,
                state: JobState::Queued,
                cancel_requested: false,
                env: env.clone(),
            },
        );

        if !self.job_running {
            self.schedule_next();
        }
        Ok(job_id)
    }

    /// Starts the oldest queued job if no job is running.
    ///
    /// A job whose process cannot be set up is marked complete with whatever
    /// its output file holds, and the next one is tried.
    pub fn schedule_next(&mut self) {
        while !self.job_running {
            let next = self
                .items
                .values()
                .find(|item| item.state == JobState::Queued)
                .map(|item| item.job_id);
            let Some(job_id) = next else {
                return;
            };
            if let Err(e) = self.start(job_id) {
                log::error!("could not start job {}: {}", job_id, e);
                if let Some(item) = self.items.get_mut(&job_id) {
                    item.state = JobState::Complete;
                }
            }
        }
    }

    fn start(&mut self, job_id: u32) -> Result<()> {
        let item = match self.items.get_mut(&job_id) {
            Some(item) => item,
            None => return Err(ShellError::NoSuchJob(job_id)),
        };

        let stdin = exec::open_infile(NULL_DEVICE)?;
        let stdout = match item.command.outfile.as_ref().map(exec::open_outfile) {
            Some(Ok(fd)) => fd,
            Some(Err(e)) => {
                let _ = close(stdin);
                return Err(e);
            }
            None => {
                let _ = close(stdin);
                return Err(ShellError::InvalidBackground);
            }
        };
        let io = StageIo {
            stdin: Some(stdin),
            stdout: Some(stdout),
        };
        let image = ExecImage::new(&item.command, &item.env);

        let forked = image.and_then(|image| match unsafe { fork() } {
            Ok(ForkResult::Child) => exec::exec_child(&item.command, &image, io, &[], &item.env),
            Ok(ForkResult::Parent { child }) => Ok(child),
            Err(e) => Err(e.into()),
        });
        let _ = close(stdin);
        let _ = close(stdout);
        let pid = forked?;

        log::debug!("job {} started as pid {}", job_id, pid);
        item.pid = Some(pid);
        item.state = JobState::Running;
        self.job_running = true;
        Ok(())
    }

    /// Records the termination of `pid`.
    ///
    /// Clears the gate, then either marks the job complete or, when a cancel
    /// was requested, deletes it with its output. Schedules the next job in
    /// both cases. Returns `None` if `pid` belongs to no job.
    pub fn on_child_terminated(&mut self, pid: Pid, status: WaitStatus) -> Option<Reaped> {
        let job_id = self
            .items
            .values()
            .find(|item| item.pid == Some(pid) && item.state == JobState::Running)
            .map(|item| item.job_id)?;
        log::debug!("job {} (pid {}) terminated: {:?}", job_id, pid, status);

        self.job_running = false;
        let cancel_requested = self.items.get(&job_id).map_or(false, |i| i.cancel_requested);
        let reaped = if cancel_requested {
            if let Some(item) = self.items.remove(&job_id) {
                remove_output(&item.output_path);
            }
            Reaped::Canceled(job_id)
        } else {
            if let Some(item) = self.items.get_mut(&job_id) {
                item.state = JobState::Complete;
            }
            Reaped::Completed(job_id)
        };

        self.schedule_next();
        Some(reaped)
    }

    /// Polls every running job's pid without blocking and feeds terminations
    /// to `on_child_terminated`.
    ///
    /// Only pids owned by the queue are waited on, so foreground children
    /// are never reaped here.
    pub fn reap(&mut self) -> Vec<Reaped> {
        let mut reaped = Vec::new();
        loop {
            let running: Vec<Pid> = self
                .items
                .values()
                .filter(|item| item.state == JobState::Running)
                .filter_map(|item| item.pid)
                .collect();

            let mut progressed = false;
            for pid in running {
                let status = match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
                    Ok(WaitStatus::StillAlive) => continue,
                    Ok(status @ (WaitStatus::Exited(..) | WaitStatus::Signaled(..))) => status,
                    Ok(_) => continue,
                    Err(Errno::EINTR) => continue,
                    Err(Errno::ECHILD) => {
                        log::warn!("pid {} was reaped elsewhere", pid);
                        WaitStatus::Exited(pid, 0)
                    }
                    Err(e) => {
                        log::warn!("waitpid({}) failed: {}", pid, e);
                        continue;
                    }
                };
                if let Some(event) = self.on_child_terminated(pid, status) {
                    reaped.push(event);
                    progressed = true;
                }
            }
            if !progressed {
                return reaped;
            }
        }
    }

    /// Streams a completed job's output into `out`, then deletes the job.
    /// Output can be viewed only once.
    pub fn output(&mut self, job_id: u32, out: &mut dyn Write) -> Result<()> {
        let item = self.items.get(&job_id).ok_or(ShellError::NoSuchJob(job_id))?;
        match item.state {
            JobState::Queued => return Err(ShellError::JobQueued(job_id)),
            JobState::Running => return Err(ShellError::JobRunning(job_id)),
            JobState::Complete => {}
        }

        let mut file = File::open(&item.output_path)?;
        io::copy(&mut file, out)?;
        out.flush()?;

        if let Some(item) = self.items.remove(&job_id) {
            remove_output(&item.output_path);
        }
        Ok(())
    }

    /// Cancels a job that has not completed yet.
    pub fn cancel(&mut self, job_id: u32) -> Result<Canceled> {
        let item = self
            .items
            .get_mut(&job_id)
            .ok_or(ShellError::NoSuchJob(job_id))?;
        match (item.state, item.pid) {
            (JobState::Complete, _) => Err(ShellError::JobFinished(job_id)),
            (JobState::Running, Some(pid)) => {
                kill(pid, Signal::SIGKILL)?;
                item.cancel_requested = true;
                log::debug!("job {}: kill sent to pid {}", job_id, pid);
                Ok(Canceled::Signaled(pid))
            }
            _ => {
                if let Some(item) = self.items.remove(&job_id) {
                    remove_output(&item.output_path);
                }
                log::debug!("job {} removed before it started", job_id);
                Ok(Canceled::Removed)
            }
        }
    }

    /// One line per job, in submission order.
    pub fn status_report(&self) -> String {
        let mut report = String::new();
        for item in self.items.values() {
            let _ = match (item.state, item.pid) {
                (JobState::Running, Some(pid)) => {
                    writeln!(report, "{} is running as pid {}", item.job_id, pid)
                }
                (JobState::Complete, _) => writeln!(report, "{} is complete", item.job_id),
                _ => writeln!(report, "{} - is queued", item.job_id),
            };
        }
        report
    }

    /// Drops every job and its output file. A running job is killed first.
    pub fn shutdown(&mut self) {
        for (job_id, item) in std::mem::take(&mut self.items) {
            if let (JobState::Running, Some(pid)) = (item.state, item.pid) {
                if let Err(e) = kill(pid, Signal::SIGKILL) {
                    log::warn!("could not kill job {} (pid {}): {}", job_id, pid, e);
                }
            }
            remove_output(&item.output_path);
        }
        self.job_running = false;
    }
}

fn remove_output(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        log::warn!("could not remove {}: {}", path.display(), e);
    }
}
