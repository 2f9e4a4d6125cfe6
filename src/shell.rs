use crate::builtins::{Builtin, BuiltinStatus};
use crate::environ::Environ;
use crate::error::{
    Result, ShellError, ERROR_CANCEL_ARG, ERROR_OUTPUT_ARG, ERROR_QUEUE_ARG, ERROR_STATUS_ARG,
};
use crate::exec::run_pipeline;
use crate::jobs::{Canceled, JobQueue};
use crate::parser::parse_pipeline;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::fs;
use std::io::{self, BufRead, IsTerminal, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Prompt used when `PS1` is not set.
pub static DEFAULT_PROMPT: &str = "> ";

/// Name of the startup script looked up in `$SUSHHOME`.
const STARTUP_FILE: &str = ".sushrc";

/// What the read loop does after a line has been handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineStatus {
    Continue(i32),
    Exit,
}

/// Shell state: the variable store and the background job queue.
pub struct Shell {
    pub env: Environ,
    queue: Arc<Mutex<JobQueue>>,
    last_status: i32,
}

impl Shell {
    pub fn new(env: Environ, queue: Arc<Mutex<JobQueue>>) -> Self {
        Shell {
            env,
            queue,
            last_status: 0,
        }
    }

    pub fn last_status(&self) -> i32 {
        self.last_status
    }

    fn queue(&self) -> MutexGuard<'_, JobQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs one raw input line.
    ///
    /// Queue commands (`queue`, `status`, `output`, `cancel`) go to the job
    /// queue. A lone builtin without redirection runs in the shell itself;
    /// everything else becomes a foreground pipeline.
    pub fn run_line(&mut self, raw: &str) -> Result<LineStatus> {
        let line = raw.split('\n').next().unwrap_or("").trim();
        if line.is_empty() {
            return Ok(LineStatus::Continue(self.last_status));
        }

        let (word, rest) = match line.split_once(|c: char| c == ' ' || c == '\t') {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };
        match word {
            "queue" => return self.queue_command(rest).map(LineStatus::Continue),
            "status" => return self.status_command(rest).map(LineStatus::Continue),
            "output" => return self.output_command(rest).map(LineStatus::Continue),
            "cancel" => return self.cancel_command(rest).map(LineStatus::Continue),
            _ => {}
        }

        let commands = parse_pipeline(line)?;
        if let [command] = commands.as_slice() {
            if command.has_default_channels() {
                if let Some(builtin) = Builtin::from_name(&command.program_name) {
                    let mut stdout = io::stdout().lock();
                    let status = builtin.run(&command.argv, &mut self.env, &mut stdout)?;
                    self.last_status = 0;
                    return Ok(match status {
                        BuiltinStatus::Exit => LineStatus::Exit,
                        BuiltinStatus::Continue => LineStatus::Continue(0),
                    });
                }
            }
        }

        self.last_status = run_pipeline(&commands, &self.env)?;
        Ok(LineStatus::Continue(self.last_status))
    }

    fn queue_command(&mut self, rest: &str) -> Result<i32> {
        if rest.is_empty() {
            return Err(ShellError::Usage(ERROR_QUEUE_ARG));
        }
        let mut commands = parse_pipeline(rest)?;
        let command = commands.remove(0);
        let job_id = self.queue().enqueue(command, &self.env)?;
        log::info!("queued job {}", job_id);
        Ok(0)
    }

    fn status_command(&mut self, rest: &str) -> Result<i32> {
        if !rest.is_empty() {
            return Err(ShellError::Usage(ERROR_STATUS_ARG));
        }
        let report = self.queue().status_report();
        print!("{}", report);
        io::stdout().flush()?;
        Ok(0)
    }

    fn output_command(&mut self, rest: &str) -> Result<i32> {
        let job_id = single_job_id(rest, ERROR_OUTPUT_ARG)?;
        let mut stdout = io::stdout().lock();
        self.queue().output(job_id, &mut stdout)?;
        Ok(0)
    }

    fn cancel_command(&mut self, rest: &str) -> Result<i32> {
        let job_id = single_job_id(rest, ERROR_CANCEL_ARG)?;
        let canceled = self.queue().cancel(job_id)?;
        match canceled {
            Canceled::Removed => println!("{} is canceled", job_id),
            Canceled::Signaled(pid) => println!("{} sending kill signal to pid {}", job_id, pid),
        }
        Ok(0)
    }

    /// Runs `$SUSHHOME/.sushrc` line by line if the user may read and
    /// execute it. Stops early if a line asks the shell to exit.
    pub fn run_startup_commands(&mut self) -> Result<LineStatus> {
        let Some(home) = self.env.get("SUSHHOME") else {
            return Ok(LineStatus::Continue(0));
        };
        let path = PathBuf::from(home).join(STARTUP_FILE);
        let Ok(meta) = fs::metadata(&path) else {
            return Ok(LineStatus::Continue(0));
        };
        if meta.permissions().mode() & 0o500 != 0o500 {
            log::info!("skipping {}: not readable and executable", path.display());
            return Ok(LineStatus::Continue(0));
        }

        let contents = fs::read_to_string(&path)?;
        for line in contents.lines().filter(|l| !l.trim().is_empty()) {
            match self.run_line(line) {
                Ok(LineStatus::Exit) => return Ok(LineStatus::Exit),
                Ok(_) => {}
                Err(e) => eprintln!("{}", e),
            }
        }
        Ok(LineStatus::Continue(self.last_status))
    }

    fn prompt(&self) -> String {
        self.env.get("PS1").unwrap_or(DEFAULT_PROMPT).to_string()
    }

    /// Drops every background job. Called once, when the shell exits.
    pub fn shutdown(&mut self) {
        self.queue().shutdown();
    }
}

fn single_job_id(rest: &str, usage: &'static str) -> Result<u32> {
    let mut words = rest.split_whitespace();
    match (words.next(), words.next()) {
        (Some(word), None) => word.parse().map_err(|_| ShellError::Usage(usage)),
        _ => Err(ShellError::Usage(usage)),
    }
}

/// Where lines come from: an interactive editor, or plain stdin when
/// scripted or prompt-less.
enum LineReader {
    Editor(DefaultEditor, Option<PathBuf>),
    Plain(io::StdinLock<'static>),
}

impl LineReader {
    fn new(emit_prompt: bool) -> Self {
        if emit_prompt && io::stdin().is_terminal() {
            match DefaultEditor::new() {
                Ok(mut editor) => {
                    let history = history_path();
                    if let Some(path) = &history {
                        let _ = editor.load_history(path);
                    }
                    return LineReader::Editor(editor, history);
                }
                Err(e) => log::warn!("line editor unavailable: {}", e),
            }
        }
        LineReader::Plain(io::stdin().lock())
    }

    /// Next line, or `None` at end of input.
    fn read_line(&mut self, prompt: &str, emit_prompt: bool) -> io::Result<Option<String>> {
        match self {
            LineReader::Editor(editor, _) => loop {
                match editor.readline(prompt) {
                    Ok(line) => {
                        if !line.trim().is_empty() {
                            let _ = editor.add_history_entry(line.as_str());
                        }
                        return Ok(Some(line));
                    }
                    Err(ReadlineError::Interrupted) => continue,
                    Err(ReadlineError::Eof) => return Ok(None),
                    Err(ReadlineError::Io(e)) => return Err(e),
                    Err(e) => return Err(io::Error::new(io::ErrorKind::Other, e.to_string())),
                }
            },
            LineReader::Plain(stdin) => {
                if emit_prompt {
                    print!("{}", prompt);
                    io::stdout().flush()?;
                }
                let mut line = String::new();
                match stdin.read_line(&mut line)? {
                    0 => Ok(None),
                    _ => Ok(Some(line)),
                }
            }
        }
    }

    fn save_history(&mut self) {
        if let LineReader::Editor(editor, Some(path)) = self {
            if let Some(dir) = path.parent() {
                let _ = fs::create_dir_all(dir);
            }
            if let Err(e) = editor.save_history(path.as_path()) {
                log::warn!("could not save history to {}: {}", path.display(), e);
            }
        }
    }
}

fn history_path() -> Option<PathBuf> {
    dirs_next::data_dir().map(|dir| dir.join("sush").join("history"))
}

/// Runs the main shell loop: runs the startup script, then prints the
/// prompt (if enabled), reads input and evaluates it until end of input or
/// `exit`. Returns the shell's exit status.
///
/// - `emit_prompt`: if true, prints the command prompt.
pub fn run_shell(shell: &mut Shell, emit_prompt: bool) -> i32 {
    let mut exit_requested = match shell.run_startup_commands() {
        Ok(status) => status == LineStatus::Exit,
        Err(e) => {
            eprintln!("{}", e);
            false
        }
    };

    let mut reader = LineReader::new(emit_prompt);
    while !exit_requested {
        let line = match reader.read_line(&shell.prompt(), emit_prompt) {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                eprintln!("Error reading input: {}", e);
                break;
            }
        };
        log::debug!("received command: {}", line.trim_end());
        match shell.run_line(&line) {
            Ok(LineStatus::Exit) => exit_requested = true,
            Ok(LineStatus::Continue(_)) => {}
            Err(e) => eprintln!("{}", e),
        }
    }

    reader.save_history();
    shell.shutdown();
    shell.last_status()
}
