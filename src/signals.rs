use crate::error::Result;
use crate::jobs::{JobQueue, Reaped};
use signal_hook::{consts::signal::*, iterator::Signals};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

/// Installs the shell's signal handling on a dedicated thread:
/// - SIGCHLD: runs the completion notifier over the job queue.
/// - SIGQUIT: drops every background job and exits.
///
/// The thread takes the queue's mutex for each notification, which keeps it
/// out of the read loop's own queue operations.
pub fn install_signal_handlers(queue: Arc<Mutex<JobQueue>>) -> Result<()> {
    let mut signals = Signals::new([SIGCHLD, SIGQUIT])?;
    thread::spawn(move || {
        for signal in signals.forever() {
            match signal {
                SIGCHLD => notify_completion(&queue),
                SIGQUIT => {
                    println!("Terminating after receipt of SIGQUIT signal");
                    queue.lock().unwrap_or_else(PoisonError::into_inner).shutdown();
                    std::process::exit(0);
                }
                _ => unreachable!(),
            }
        }
    });
    Ok(())
}

/// Reaps finished background jobs and reports the ones that were canceled.
pub fn notify_completion(queue: &Mutex<JobQueue>) {
    let reaped = queue.lock().unwrap_or_else(PoisonError::into_inner).reap();
    for event in reaped {
        match event {
            Reaped::Canceled(job_id) => println!("{} is canceled", job_id),
            Reaped::Completed(job_id) => log::debug!("job {} is complete", job_id),
        }
    }
}
