// src/exec/liveness.rs

//! Process liveness checks for bare pids.

use std::fs;
use std::io;
use std::path::Path;

use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;

/// True if the process exists and is not a zombie.
///
/// Reads the state field of `/proc/<pid>/stat`; where `/proc` is not
/// mounted it falls back to a `kill(pid, 0)` probe, which cannot tell a
/// zombie from a live process.
pub fn process_is_alive(pid: Pid) -> io::Result<bool> {
    let path = format!("/proc/{}/stat", pid);
    match fs::read_to_string(&path) {
        Ok(stat) => Ok(stat_state(&stat).is_some_and(|state| state != 'Z' && state != 'X')),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            if Path::new("/proc/self").exists() {
                Ok(false)
            } else {
                probe(pid)
            }
        }
        Err(e) => Err(e),
    }
}

fn probe(pid: Pid) -> io::Result<bool> {
    match kill(pid, None) {
        Ok(()) | Err(Errno::EPERM) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        Err(e) => Err(io::Error::from(e)),
    }
}

/// Extract the one-letter state from a `/proc/<pid>/stat` line.
///
/// The command name is wrapped in parentheses and may itself contain spaces
/// or parentheses, so the state is the first field after the *last* `)`.
fn stat_state(stat: &str) -> Option<char> {
    let rest = &stat[stat.rfind(')')? + 1..];
    rest.split_whitespace().next()?.chars().next()
}
