//! Target discovery and the HotSpot dynamic attach protocol
//!
//! The diagnostic channel is an injected capability: the sampler only sees
//! the [`DiagnosticChannel`] and [`TargetHandle`] traits. The concrete
//! implementation speaks the HotSpot attach protocol over the per-process
//! Unix socket (`/tmp/.java_pid<pid>` inside the target's root), nudging the
//! JVM with an attach file plus SIGQUIT when the socket does not exist yet.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tracing::{debug, warn};

use crate::error::AgentError;

/// How long to wait for the target to open its attach socket
const ATTACH_WAIT: Duration = Duration::from_secs(5);
const ATTACH_POLL: Duration = Duration::from_millis(100);

/// Read timeout on the dump socket
const DUMP_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// One established attachment to a target process
pub trait TargetHandle: Send {
    /// Pull one stack dump; the stream yields the dump text
    fn remote_dump(&mut self) -> Result<Box<dyn Read + Send>, AgentError>;
}

/// Host diagnostic channel: discovery plus attachment
pub trait DiagnosticChannel: Send + Sync {
    /// Attachable target pids, excluding self, sorted descending.
    /// Non-fatal on failure: logs and returns an empty list.
    fn list(&self) -> Vec<i32>;

    /// Attach to a target; tears down nothing — callers drop any prior
    /// handle before attaching anew
    fn attach(&self, pid: i32) -> Result<Box<dyn TargetHandle>, AgentError>;
}

/// HotSpot attach protocol over `/proc` and the per-pid Unix socket
#[derive(Debug, Default)]
pub struct HotSpotChannel;

impl HotSpotChannel {
    pub fn new() -> Self {
        Self
    }
}

impl DiagnosticChannel for HotSpotChannel {
    fn list(&self) -> Vec<i32> {
        match discover_jvm_pids() {
            Ok(pids) => pids,
            Err(e) => {
                warn!("process discovery failed: {}", e);
                Vec::new()
            }
        }
    }

    fn attach(&self, pid: i32) -> Result<Box<dyn TargetHandle>, AgentError> {
        let socket = ensure_attach_socket(pid).map_err(|e| AgentError::Attachment {
            pid,
            reason: e.to_string(),
        })?;
        Ok(Box::new(HotSpotHandle { pid, socket }))
    }
}

struct HotSpotHandle {
    pid: i32,
    socket: PathBuf,
}

impl TargetHandle for HotSpotHandle {
    fn remote_dump(&mut self) -> Result<Box<dyn Read + Send>, AgentError> {
        debug!("requesting thread dump from pid={}", self.pid);
        dump_over_socket(&self.socket).map_err(AgentError::StreamRead)
    }
}

/// Scan /proc for attachable JVMs, excluding this process
fn discover_jvm_pids() -> std::io::Result<Vec<i32>> {
    let own_pid = std::process::id() as i32;
    let mut pids = Vec::new();
    for entry in fs::read_dir("/proc")? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(pid) = name.to_str().and_then(|s| s.parse::<i32>().ok()) else {
            continue;
        };
        if pid == own_pid {
            continue;
        }
        // comm holds the executable name; JVM processes report "java"
        let comm = match fs::read_to_string(entry.path().join("comm")) {
            Ok(c) => c,
            Err(_) => continue, // process vanished or not ours to read
        };
        if comm.trim() == "java" {
            debug!("found attachable process id={}", pid);
            pids.push(pid);
        }
    }
    pids.sort_unstable();
    pids.reverse();
    Ok(pids)
}

/// Socket the target JVM listens on once the attach mechanism is started
fn attach_socket_path(pid: i32) -> PathBuf {
    PathBuf::from(format!("/proc/{pid}/root/tmp/.java_pid{pid}"))
}

/// Attach file whose presence tells the JVM to start the attach listener
fn attach_file_path(pid: i32) -> PathBuf {
    PathBuf::from(format!("/proc/{pid}/cwd/.attach_pid{pid}"))
}

/// Make sure the target's attach socket exists, starting the listener with
/// the attach-file + SIGQUIT handshake if needed
fn ensure_attach_socket(pid: i32) -> std::io::Result<PathBuf> {
    let socket = attach_socket_path(pid);
    if socket.exists() {
        return Ok(socket);
    }

    let attach_file = attach_file_path(pid);
    File::create(&attach_file)?;
    kill(Pid::from_raw(pid), Signal::SIGQUIT)
        .map_err(|e| std::io::Error::other(format!("SIGQUIT to {pid} failed: {e}")))?;

    let deadline = std::time::Instant::now() + ATTACH_WAIT;
    let result = loop {
        if socket.exists() {
            break Ok(socket.clone());
        }
        if std::time::Instant::now() >= deadline {
            break Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("target {pid} never opened its attach socket"),
            ));
        }
        std::thread::sleep(ATTACH_POLL);
    };

    let _ = fs::remove_file(&attach_file);
    result
}

/// Issue a `threaddump` command over an attach socket and hand back the
/// response stream, positioned after the status line
///
/// Wire format: protocol version and each argument NUL-terminated; the
/// reply starts with a decimal status line, `0` meaning success.
fn dump_over_socket(socket: &Path) -> std::io::Result<Box<dyn Read + Send>> {
    let mut stream = UnixStream::connect(socket)?;
    stream.set_read_timeout(Some(DUMP_READ_TIMEOUT))?;

    stream.write_all(b"1\0threaddump\0\0\0\0")?;
    stream.flush()?;

    let mut reader = BufReader::new(stream);
    let mut status = String::new();
    reader.read_line(&mut status)?;
    if status.trim() != "0" {
        return Err(std::io::Error::other(format!(
            "attach command rejected with status {}",
            status.trim()
        )));
    }
    Ok(Box::new(reader))
}
