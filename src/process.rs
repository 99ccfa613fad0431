//! Child process plumbing: spawn a tool, merge its stdout and stderr into
//! one stream of text lines, and stop it on request.
//!
//! On unix each tool leads its own process group so that stopping it also
//! reaches whatever it spawned.

use crate::error::ToolError;
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::io::{self, BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use tracing::{debug, warn};

/// A program plus its arguments, kept around for logging.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<OsString>,
    envs: Vec<(OsString, OsString)>,
    own_group: bool,
}

impl ToolCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            own_group: true,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        self.envs
            .push((key.as_ref().to_os_string(), value.as_ref().to_os_string()));
        self
    }

    /// Run in the caller's process group, so a stop aimed at the caller's
    /// group takes this process down with it.
    pub fn in_caller_group(mut self) -> Self {
        self.own_group = false;
        self
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Merged output of a running tool. Finite and single-use: it ends when
/// the last writer of the shared pipe is gone.
pub struct OutputLines {
    rx: Receiver<io::Result<String>>,
}

impl Iterator for OutputLines {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rx.recv().ok()
    }
}

pub struct ProcessHandle {
    child: Child,
    lines: Option<OutputLines>,
    own_group: bool,
    stop_sent: bool,
}

impl ProcessHandle {
    /// Spawn `command` with stdout and stderr sharing one pipe, so lines
    /// arrive in the order the tool wrote them. Nothing is returned if the
    /// spawn itself fails.
    pub fn start(command: &ToolCommand) -> Result<Self, ToolError> {
        debug!(command = %command, "spawning");
        let spawn_error = |source| ToolError::Spawn {
            program: command.program.clone(),
            source,
        };
        let (reader, writer) = io::pipe().map_err(spawn_error)?;

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .envs(command.envs.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(writer.try_clone().map_err(spawn_error)?)
            .stderr(writer);
        #[cfg(unix)]
        if command.own_group {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let child = cmd.spawn().map_err(spawn_error)?;
        // Our copies of the write end must go, or the reader never sees EOF.
        drop(cmd);

        let (tx, rx) = mpsc::channel();
        pump(reader, tx, "output");

        Ok(Self {
            child,
            lines: Some(OutputLines { rx }),
            own_group: command.own_group,
            stop_sent: false,
        })
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Hand out the output stream. Only the first call gets it.
    pub fn take_lines(&mut self) -> Option<OutputLines> {
        self.lines.take()
    }

    /// Ask the process, and its group when it leads one, to stop. Does not
    /// wait for it to exit.
    pub fn terminate(&mut self) {
        if self.stop_sent {
            return;
        }
        self.stop_sent = true;
        if let Err(err) = send_stop(&mut self.child, self.own_group) {
            warn!(pid = self.child.id(), "failed to signal process: {err}");
        }
    }

    /// Block until exit. `None` means the process died from a signal.
    pub fn wait(&mut self) -> Result<Option<i32>, ToolError> {
        let status = self.child.wait()?;
        debug!(pid = self.child.id(), %status, "process exited");
        Ok(status.code())
    }
}

#[cfg(unix)]
fn send_stop(child: &mut Child, group: bool) -> io::Result<()> {
    let pid = child.id() as libc::pid_t;
    // SAFETY: plain syscalls on a pid we own and have not reaped yet. A
    // child started with `process_group(0)` leads a group with the same id.
    let rc = unsafe {
        if group {
            libc::killpg(pid, libc::SIGTERM)
        } else {
            libc::kill(pid, libc::SIGTERM)
        }
    };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn send_stop(child: &mut Child, _group: bool) -> io::Result<()> {
    child.kill()
}

fn pump<R: Read + Send + 'static>(reader: R, tx: Sender<io::Result<String>>, name: &str) {
    let spawned = thread::Builder::new()
        .name(format!("pipe-{name}"))
        .spawn(move || {
            let result = split_lines(BufReader::new(reader), |line| tx.send(Ok(line)).is_ok());
            if let Err(err) = result {
                let _ = tx.send(Err(err));
            }
        });
    if let Err(err) = spawned {
        warn!("cannot start {name} reader: {err}");
    }
}

/// Split a byte stream on `\n` or `\r` (progress bars redraw with bare
/// carriage returns), decode lossily and feed non-blank lines to `emit`.
/// Stops early once `emit` returns `false`.
pub fn split_lines<R: BufRead>(mut reader: R, mut emit: impl FnMut(String) -> bool) -> io::Result<()> {
    let mut buf = Vec::with_capacity(256);
    loop {
        let (complete, used) = {
            let available = match reader.fill_buf() {
                Ok(bytes) => bytes,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            };
            if available.is_empty() {
                break;
            }
            match available.iter().position(|&b| b == b'\n' || b == b'\r') {
                Some(pos) => {
                    buf.extend_from_slice(&available[..pos]);
                    (true, pos + 1)
                }
                None => {
                    buf.extend_from_slice(available);
                    (false, available.len())
                }
            }
        };
        reader.consume(used);
        if complete && !flush_line(&mut buf, &mut emit) {
            return Ok(());
        }
    }
    flush_line(&mut buf, &mut emit);
    Ok(())
}

fn flush_line(buf: &mut Vec<u8>, emit: &mut impl FnMut(String) -> bool) -> bool {
    let line = String::from_utf8_lossy(buf).trim_end().to_string();
    buf.clear();
    if line.trim().is_empty() {
        return true;
    }
    emit(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn collect(bytes: &[u8]) -> Vec<String> {
        let mut out = Vec::new();
        split_lines(Cursor::new(bytes.to_vec()), |l| {
            out.push(l);
            true
        })
        .unwrap();
        out
    }

    #[test]
    fn splits_on_newline_and_carriage_return() {
        let lines = collect(b"a\r\nframe=1 time=00:00:01.00\rframe=2 time=00:00:02.00\nlast");
        assert_eq!(
            lines,
            vec![
                "a",
                "frame=1 time=00:00:01.00",
                "frame=2 time=00:00:02.00",
                "last"
            ]
        );
    }

    #[test]
    fn invalid_utf8_is_replaced_not_fatal() {
        let lines = collect(b"ok \xff\xfe bytes\n");
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("ok "));
        assert!(lines[0].contains('\u{FFFD}'));
    }

    #[test]
    fn stops_when_receiver_refuses() {
        let mut seen = 0;
        split_lines(Cursor::new(b"1\n2\n3\n".to_vec()), |_| {
            seen += 1;
            false
        })
        .unwrap();
        assert_eq!(seen, 1);
    }

    #[test]
    fn command_display_joins_args() {
        let cmd = ToolCommand::new("ffmpeg").args(["-i", "in.mp4"]).arg("-vn");
        assert_eq!(cmd.to_string(), "ffmpeg -i in.mp4 -vn");
    }

    #[test]
    fn missing_executable_is_spawn_error() {
        let cmd = ToolCommand::new("/definitely/not/here/tool-xyz");
        match ProcessHandle::start(&cmd) {
            Err(ToolError::Spawn { program, .. }) => {
                assert_eq!(program, PathBuf::from("/definitely/not/here/tool-xyz"))
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("spawn should fail"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn merges_stdout_and_stderr() {
        let cmd = ToolCommand::new("sh").args(["-c", "echo out; echo err 1>&2"]);
        let mut handle = ProcessHandle::start(&cmd).unwrap();
        let mut lines: Vec<String> = handle
            .take_lines()
            .unwrap()
            .map(|l| l.unwrap())
            .collect();
        lines.sort();
        assert_eq!(lines, vec!["err", "out"]);
        assert_eq!(handle.wait().unwrap(), Some(0));
        assert!(handle.take_lines().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn interleaved_streams_keep_write_order() {
        let cmd = ToolCommand::new("sh").args(["-c", "echo one; echo two 1>&2; echo three"]);
        let mut handle = ProcessHandle::start(&cmd).unwrap();
        let lines: Vec<String> = handle
            .take_lines()
            .unwrap()
            .map(|l| l.unwrap())
            .collect();
        assert_eq!(lines, vec!["one", "two", "three"]);
        assert_eq!(handle.wait().unwrap(), Some(0));
    }

    /// Alive and not merely a zombie waiting for its new parent to reap it.
    #[cfg(unix)]
    fn running(pid: libc::pid_t) -> bool {
        // SAFETY: signal 0 only checks that the pid exists.
        if unsafe { libc::kill(pid, 0) } != 0 {
            return false;
        }
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Ok(stat) => !stat
                .rsplit_once(") ")
                .is_some_and(|(_, rest)| rest.starts_with('Z')),
            Err(_) => true,
        }
    }

    #[cfg(unix)]
    #[test]
    fn terminate_reaches_grandchildren() {
        let cmd = ToolCommand::new("sh").args(["-c", "sleep 31 & echo $!; wait"]);
        let mut handle = ProcessHandle::start(&cmd).unwrap();
        let mut lines = handle.take_lines().unwrap();
        let grandchild: libc::pid_t = lines.next().unwrap().unwrap().trim().parse().unwrap();
        assert!(running(grandchild));

        handle.terminate();
        assert_eq!(handle.wait().unwrap(), None);
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while running(grandchild) && std::time::Instant::now() < deadline {
            thread::sleep(std::time::Duration::from_millis(20));
        }
        assert!(!running(grandchild));
        assert!(lines.all(|l| l.is_ok()));
    }

    #[cfg(unix)]
    #[test]
    fn caller_group_child_is_signalled_alone() {
        let cmd = ToolCommand::new("sleep").arg("30").in_caller_group();
        let mut handle = ProcessHandle::start(&cmd).unwrap();
        handle.terminate();
        assert_eq!(handle.wait().unwrap(), None);
    }

    #[cfg(unix)]
    #[test]
    fn terminate_stops_long_running_process() {
        let cmd = ToolCommand::new("sleep").arg("30");
        let mut handle = ProcessHandle::start(&cmd).unwrap();
        handle.terminate();
        handle.terminate();
        assert_eq!(handle.wait().unwrap(), None);
    }
}
