//! `gallery-dl` as a [`Fetcher`].

use std::ffi::OsString;
use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError};
use log::{debug, info, warn};

use super::{FetchError, FetchRequest, FetchedFile, Fetcher};
use crate::config::split_args;
use crate::error::ConfigError;
use crate::storage::list_files;

const POLL_INTERVAL: Duration = Duration::from_millis(50);
/// How much of the process's stderr ends up in a failure message.
const STDERR_TAIL_BYTES: usize = 2048;
/// How long stderr may stay open after the process exits, e.g. held by a
/// grandchild, before the rest of it is dropped.
const STDERR_GRACE: Duration = Duration::from_secs(2);

/// Runs `<program> [prefix args] --dest <dir> [--config <file>] [extra] <urls>`.
#[derive(Debug, Clone)]
pub struct GalleryDlFetcher {
    program: String,
    prefix_args: Vec<String>,
}

impl GalleryDlFetcher {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            prefix_args: Vec::new(),
        }
    }

    /// Parses a command line such as `python3 -m gallery_dl`.
    pub fn from_command_line(command: &str) -> Result<Self, ConfigError> {
        let mut parts = split_args(command)?.into_iter();
        let program = parts.next().ok_or_else(|| ConfigError::InvalidValue {
            key: "gallery_dl_binary".to_string(),
            reason: "empty command".to_string(),
        })?;
        Ok(Self {
            program,
            prefix_args: parts.collect(),
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments after the program name.
    pub fn build_args(&self, request: &FetchRequest) -> Vec<OsString> {
        let mut args: Vec<OsString> = self.prefix_args.iter().map(OsString::from).collect();

        args.push("--dest".into());
        args.push(request.destination.clone().into_os_string());

        if let Some(config) = request.config_path.as_ref().filter(|p| p.is_file()) {
            args.push("--config".into());
            args.push(config.clone().into_os_string());
        }

        args.extend(request.extra_args.iter().map(OsString::from));
        args.extend(request.urls.iter().map(OsString::from));
        args
    }

    fn wait(&self, child: &mut Child, timeout: Option<Duration>) -> Result<ExitStatus, FetchError> {
        let deadline = timeout.map(|t| (Instant::now() + t, t));

        loop {
            if let Some(status) = child.try_wait().map_err(FetchError::Wait)? {
                return Ok(status);
            }

            if let Some((deadline, after)) = deadline {
                if Instant::now() >= deadline {
                    warn!(
                        "Killing {} (pid {}) after {}s",
                        self.program,
                        child.id(),
                        after.as_secs()
                    );
                    if let Err(e) = child.kill() {
                        warn!("Failed to kill fetch process: {}", e);
                    }
                    let _ = child.wait();
                    return Err(FetchError::TimedOut { after });
                }
            }

            thread::sleep(POLL_INTERVAL);
        }
    }
}

/// Drains stderr on a separate thread so a chatty process never blocks on
/// a full pipe. Chunks arrive on the returned channel until the pipe closes.
fn drain_stderr(child: &mut Child) -> Option<Receiver<Vec<u8>>> {
    let mut stderr = child.stderr.take()?;
    let (sender, receiver) = unbounded();
    thread::spawn(move || {
        let mut chunk = [0u8; 4096];
        loop {
            match stderr.read(&mut chunk) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if sender.send(chunk[..n].to_vec()).is_err() {
                        break;
                    }
                }
            }
        }
    });
    Some(receiver)
}

/// What the reader has collected, waiting at most `grace` for the pipe to
/// close. The reader is left detached if it is still blocked.
fn collect_stderr(chunks: &Receiver<Vec<u8>>, grace: Duration) -> Vec<u8> {
    let deadline = Instant::now() + grace;
    let mut buf = Vec::new();
    loop {
        match chunks.recv_deadline(deadline) {
            Ok(chunk) => buf.extend_from_slice(&chunk),
            Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "stderr still open {}s after exit; ignoring the rest",
                    grace.as_secs()
                );
                break;
            }
        }
    }
    buf
}

fn stderr_tail(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim();
    if text.len() <= STDERR_TAIL_BYTES {
        return text.to_string();
    }
    let mut start = text.len() - STDERR_TAIL_BYTES;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}

fn collect_output(destination: &Path) -> Result<Vec<FetchedFile>, FetchError> {
    list_files(destination)?
        .into_iter()
        .map(|path| {
            let size = std::fs::metadata(&path)
                .map_err(|e| FetchError::Io {
                    path: path.clone(),
                    source: e,
                })?
                .len();
            let relative_path = path
                .strip_prefix(destination)
                .unwrap_or(&path)
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            Ok(FetchedFile {
                path,
                relative_path,
                size,
            })
        })
        .collect()
}

impl Fetcher for GalleryDlFetcher {
    fn fetch(&self, request: &FetchRequest) -> Result<Vec<FetchedFile>, FetchError> {
        let args = self.build_args(request);
        debug!("Running {} {:?}", self.program, args);

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| FetchError::Spawn {
                program: self.program.clone(),
                source: e,
            })?;

        let stderr = drain_stderr(&mut child);
        let status = self.wait(&mut child, request.timeout)?;
        let stderr = stderr
            .map(|chunks| stderr_tail(&collect_stderr(&chunks, STDERR_GRACE)))
            .unwrap_or_default();

        if !status.success() {
            return Err(FetchError::ProcessFailed {
                code: status.code(),
                stderr,
            });
        }

        let files = collect_output(&request.destination)?;
        info!(
            "Fetched {} files into {}",
            files.len(),
            request.destination.display()
        );
        Ok(files)
    }
}
