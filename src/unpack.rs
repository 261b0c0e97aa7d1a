use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use camino::Utf8Path;
use serde::Serialize;

use crate::error::StampError;

const POLL_INTERVAL: Duration = Duration::from_millis(25);
const STDERR_TAIL_BYTES: usize = 4096;

/// Extracts one numbered extension of a packed archive into a standalone FITS file.
pub trait Unpacker: Send + Sync {
    fn unpack(
        &self,
        source: &Utf8Path,
        extension: &str,
        destination: &Utf8Path,
    ) -> Result<(), StampError>;
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub program: String,
    pub resolved: Option<String>,
    pub version: Option<String>,
}

/// Runs CFITSIO's `funpack -O <dest> -E <ext> <source>`.
#[derive(Debug, Clone)]
pub struct FunpackUnpacker {
    program: String,
    resolved: Option<PathBuf>,
    leading_args: Vec<String>,
    timeout: Duration,
}

impl FunpackUnpacker {
    pub fn new(program: &str, timeout: Duration) -> Self {
        Self {
            program: program.to_string(),
            resolved: resolve_program(program),
            leading_args: Vec::new(),
            timeout,
        }
    }

    /// Arguments placed before the funpack options, for wrappers such as
    /// `nice` or a container runner.
    pub fn with_leading_args(mut self, args: Vec<String>) -> Self {
        self.leading_args = args;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn tool_info(&self) -> ToolInfo {
        ToolInfo {
            program: self.program.clone(),
            resolved: self
                .resolved
                .as_ref()
                .map(|path| path.display().to_string()),
            version: self
                .resolved
                .as_ref()
                .and_then(|path| tool_version(path, &["-V"])),
        }
    }

    fn require_program(&self) -> Result<&PathBuf, StampError> {
        self.resolved
            .as_ref()
            .ok_or_else(|| StampError::MissingTool(self.program.clone()))
    }

    fn wait_with_timeout(&self, mut child: Child) -> Result<(), StampError> {
        // Drained concurrently so a chatty tool cannot block on a full pipe.
        let stderr = child.stderr.take().map(|mut pipe| {
            thread::spawn(move || {
                let mut buffer = Vec::new();
                let _ = pipe.read_to_end(&mut buffer);
                buffer
            })
        });

        let started = Instant::now();
        let status = loop {
            let polled = child
                .try_wait()
                .map_err(|err| StampError::Unpack(err.to_string()))?;
            if let Some(status) = polled {
                break status;
            }
            if started.elapsed() >= self.timeout {
                let _ = child.kill();
                let _ = child.wait();
                return Err(StampError::Unpack(format!(
                    "timed out after {:.1}s",
                    self.timeout.as_secs_f64()
                )));
            }
            thread::sleep(POLL_INTERVAL);
        };

        if status.success() {
            return Ok(());
        }
        let captured = stderr
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();
        let tail = &captured[captured.len().saturating_sub(STDERR_TAIL_BYTES)..];
        let stderr = String::from_utf8_lossy(tail);
        let stderr = stderr.trim();
        let message = if stderr.is_empty() {
            format!("{} exited with {status}", self.program)
        } else {
            stderr.to_string()
        };
        Err(StampError::Unpack(message))
    }
}

impl Unpacker for FunpackUnpacker {
    fn unpack(
        &self,
        source: &Utf8Path,
        extension: &str,
        destination: &Utf8Path,
    ) -> Result<(), StampError> {
        let program = self.require_program()?;
        if !source.as_std_path().is_file() {
            return Err(StampError::Unpack(format!(
                "source archive not found: {source}"
            )));
        }
        // funpack refuses to overwrite an existing output file.
        if destination.as_std_path().exists() {
            fs::remove_file(destination.as_std_path())
                .map_err(|err| StampError::Filesystem(err.to_string()))?;
        }

        let child = Command::new(program)
            .args(&self.leading_args)
            .arg("-O")
            .arg(destination.as_str())
            .arg("-E")
            .arg(extension)
            .arg(source.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| StampError::Unpack(format!("{}: {err}", self.program)))?;
        self.wait_with_timeout(child)
    }
}

fn resolve_program(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    find_in_path(program)
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for path in std::env::split_paths(&path_var) {
        let exe = path.join(format!("{name}.exe"));
        if exe.is_file() {
            return Some(exe);
        }
        let plain = path.join(name);
        if plain.is_file() {
            return Some(plain);
        }
    }
    None
}

fn tool_version(path: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new(path).args(args).output().ok()?;
    let text = if output.stdout.is_empty() {
        output.stderr
    } else {
        output.stdout
    };
    let text = String::from_utf8_lossy(&text).trim().to_string();
    if text.is_empty() { None } else { Some(text) }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use camino::Utf8PathBuf;

    use super::*;

    #[test]
    fn missing_program_is_reported() {
        let unpacker = FunpackUnpacker::new("definitely-not-funpack-xyz", Duration::from_secs(1));
        let err = unpacker
            .unpack(
                Utf8Path::new("/nope/0047A0_g.fz"),
                "00",
                Utf8Path::new("/nope/out.fits"),
            )
            .unwrap_err();
        assert_matches!(err, StampError::MissingTool(program) if program == "definitely-not-funpack-xyz");
    }

    #[cfg(unix)]
    #[test]
    fn missing_source_fails_before_spawning() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let unpacker = FunpackUnpacker::new("/bin/sh", Duration::from_secs(1));
        let err = unpacker
            .unpack(&root.join("absent.fz"), "00", &root.join("out.fits"))
            .unwrap_err();
        assert_matches!(err, StampError::Unpack(message) if message.contains("not found"));
    }

    #[cfg(unix)]
    #[test]
    fn slow_tool_is_killed_after_timeout() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let source = root.join("0047A0_g.fz");
        fs::write(source.as_std_path(), b"packed").unwrap();

        let unpacker = FunpackUnpacker::new("/bin/sh", Duration::from_millis(200))
            .with_leading_args(vec!["-c".into(), "sleep 5".into(), "funpack".into()]);
        let started = Instant::now();
        let err = unpacker
            .unpack(&source, "00", &root.join("out.fits"))
            .unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(4));
        assert_matches!(err, StampError::Unpack(message) if message.contains("timed out"));
    }

    #[cfg(unix)]
    #[test]
    fn failing_tool_reports_stderr() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let source = root.join("0047A0_g.fz");
        fs::write(source.as_std_path(), b"packed").unwrap();

        let unpacker = FunpackUnpacker::new("/bin/sh", Duration::from_secs(5)).with_leading_args(
            vec![
                "-c".into(),
                "echo 'bad extension' >&2; exit 1".into(),
                "funpack".into(),
            ],
        );
        let err = unpacker
            .unpack(&source, "99", &root.join("out.fits"))
            .unwrap_err();
        assert_matches!(err, StampError::Unpack(message) if message == "bad extension");
    }

    #[cfg(unix)]
    #[test]
    fn large_stderr_does_not_stall_until_timeout() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let source = root.join("0047A0_g.fz");
        fs::write(source.as_std_path(), b"packed").unwrap();

        let unpacker = FunpackUnpacker::new("/bin/sh", Duration::from_secs(10)).with_leading_args(
            vec![
                "-c".into(),
                "head -c 200000 /dev/zero | tr '\\0' x >&2; echo 'bad extension' >&2; exit 1"
                    .into(),
                "funpack".into(),
            ],
        );
        let started = Instant::now();
        let err = unpacker
            .unpack(&source, "00", &root.join("out.fits"))
            .unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_matches!(
            err,
            StampError::Unpack(message)
                if message.ends_with("bad extension") && message.len() <= STDERR_TAIL_BYTES
        );
    }

    #[cfg(unix)]
    #[test]
    fn passes_output_extension_and_source_in_order() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let source = root.join("0047A0_g.fz");
        fs::write(source.as_std_path(), b"packed").unwrap();
        let dest = root.join("0047A0_g_00.fits");

        // $1..$5 are -O <dest> -E <ext> <source>
        let unpacker = FunpackUnpacker::new("/bin/sh", Duration::from_secs(5)).with_leading_args(
            vec![
                "-c".into(),
                r#"[ "$3" = "-E" ] && [ "$4" = "07" ] && cp "$5" "$2""#.into(),
                "funpack".into(),
            ],
        );
        unpacker.unpack(&source, "07", &dest).unwrap();
        assert_eq!(fs::read(dest.as_std_path()).unwrap(), b"packed");
    }
}
