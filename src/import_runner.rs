use std::process::{ExitStatus, Stdio};

use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::Command,
    sync::oneshot,
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    models::{EventSink, ImportRequest, JobEvent, LogStream},
    progress_parser::{parse_line, Stage},
    simulator::simulate_import,
};

/// Exit code reported when the import binary could not be started.
pub const LAUNCH_FAILURE_CODE: i32 = -1;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOutcome {
    pub code: Option<i32>,
    pub signal: Option<String>,
    pub error: Option<String>,
    pub cancelled: bool,
}

impl RunOutcome {
    pub fn exited(code: i32) -> Self {
        Self {
            code: Some(code),
            ..Default::default()
        }
    }

    pub fn launch_failed(error: impl Into<String>) -> Self {
        Self {
            code: Some(LAUNCH_FAILURE_CODE),
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn cancelled() -> Self {
        Self {
            cancelled: true,
            ..Default::default()
        }
    }

    fn from_status(status: ExitStatus) -> Self {
        Self {
            code: status.code(),
            signal: exit_signal(&status).map(signal_name),
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        !self.cancelled && self.code == Some(0)
    }
}

#[derive(Debug, Clone)]
pub enum ImportRunner {
    Process { binary: String },
    Mock,
}

impl ImportRunner {
    pub fn new(binary: impl Into<String>, mock: bool) -> Self {
        if mock {
            Self::Mock
        } else {
            Self::Process {
                binary: binary.into(),
            }
        }
    }

    pub fn is_mock(&self) -> bool {
        matches!(self, Self::Mock)
    }

    pub async fn run(
        &self,
        request: &ImportRequest,
        sink: EventSink,
        cancel: oneshot::Receiver<()>,
    ) -> RunOutcome {
        match self {
            Self::Mock => simulate_import(sink, cancel).await,
            Self::Process { binary } => run_process(binary, request, sink, cancel).await,
        }
    }
}

pub fn import_args(request: &ImportRequest) -> Vec<String> {
    let mut args = vec![
        "--artist".to_string(),
        request.artist.clone(),
        "--url".to_string(),
        request.url.clone(),
    ];
    if request.dry_run {
        args.push("--dry-run".to_string());
    }
    if request.keep_temp {
        args.push("--keep-temp".to_string());
    }
    args
}

async fn run_process(
    binary: &str,
    request: &ImportRequest,
    sink: EventSink,
    mut cancel: oneshot::Receiver<()>,
) -> RunOutcome {
    let args = import_args(request);
    info!(binary = %binary, args = ?args, "Spawning import process");

    let mut child = match Command::new(binary)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(err) => {
            warn!(binary = %binary, "Failed to launch import process: {err}");
            let message = format!("Failed to launch {binary}: {err}");
            let _ = sink.send(JobEvent::Log {
                message: message.clone(),
                stream: LogStream::Stderr,
            });
            return RunOutcome::launch_failed(message);
        }
    };

    let mut readers = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        readers.push(spawn_line_reader(stdout, LogStream::Stdout, sink.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(spawn_line_reader(stderr, LogStream::Stderr, sink.clone()));
    }
    drop(sink);

    let outcome = tokio::select! {
        status = child.wait() => match status {
            Ok(status) => RunOutcome::from_status(status),
            Err(err) => RunOutcome {
                error: Some(format!("Failed waiting for import process: {err}")),
                ..Default::default()
            },
        },
        Ok(()) = &mut cancel => {
            info!(binary = %binary, "Killing import process on cancel");
            if let Err(err) = child.kill().await {
                warn!("Failed to kill import process: {err}");
            }
            RunOutcome::cancelled()
        }
    };
    // A cancel arriving from here on finds the receiver gone.
    drop(cancel);

    // Helpers spawned by the importer can keep the pipes open after the
    // child is killed, so a cancelled run stops reading instead of draining.
    if outcome.cancelled {
        for reader in &readers {
            reader.abort();
        }
    }
    for reader in readers {
        match reader.await {
            Ok(()) => {}
            Err(err) if err.is_cancelled() => {}
            Err(err) => warn!("Output reader task join error: {err}"),
        }
    }

    outcome
}

fn spawn_line_reader<R>(reader: R, stream: LogStream, sink: EventSink) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut segments = BufReader::new(reader).split(b'\n');
        loop {
            match segments.next_segment().await {
                Ok(Some(raw)) => {
                    let text = String::from_utf8_lossy(&raw);
                    let line = text.trim();
                    if !line.is_empty() {
                        emit_line(&sink, line, stream);
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    warn!(stream = ?stream, "Failed reading import output: {err}");
                    break;
                }
            }
        }
    })
}

/// Log event first, then whatever the parser recognised in the line.
pub fn emit_line(sink: &EventSink, line: &str, stream: LogStream) {
    debug!(stream = ?stream, line, "Import output");
    let _ = sink.send(JobEvent::Log {
        message: line.to_string(),
        stream,
    });

    let parsed = parse_line(line);
    if let Some(stage) = parsed.stage {
        let _ = sink.send(JobEvent::Stage { stage });
    }
    if let Some(progress) = parsed.progress {
        let _ = sink.send(JobEvent::Progress {
            stage: Some(Stage::Downloading),
            progress,
        });
    }
    if let Some(stats) = parsed.stats {
        let _ = sink.send(JobEvent::Stats { stats });
    }
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

pub fn signal_name(signal: i32) -> String {
    match signal {
        1 => "SIGHUP".to_string(),
        2 => "SIGINT".to_string(),
        3 => "SIGQUIT".to_string(),
        6 => "SIGABRT".to_string(),
        9 => "SIGKILL".to_string(),
        11 => "SIGSEGV".to_string(),
        13 => "SIGPIPE".to_string(),
        15 => "SIGTERM".to_string(),
        other => format!("signal {other}"),
    }
}
