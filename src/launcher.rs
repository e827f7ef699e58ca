use std::io::{self, Read};
use std::os::fd::AsFd;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};

use crate::config::PluginConfig;
use crate::errors::LaunchError;
use crate::tunnel_spec::TunnelSpec;

pub const DEFAULT_HELPER: &str = match option_env!("STUNNEL_LIBEXEC_PROG") {
    Some(path) => path,
    None => "/usr/libexec/stunnel",
};

pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest port token accepted from the helper.
const MAX_TOKEN_LEN: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperSettings {
    pub program: PathBuf,
    pub read_timeout: Duration,
}

impl Default for HelperSettings {
    fn default() -> Self {
        HelperSettings {
            program: PathBuf::from(DEFAULT_HELPER),
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

/// Everything that varies per tunnel.
#[derive(Debug, Clone, Copy)]
pub struct TunnelRequest<'a> {
    pub node: &'a str,
    pub job_id: u32,
    pub step_id: u32,
    pub ports: &'a TunnelSpec,
}

/// Helper invocation as an argument vector. It is executed without a shell;
/// `render` gives a shell-safe form for logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelCommand {
    program: PathBuf,
    args: Vec<String>,
}

impl TunnelCommand {
    pub fn connect(program: &Path, request: &TunnelRequest<'_>, config: &PluginConfig) -> Self {
        let mut args = vec![
            "-t".to_string(),
            request.node.to_string(),
            "-i".to_string(),
            step_ref(request.job_id, request.step_id),
        ];
        for pair in request.ports.pairs() {
            args.push("-L".to_string());
            args.push(pair.directive());
        }
        args.push("-s".to_string());
        args.push(config.ssh_cmd.clone());
        args.push("-o".to_string());
        args.push(config.ssh_args.clone());
        args.extend(config.helpertask_args.split_whitespace().map(str::to_string));

        TunnelCommand {
            program: program.to_path_buf(),
            args,
        }
    }

    pub fn remove(program: &Path, job_id: u32, step_id: u32) -> Self {
        TunnelCommand {
            program: program.to_path_buf(),
            args: vec!["-i".to_string(), step_ref(job_id, step_id), "-r".to_string()],
        }
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn render(&self) -> String {
        let mut words = vec![shell_quote(&self.program.to_string_lossy())];
        words.extend(self.args.iter().map(|arg| shell_quote(arg)));
        words.join(" ")
    }

    fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args).stdin(Stdio::null()).process_group(0);
        command
    }
}

fn step_ref(job_id: u32, step_id: u32) -> String {
    format!("{job_id}.{step_id}")
}

fn shell_quote(s: &str) -> String {
    let plain = |c: char| c.is_ascii_alphanumeric() || "_-./:=@%+,".contains(c);
    if s.is_empty() {
        "''".into()
    } else if s.chars().all(plain) {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', "'\\''"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    Launching,
    Running,
    Failed,
    /// The helper had already exited when its port was read.
    Reaped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelProcess {
    pub command: String,
    pub pid: u32,
    pub captured_port: Option<u16>,
    pub state: TunnelState,
}

pub trait TunnelHelper {
    fn connect(
        &self,
        request: &TunnelRequest<'_>,
        config: &PluginConfig,
    ) -> Result<TunnelProcess, LaunchError>;

    fn remove(&self, job_id: u32, step_id: u32) -> Result<(), LaunchError>;
}

/// Runs the external tunnel helper.
#[derive(Debug, Clone, Default)]
pub struct HelperLauncher {
    settings: HelperSettings,
}

impl HelperLauncher {
    pub fn new(settings: HelperSettings) -> Self {
        HelperLauncher { settings }
    }
}

impl TunnelHelper for HelperLauncher {
    fn connect(
        &self,
        request: &TunnelRequest<'_>,
        config: &PluginConfig,
    ) -> Result<TunnelProcess, LaunchError> {
        let command = TunnelCommand::connect(&self.settings.program, request, config);
        let rendered = command.render();
        tracing::info!("tunnel: executing {}", rendered);

        let mut child = command
            .to_command()
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                tracing::error!("tunnel: unable to exec '{}': {}", rendered, e);
                LaunchError::SpawnFailed(e)
            })?;

        let mut process = TunnelProcess {
            command: rendered,
            pid: child.id(),
            captured_port: None,
            state: TunnelState::Launching,
        };

        let port = child
            .stdout
            .take()
            .and_then(|stdout| read_token(stdout, self.settings.read_timeout))
            .and_then(|token| parse_forward_port(&token));
        // Reaps the helper if it already finished; a running tunnel is left alone.
        let exited = matches!(child.try_wait(), Ok(Some(_)));

        match port {
            Some(port) => {
                process.captured_port = Some(port);
                process.state = if exited {
                    TunnelState::Reaped
                } else {
                    TunnelState::Running
                };
                tracing::info!("tunnel: forward is {} on node {}", port, request.node);
                Ok(process)
            }
            None => {
                process.state = TunnelState::Failed;
                tracing::warn!(
                    "tunnel: unable to connect node {} (helper pid {}, {:?})",
                    request.node,
                    process.pid,
                    process.state
                );
                Err(LaunchError::NoPortReported)
            }
        }
    }

    fn remove(&self, job_id: u32, step_id: u32) -> Result<(), LaunchError> {
        let command = TunnelCommand::remove(&self.settings.program, job_id, step_id);
        tracing::debug!("tunnel: executing {}", command.render());

        command
            .to_command()
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                tracing::error!("tunnel: unable to exec remove cmd '{}': {}", command.render(), e);
                LaunchError::SpawnFailed(e)
            })?;
        Ok(())
    }
}

/// Launch one tunnel and return the port the helper reported.
pub fn launch<H: TunnelHelper + ?Sized>(
    helper: &H,
    node: &str,
    job_id: u32,
    step_id: u32,
    ports: &TunnelSpec,
    config: &PluginConfig,
) -> Result<u16, LaunchError> {
    let request = TunnelRequest {
        node,
        job_id,
        step_id,
        ports,
    };
    helper
        .connect(&request, config)?
        .captured_port
        .ok_or(LaunchError::NoPortReported)
}

/// Wait at most `timeout` for the first token on `reader`. The caller keeps
/// the pipe, so dropping `reader` afterwards closes it even on timeout.
fn read_token<R: Read + AsFd>(mut reader: R, timeout: Duration) -> Option<String> {
    let deadline = Instant::now() + timeout;
    let mut scanner = TokenScanner::default();
    let mut buf = [0u8; 64];

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            tracing::warn!("tunnel: no output from helper after {:?}", timeout);
            return None;
        }
        let wait_ms = remaining.as_millis().clamp(1, u128::from(u16::MAX)) as u16;

        let ready = {
            let mut fds = [PollFd::new(reader.as_fd(), PollFlags::POLLIN)];
            poll(&mut fds, PollTimeout::from(wait_ms))
        };
        match ready {
            Ok(0) | Err(Errno::EINTR) => continue,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("tunnel: poll on helper output failed: {}", e);
                return None;
            }
        }

        let n = match reader.read(&mut buf) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::warn!("tunnel: reading helper output failed: {}", e);
                break;
            }
        };
        // EOF: the helper closed stdout
        if n == 0 {
            break;
        }
        if buf[..n].iter().any(|&byte| scanner.push(byte)) {
            break;
        }
    }

    scanner.finish()
}

/// First whitespace-delimited token, capped at `MAX_TOKEN_LEN` bytes.
#[derive(Debug, Default)]
struct TokenScanner {
    token: Vec<u8>,
}

impl TokenScanner {
    /// Returns true once the token is complete.
    fn push(&mut self, byte: u8) -> bool {
        if byte.is_ascii_whitespace() {
            return !self.token.is_empty();
        }
        self.token.push(byte);
        self.token.len() == MAX_TOKEN_LEN
    }

    fn finish(self) -> Option<String> {
        if self.token.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(&self.token).into_owned())
        }
    }
}

fn parse_forward_port(token: &str) -> Option<u16> {
    match token.parse::<u16>() {
        Ok(port) if port != 0 => Some(port),
        _ => {
            tracing::warn!("tunnel: helper reported '{}', not a port", token);
            None
        }
    }
}
