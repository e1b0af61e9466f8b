//! SSH command execution against provisioned guests

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use ssh2::{Channel, Session};
use tracing::{debug, info, warn};

use crate::errors::PlatformError;
use crate::remote::CommandRunner;

const SSH_PORT: u16 = 22;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// A host SSH traffic is routed through to reach the guest network
#[derive(Debug, Clone)]
pub struct JumpHost {
    pub host: String,
    pub user: String,
    pub password: String,
}

/// Connection parameters for a guest
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Login user on the guest
    pub user: String,

    /// Private key authenticating the guest login
    pub private_key_path: PathBuf,

    /// Optional jump host
    pub jump_host: Option<JumpHost>,

    /// Connection attempts before giving up
    pub max_attempts: u32,

    /// Pause between connection attempts
    pub retry_delay: Duration,
}

impl ConnectOptions {
    pub fn new(user: impl Into<String>, private_key_path: impl Into<PathBuf>) -> Self {
        Self {
            user: user.into(),
            private_key_path: private_key_path.into(),
            jump_host: None,
            max_attempts: 30,
            retry_delay: Duration::from_secs(10),
        }
    }
}

/// ssh2-backed command runner.
///
/// ssh2 is synchronous, so all session work runs on the blocking pool.
/// Host keys are accepted on first use; freshly provisioned guests have
/// no prior identity to verify against.
pub struct SshExecutor;

#[async_trait]
impl CommandRunner for SshExecutor {
    async fn connect_and_run(
        &self,
        address: &str,
        commands: &[String],
        options: &ConnectOptions,
    ) -> Result<(), PlatformError> {
        let address = address.to_string();
        let commands = commands.to_vec();
        let options = options.clone();

        tokio::task::spawn_blocking(move || run_blocking(&address, &commands, &options))
            .await
            .map_err(|e| PlatformError::Internal(format!("ssh task panicked: {}", e)))?
    }
}

fn run_blocking(
    address: &str,
    commands: &[String],
    options: &ConnectOptions,
) -> Result<(), PlatformError> {
    let (session, _bridge) = connect_with_retry(address, options)?;

    for (index, command) in commands.iter().enumerate() {
        info!(
            "executing command {}/{} on {}: {:.100}",
            index + 1,
            commands.len(),
            address,
            command
        );

        let mut channel = session.channel_session()?;
        channel.request_pty("xterm", None, None)?;
        channel.exec(command)?;

        let mut stdout = String::new();
        channel.read_to_string(&mut stdout)?;
        let mut stderr = String::new();
        channel.stderr().read_to_string(&mut stderr)?;

        channel.wait_close()?;
        let exit_code = channel.exit_status()?;

        if exit_code != 0 {
            return Err(PlatformError::CommandFailed {
                index,
                exit_code,
                stderr,
            });
        }
        debug!("command {} output: {:.200}", index + 1, stdout);
    }

    Ok(())
}

/// Guests take time to boot sshd, so connection attempts are retried on
/// a fixed delay before the whole deployment is failed.
fn connect_with_retry(
    address: &str,
    options: &ConnectOptions,
) -> Result<(Session, Option<thread::JoinHandle<()>>), PlatformError> {
    let mut last_error = String::new();

    for attempt in 1..=options.max_attempts {
        match connect_once(address, options) {
            Ok(connected) => {
                info!(
                    "SSH connection established to {} (attempt {})",
                    address, attempt
                );
                return Ok(connected);
            }
            Err(err) => {
                warn!(
                    "SSH connection attempt {}/{} to {} failed: {}",
                    attempt, options.max_attempts, address, err
                );
                last_error = err.to_string();
            }
        }
        if attempt < options.max_attempts {
            thread::sleep(options.retry_delay);
        }
    }

    Err(PlatformError::ConnectionFailed(format!(
        "{} after {} attempts: {}",
        address, options.max_attempts, last_error
    )))
}

fn connect_once(
    address: &str,
    options: &ConnectOptions,
) -> Result<(Session, Option<thread::JoinHandle<()>>), PlatformError> {
    let (stream, bridge) = match &options.jump_host {
        Some(jump) => {
            let (stream, handle) = open_jump_bridge(jump, address)?;
            (stream, Some(handle))
        }
        None => (tcp_connect(address)?, None),
    };

    let mut session = Session::new()?;
    session.set_tcp_stream(stream);
    session.handshake()?;
    session.userauth_pubkey_file(&options.user, None, &options.private_key_path, None)?;

    if !session.authenticated() {
        return Err(PlatformError::ConnectionFailed(format!(
            "key authentication rejected for {}@{}",
            options.user, address
        )));
    }

    Ok((session, bridge))
}

fn tcp_connect(host: &str) -> Result<TcpStream, PlatformError> {
    let addr = resolve(host)?;
    Ok(TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)?)
}

fn resolve(host: &str) -> Result<SocketAddr, PlatformError> {
    (host, SSH_PORT)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| PlatformError::ConnectionFailed(format!("could not resolve {}", host)))
}

/// Open a direct-tcpip channel through the jump host and expose it as a
/// plain TCP stream on the loopback interface.
///
/// ssh2 sessions only speak to real sockets, so the channel cannot be
/// handed to the target session directly; a local listener with a byte
/// pump in between stands in for it.
fn open_jump_bridge(
    jump: &JumpHost,
    target: &str,
) -> Result<(TcpStream, thread::JoinHandle<()>), PlatformError> {
    info!("connecting to {} via jump host {}", target, jump.host);

    let stream = tcp_connect(&jump.host)?;
    let mut session = Session::new()?;
    session.set_tcp_stream(stream);
    session.handshake()?;
    session.userauth_password(&jump.user, &jump.password)?;

    if !session.authenticated() {
        return Err(PlatformError::ConnectionFailed(format!(
            "password authentication rejected for {}@{}",
            jump.user, jump.host
        )));
    }

    let channel = session.channel_direct_tcpip(target, SSH_PORT, None)?;

    let listener = TcpListener::bind("127.0.0.1:0")?;
    let port = listener.local_addr()?.port();

    let handle = thread::spawn(move || {
        if let Ok((local, _)) = listener.accept() {
            pump(session, channel, local);
        }
    });

    let local = TcpStream::connect(("127.0.0.1", port))?;
    Ok((local, handle))
}

/// Shuttle bytes between the jump channel and the local socket until
/// either side closes.
fn pump(session: Session, mut channel: Channel, mut local: TcpStream) {
    session.set_blocking(false);
    if local.set_nonblocking(true).is_err() {
        return;
    }

    let mut buf = [0u8; 16384];
    loop {
        let mut moved = false;

        match local.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if write_all_channel(&mut channel, &buf[..n]).is_err() {
                    break;
                }
                moved = true;
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(_) => break,
        }

        match channel.read(&mut buf) {
            Ok(0) => {
                if channel.eof() {
                    break;
                }
            }
            Ok(n) => {
                if local.write_all(&buf[..n]).is_err() {
                    break;
                }
                moved = true;
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(_) => break,
        }

        if !moved {
            thread::sleep(Duration::from_millis(5));
        }
    }
}

/// write_all against a non-blocking channel, spinning on WouldBlock
fn write_all_channel(channel: &mut Channel, mut data: &[u8]) -> std::io::Result<()> {
    while !data.is_empty() {
        match channel.write(data) {
            Ok(0) => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    "channel closed",
                ))
            }
            Ok(n) => data = &data[n..],
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(2));
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
