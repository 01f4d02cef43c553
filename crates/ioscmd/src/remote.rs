//! Remote shell and file transfer over an already-open byte stream.
//!
//! The stream can be a device tunnel or a plain TCP connection; `ssh2` handles
//! key exchange, authentication and channel multiplexing on top of it.

use ioscmd_core::{ShellChannel, WindowSize};
use log::{debug, info};
use ssh2::{Channel, Session, Sftp};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};
use std::path::Path;
use thiserror::Error;

const TERM: &str = "xterm";
const DIR_MODE: i32 = 0o755;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("authentication failed for user {user}")]
    Authentication {
        user: String,
        #[source]
        source: Option<ssh2::Error>,
    },

    #[error("SSH handshake failed")]
    Handshake(#[source] ssh2::Error),

    #[error("SSH protocol error")]
    Protocol(#[from] ssh2::Error),

    #[error("I/O error")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, RemoteError>;

/// An authenticated session.
pub struct RemoteSession {
    session: Session,
    poll_fd: OwnedFd,
}

impl RemoteSession {
    /// Run the handshake over `stream` and log in with a password.
    ///
    /// The session takes ownership of the stream and closes it when dropped.
    pub fn connect<S>(stream: S, username: &str, password: &str) -> Result<Self>
    where
        S: AsFd + AsRawFd + 'static,
    {
        let poll_fd = stream.as_fd().try_clone_to_owned()?;

        let mut session = Session::new()?;
        session.set_tcp_stream(stream);
        session.handshake().map_err(RemoteError::Handshake)?;
        debug!("SSH handshake complete");

        session.userauth_password(username, password).map_err(|e| RemoteError::Authentication {
            user: username.to_string(),
            source: Some(e),
        })?;
        if !session.authenticated() {
            return Err(RemoteError::Authentication { user: username.to_string(), source: None });
        }

        info!("Authenticated as {username}");
        Ok(Self { session, poll_fd })
    }

    /// Interactive shell on a pseudo-terminal of the given size.
    pub fn open_shell(&self, size: WindowSize) -> Result<ShellSession> {
        let mut channel = self.session.channel_session()?;
        channel.request_pty(TERM, None, Some((size.cols.into(), size.rows.into(), 0, 0)))?;
        channel.shell()?;

        Ok(ShellSession {
            session: self.session.clone(),
            channel,
            poll_fd: self.poll_fd.try_clone()?,
        })
    }

    pub fn open_files(&self) -> Result<FileChannel> {
        Ok(FileChannel { sftp: self.session.sftp()? })
    }

    /// Run `command`, copying each stdout line to `out`. Returns the remote
    /// exit status.
    pub fn exec<W: Write>(&self, command: &str, out: &mut W) -> Result<i32> {
        debug!("Running remote command: {command}");
        let mut channel = self.session.channel_session()?;
        channel.exec(command)?;

        let mut reader = BufReader::new(&mut channel);
        let mut line = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                break;
            }
            writeln!(out, "{}", line.trim_end())?;
        }
        out.flush()?;

        channel.wait_close()?;
        Ok(channel.exit_status()?)
    }
}

/// A shell channel the interactive relay can drive.
pub struct ShellSession {
    session: Session,
    channel: Channel,
    poll_fd: OwnedFd,
}

impl ShellSession {
    pub fn close(&mut self) -> Result<()> {
        self.channel.close()?;
        Ok(())
    }
}

impl ShellChannel for ShellSession {
    fn poll_fd(&self) -> BorrowedFd<'_> {
        self.poll_fd.as_fd()
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.session.set_blocking(false);
        let result = self.channel.read(buf);
        self.session.set_blocking(true);
        result
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.channel.write_all(data)?;
        self.channel.flush()
    }

    fn resize(&mut self, size: WindowSize) -> io::Result<()> {
        self.channel
            .request_pty_size(size.cols.into(), size.rows.into(), None, None)
            .map_err(io::Error::from)
    }
}

impl Drop for ShellSession {
    fn drop(&mut self) {
        let _ = self.channel.close();
    }
}

pub struct FileChannel {
    sftp: Sftp,
}

impl FileChannel {
    pub fn put(&self, local: &Path, remote: &Path) -> Result<u64> {
        let mut source = File::open(local)?;
        let mut target = self.sftp.create(remote)?;
        Ok(io::copy(&mut source, &mut target)?)
    }

    pub fn get(&self, remote: &Path, local: &Path) -> Result<u64> {
        let mut source = self.sftp.open(remote)?;
        let mut target = File::create(local)?;
        Ok(io::copy(&mut source, &mut target)?)
    }

    pub fn mkdir(&self, path: &Path) -> Result<()> {
        self.sftp.mkdir(path, DIR_MODE)?;
        Ok(())
    }
}
