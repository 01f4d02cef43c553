//! Bridge a local terminal to a remote shell channel.

use anyhow::{Context, Result};
use log::{debug, warn};
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, BorrowedFd};

use crate::poll::wait_readable;
use crate::terminal::{Terminal, WindowSize};

/// Bytes read from the channel per read call.
pub const CHANNEL_CHUNK: usize = 1024;

/// The remote end of an interactive session.
pub trait ShellChannel {
    /// Descriptor that turns readable when the channel may have data.
    fn poll_fd(&self) -> BorrowedFd<'_>;

    /// Non-blocking read. `WouldBlock` means nothing is pending, `Ok(0)` means
    /// the remote side closed.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    fn resize(&mut self, size: WindowSize) -> io::Result<()>;
}

struct RawMode<'t, F: AsFd> {
    terminal: &'t mut Terminal<F>,
}

impl<'t, F: AsFd> RawMode<'t, F> {
    fn enter(terminal: &'t mut Terminal<F>) -> Result<Self> {
        terminal.enter_raw_mode()?;
        Ok(Self { terminal })
    }

    fn restore(self) -> Result<()> {
        self.terminal.leave_raw_mode()
    }
}

impl<F: AsFd> Drop for RawMode<'_, F> {
    fn drop(&mut self) {
        if let Err(e) = self.terminal.leave_raw_mode() {
            warn!("{e:#}");
        }
    }
}

/// Run an interactive session until the remote side closes.
///
/// The terminal is put in raw mode for the duration and its previous
/// attributes are restored on every exit path.
pub fn run_session<C, F, W>(channel: &mut C, terminal: &mut Terminal<F>, output: &mut W) -> Result<()>
where
    C: ShellChannel,
    F: AsFd,
    W: Write,
{
    let raw = RawMode::enter(terminal)?;
    let result = relay(channel, &*raw.terminal, output);
    let restored = raw.restore();
    result.and(restored)
}

fn relay<C, F, W>(channel: &mut C, terminal: &Terminal<F>, output: &mut W) -> Result<()>
where
    C: ShellChannel,
    F: AsFd,
    W: Write,
{
    let mut input = File::from(
        terminal.fd().as_fd().try_clone_to_owned().context("Failed to duplicate terminal descriptor")?,
    );
    let mut input_open = true;
    let mut last_size: Option<WindowSize> = None;
    let mut buf = [0u8; CHANNEL_CHUNK];

    loop {
        propagate_size(channel, terminal, &mut last_size);

        // The channel may hold data its transport already pulled off the
        // socket, which leaves the descriptor quiet. Drain before every wait.
        if drain_channel(channel, output, &mut buf)? {
            debug!("Remote side closed the channel");
            return Ok(());
        }

        let [_, input_ready] =
            wait_readable([Some(channel.poll_fd()), input_open.then(|| input.as_fd())])
                .context("Failed waiting for terminal or channel")?;

        if input_ready {
            let mut byte = [0u8; 1];
            match input.read(&mut byte) {
                Ok(0) => {
                    debug!("Terminal input closed");
                    input_open = false;
                }
                Ok(_) => channel.write_all(&byte).context("Failed to write to channel")?,
                Err(e) if matches!(e.kind(), io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock) => {}
                Err(e) => return Err(e).context("Failed to read terminal input"),
            }
        }
    }
}

/// Copy everything the channel has ready to `output`. True once the remote
/// side has closed.
fn drain_channel<C: ShellChannel, W: Write>(channel: &mut C, output: &mut W, buf: &mut [u8]) -> Result<bool> {
    loop {
        match channel.read(buf) {
            Ok(0) => return Ok(true),
            Ok(n) => {
                output.write_all(&buf[..n]).context("Failed to write terminal output")?;
                output.flush().context("Failed to flush terminal output")?;
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e).context("Failed to read from channel"),
        }
    }
}

/// Best effort: size lookups and resize failures are logged and ignored.
fn propagate_size<C: ShellChannel, F: AsFd>(
    channel: &mut C,
    terminal: &Terminal<F>,
    last_size: &mut Option<WindowSize>,
) {
    let size = match terminal.size() {
        Ok(size) => size,
        Err(e) => {
            debug!("{e:#}");
            return;
        }
    };

    // Sent once up front, then only when the size changes.
    if *last_size == Some(size) {
        return;
    }

    match channel.resize(size) {
        Ok(()) => *last_size = Some(size),
        Err(e) => warn!("Failed to resize remote terminal to {}x{}: {e}", size.cols, size.rows),
    }
}

#[cfg(test)]
#[path = "interactive_tests.rs"]
mod tests;
