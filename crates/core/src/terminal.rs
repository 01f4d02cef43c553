use anyhow::{Context, Result};
use std::os::fd::{AsFd, AsRawFd};
use termios::{tcsetattr, Termios, TCSAFLUSH, TCSANOW};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSize {
    pub rows: u16,
    pub cols: u16,
}

/// Raw mode and size queries for a terminal descriptor.
///
/// The attributes seen on entering raw mode are kept and put back exactly once,
/// by `leave_raw_mode` or on drop.
pub struct Terminal<F: AsFd> {
    fd: F,
    original_termios: Option<Termios>,
}

impl<F: AsFd> Terminal<F> {
    pub fn new(fd: F) -> Self {
        Self { fd, original_termios: None }
    }

    pub fn fd(&self) -> &F {
        &self.fd
    }

    pub fn is_raw(&self) -> bool {
        self.original_termios.is_some()
    }

    pub fn attributes(&self) -> Result<Termios> {
        Termios::from_fd(self.fd.as_fd().as_raw_fd()).context("Failed to get terminal attributes")
    }

    pub fn size(&self) -> Result<WindowSize> {
        use nix::libc::{ioctl, winsize, TIOCGWINSZ};

        let mut size = winsize { ws_row: 0, ws_col: 0, ws_xpixel: 0, ws_ypixel: 0 };

        // SAFETY: TIOCGWINSZ writes a `winsize` into the pointer we pass.
        let rc = unsafe { ioctl(self.fd.as_fd().as_raw_fd(), TIOCGWINSZ, &mut size as *mut winsize) };
        if rc == -1 {
            return Err(std::io::Error::last_os_error()).context("Failed to get terminal size");
        }

        Ok(WindowSize { rows: size.ws_row, cols: size.ws_col })
    }

    pub fn enter_raw_mode(&mut self) -> Result<()> {
        use termios::*;

        if self.original_termios.is_some() {
            return Ok(());
        }

        let original = self.attributes()?;
        let mut raw = original;

        // Input modes
        raw.c_iflag &= !(IGNBRK | BRKINT | PARMRK | ISTRIP | INLCR | IGNCR | ICRNL | IXON);
        // Output modes
        raw.c_oflag &= !OPOST;
        // Control modes
        raw.c_cflag &= !(CSIZE | PARENB);
        raw.c_cflag |= CS8;
        // Local modes
        raw.c_lflag &= !(ECHO | ECHONL | ICANON | ISIG | IEXTEN);
        // Control characters
        raw.c_cc[VMIN] = 1;
        raw.c_cc[VTIME] = 0;

        tcsetattr(self.fd.as_fd().as_raw_fd(), TCSANOW, &raw)
            .context("Failed to set terminal to raw mode")?;
        self.original_termios = Some(original);

        Ok(())
    }

    pub fn leave_raw_mode(&mut self) -> Result<()> {
        if let Some(termios) = self.original_termios.take() {
            tcsetattr(self.fd.as_fd().as_raw_fd(), TCSAFLUSH, &termios)
                .context("Failed to restore terminal mode")?;
        }
        Ok(())
    }
}

impl<F: AsFd> Drop for Terminal<F> {
    fn drop(&mut self) {
        let _ = self.leave_raw_mode();
    }
}

#[cfg(test)]
#[path = "terminal_tests.rs"]
mod tests;
