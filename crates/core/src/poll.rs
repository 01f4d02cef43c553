use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use std::io;
use std::os::fd::BorrowedFd;

/// Block until at least one of the given descriptors is readable.
///
/// `None` slots are skipped. Hang-up and error conditions count as readable
/// so the following read reports them.
pub(crate) fn wait_readable<const N: usize>(fds: [Option<BorrowedFd<'_>>; N]) -> io::Result<[bool; N]> {
    let mut poll_fds: Vec<PollFd<'_>> =
        fds.iter().flatten().map(|fd| PollFd::new(*fd, PollFlags::POLLIN)).collect();

    if poll_fds.is_empty() {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "nothing to wait on"));
    }

    loop {
        match poll(&mut poll_fds, PollTimeout::NONE) {
            Ok(_) => break,
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(e.into()),
        }
    }

    let wake = PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR;
    let mut polled = poll_fds.iter();
    let mut ready = [false; N];
    for (slot, fd) in ready.iter_mut().zip(fds.iter()) {
        if fd.is_some() {
            *slot = polled
                .next()
                .and_then(PollFd::revents)
                .is_some_and(|revents| revents.intersects(wake));
        }
    }

    Ok(ready)
}
