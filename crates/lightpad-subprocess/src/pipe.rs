//! Anonymous pipes and the owned handle type used for every child stream

use std::fs::File;
use std::io::{self, Read, Write};
use std::process::Stdio;
use std::thread;

use tracing::debug;

use crate::error::{Result, SubprocessError};

#[cfg(unix)]
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
#[cfg(windows)]
use std::os::windows::io::{AsHandle, AsRawHandle, BorrowedHandle, OwnedHandle, RawHandle};

/// Owned OS handle for one pipe end or file
///
/// Dropping the value closes the handle exactly once.
#[derive(Debug)]
pub struct PipeHandle {
    file: File,
    #[cfg(windows)]
    inheritable: std::cell::Cell<bool>,
}

impl PipeHandle {
    /// Wrap an already open file
    pub fn from_file(file: File) -> Self {
        Self {
            file,
            #[cfg(windows)]
            inheritable: std::cell::Cell::new(false),
        }
    }

    /// Unwrap into a [`File`] for use with other APIs
    pub fn into_file(self) -> File {
        self.file
    }

    /// Duplicate the handle; both values own an independent OS handle
    pub fn try_clone(&self) -> Result<Self> {
        let file = self
            .file
            .try_clone()
            .map_err(|e| SubprocessError::os("duplicate handle", e))?;
        Ok(Self::from_file(file))
    }

    pub(crate) fn into_stdio(self) -> Stdio {
        Stdio::from(self.file)
    }
}

impl Read for PipeHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Write for PipeHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl From<File> for PipeHandle {
    fn from(file: File) -> Self {
        Self::from_file(file)
    }
}

#[cfg(unix)]
impl From<OwnedFd> for PipeHandle {
    fn from(fd: OwnedFd) -> Self {
        Self::from_file(File::from(fd))
    }
}

#[cfg(unix)]
impl AsFd for PipeHandle {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

#[cfg(unix)]
impl AsRawFd for PipeHandle {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

#[cfg(windows)]
impl From<OwnedHandle> for PipeHandle {
    fn from(handle: OwnedHandle) -> Self {
        Self::from_file(File::from(handle))
    }
}

#[cfg(windows)]
impl AsHandle for PipeHandle {
    fn as_handle(&self) -> BorrowedHandle<'_> {
        self.file.as_handle()
    }
}

#[cfg(windows)]
impl AsRawHandle for PipeHandle {
    fn as_raw_handle(&self) -> RawHandle {
        self.file.as_raw_handle()
    }
}

/// Connected read/write pair
///
/// Each end is closed at most once: closing an end that was already closed
/// or handed off is a no-op, and a pair with both ends gone does nothing
/// on drop.
#[derive(Debug, Default)]
pub struct PipePair {
    read: Option<PipeHandle>,
    write: Option<PipeHandle>,
}

impl PipePair {
    /// Allocate a new pipe
    ///
    /// With `inheritable == false` neither end leaks into children spawned
    /// by other threads; the process builder still hands the child its end
    /// through the stdio slots.
    pub fn create(inheritable: bool) -> Result<Self> {
        let (read, write) = os_pipe(inheritable)?;
        Ok(Self {
            read: Some(read),
            write: Some(write),
        })
    }

    /// Read end, if still owned
    pub fn read_end(&self) -> Option<&PipeHandle> {
        self.read.as_ref()
    }

    /// Write end, if still owned
    pub fn write_end(&self) -> Option<&PipeHandle> {
        self.write.as_ref()
    }

    /// Hand off the read end
    pub fn take_read(&mut self) -> Option<PipeHandle> {
        self.read.take()
    }

    /// Hand off the write end
    pub fn take_write(&mut self) -> Option<PipeHandle> {
        self.write.take()
    }

    pub fn close_read(&mut self) {
        self.read = None;
    }

    pub fn close_write(&mut self) {
        self.write = None;
    }

    pub fn close(&mut self) {
        self.close_read();
        self.close_write();
    }

    /// Give up ownership of both ends without closing them
    ///
    /// Returns `(read, write)`; the pair is inert afterwards.
    pub fn disown(&mut self) -> (Option<PipeHandle>, Option<PipeHandle>) {
        (self.read.take(), self.write.take())
    }

    /// `true` while at least one end is still owned
    pub fn is_open(&self) -> bool {
        self.read.is_some() || self.write.is_some()
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn os_pipe(inheritable: bool) -> Result<(PipeHandle, PipeHandle)> {
    use nix::fcntl::OFlag;

    let flags = if inheritable {
        OFlag::empty()
    } else {
        OFlag::O_CLOEXEC
    };
    let (read, write) =
        nix::unistd::pipe2(flags).map_err(|errno| SubprocessError::os("pipe", errno.into()))?;
    Ok((PipeHandle::from(read), PipeHandle::from(write)))
}

#[cfg(all(unix, not(any(target_os = "linux", target_os = "android"))))]
fn os_pipe(inheritable: bool) -> Result<(PipeHandle, PipeHandle)> {
    let (read, write) =
        nix::unistd::pipe().map_err(|errno| SubprocessError::os("pipe", errno.into()))?;
    let (read, write) = (PipeHandle::from(read), PipeHandle::from(write));
    if !inheritable {
        set_inheritable(&read, false)?;
        set_inheritable(&write, false)?;
    }
    Ok((read, write))
}

#[cfg(windows)]
fn os_pipe(inheritable: bool) -> Result<(PipeHandle, PipeHandle)> {
    let (read, write) = io::pipe().map_err(|e| SubprocessError::os("pipe", e))?;
    let read = PipeHandle::from(OwnedHandle::from(read));
    let write = PipeHandle::from(OwnedHandle::from(write));
    read.inheritable.set(inheritable);
    write.inheritable.set(inheritable);
    Ok((read, write))
}

/// Control whether `handle` survives into children spawned after this call
#[cfg(unix)]
pub fn set_inheritable(handle: &PipeHandle, inheritable: bool) -> Result<()> {
    use nix::fcntl::{fcntl, FcntlArg, FdFlag};

    let fd = handle.as_raw_fd();
    let bits = fcntl(fd, FcntlArg::F_GETFD)
        .map_err(|errno| SubprocessError::os("fcntl(F_GETFD)", errno.into()))?;
    let mut flags = FdFlag::from_bits_truncate(bits);
    flags.set(FdFlag::FD_CLOEXEC, !inheritable);
    fcntl(fd, FcntlArg::F_SETFD(flags))
        .map_err(|errno| SubprocessError::os("fcntl(F_SETFD)", errno.into()))?;
    Ok(())
}

/// Control whether `handle` survives into children spawned after this call
///
/// Create-process hosts decide inheritance when the child is created: the
/// standard stream slots are duplicated with inheritance at spawn time, so
/// only the requested state is recorded here.
#[cfg(windows)]
pub fn set_inheritable(handle: &PipeHandle, inheritable: bool) -> Result<()> {
    handle.inheritable.set(inheritable);
    Ok(())
}

/// Whether `handle` will be inherited by children
#[cfg(unix)]
pub fn is_inheritable(handle: &PipeHandle) -> Result<bool> {
    use nix::fcntl::{fcntl, FcntlArg, FdFlag};

    let bits = fcntl(handle.as_raw_fd(), FcntlArg::F_GETFD)
        .map_err(|errno| SubprocessError::os("fcntl(F_GETFD)", errno.into()))?;
    Ok(!FdFlag::from_bits_truncate(bits).contains(FdFlag::FD_CLOEXEC))
}

/// Whether `handle` will be inherited by children
#[cfg(windows)]
pub fn is_inheritable(handle: &PipeHandle) -> Result<bool> {
    Ok(handle.inheritable.get())
}

/// Blocking read of up to `buf.len()` bytes; `Ok(0)` means end-of-stream
pub fn read(handle: &mut PipeHandle, buf: &mut [u8]) -> Result<usize> {
    loop {
        match handle.read(buf) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            other => return other.map_err(|e| SubprocessError::os("pipe read", e)),
        }
    }
}

/// Blocking write of some prefix of `data`
pub fn write(handle: &mut PipeHandle, data: &[u8]) -> Result<usize> {
    loop {
        match handle.write(data) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            other => return other.map_err(|e| SubprocessError::os("pipe write", e)),
        }
    }
}

/// Write all of `data`
pub fn write_all(handle: &mut PipeHandle, data: &[u8]) -> Result<()> {
    handle
        .write_all(data)
        .map_err(|e| SubprocessError::os("pipe write", e))
}

/// Read until end-of-stream
pub fn read_all(handle: &mut PipeHandle) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    handle
        .read_to_end(&mut data)
        .map_err(|e| SubprocessError::os("pipe read", e))?;
    Ok(data)
}

/// Drain `handle` on a background thread and close it at end-of-stream
///
/// The writer on the other side never blocks on a full buffer.
pub fn ignore_and_close(mut handle: PipeHandle) {
    let spawned = thread::Builder::new()
        .name("pipe-drain".into())
        .spawn(move || {
            if let Err(e) = io::copy(&mut handle, &mut io::sink()) {
                debug!(error = %e, "Drained pipe ended with an error");
            }
        });
    if let Err(e) = spawned {
        // The handle moved into the failed closure and is already closed.
        debug!(error = %e, "Could not start drain thread, pipe closed instead");
    }
}

/// Which of the parent's standard streams to duplicate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ParentStream {
    Stdout,
    Stderr,
}

/// Duplicate one of the parent's own output streams
pub(crate) fn duplicate_parent(stream: ParentStream) -> Result<PipeHandle> {
    #[cfg(unix)]
    let owned = match stream {
        ParentStream::Stdout => io::stdout().as_fd().try_clone_to_owned(),
        ParentStream::Stderr => io::stderr().as_fd().try_clone_to_owned(),
    };
    #[cfg(windows)]
    let owned = match stream {
        ParentStream::Stdout => io::stdout().as_handle().try_clone_to_owned(),
        ParentStream::Stderr => io::stderr().as_handle().try_clone_to_owned(),
    };
    owned
        .map(PipeHandle::from)
        .map_err(|e| SubprocessError::os("duplicate parent stream", e))
}
