//! Line IPC over pipes.
//!
//! Both sides of the worker channel speak newline-delimited JSON; these types
//! handle the framing, EINTR retries and decoding.

use nix::fcntl::{FcntlArg, OFlag, fcntl};
use serde::de::DeserializeOwned;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::os::unix::io::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};

/// Read buffer size for IPC. Protocol messages are small.
const BUFFER_SIZE: usize = 8 * 1024;

/// A pipe end that implements Read/Write with EINTR handling.
pub struct PipeFd {
    fd: OwnedFd,
}

impl PipeFd {
    pub fn new(fd: OwnedFd) -> Self {
        Self { fd }
    }

    /// Wrap a raw file descriptor, taking ownership of it.
    ///
    /// # Safety
    /// `fd` must be open and not owned by anything else.
    pub unsafe fn from_raw(fd: RawFd) -> Self {
        Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        }
    }

    /// Make writes fail with `WouldBlock` instead of waiting on a full pipe.
    pub fn set_nonblocking(&self) -> io::Result<()> {
        let flags = fcntl(&self.fd, FcntlArg::F_GETFL).map_err(io::Error::from)?;
        let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
        fcntl(&self.fd, FcntlArg::F_SETFL(flags)).map_err(io::Error::from)?;
        Ok(())
    }
}

impl From<OwnedFd> for PipeFd {
    fn from(fd: OwnedFd) -> Self {
        Self::new(fd)
    }
}

impl AsFd for PipeFd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl AsRawFd for PipeFd {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl Read for PipeFd {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match nix::unistd::read(&self.fd, buf) {
                Ok(n) => return Ok(n),
                Err(nix::errno::Errno::EINTR) => continue,
                Err(e) => return Err(io::Error::from_raw_os_error(e as i32)),
            }
        }
    }
}

impl Write for PipeFd {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        loop {
            match nix::unistd::write(&self.fd, buf) {
                Ok(n) => return Ok(n),
                Err(nix::errno::Errno::EINTR) => continue,
                Err(e) => return Err(io::Error::from_raw_os_error(e as i32)),
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Outcome of reading one message from a channel.
#[derive(Debug)]
pub enum Received<T> {
    /// A well-formed message.
    Message(T),
    /// A line that did not parse; carries the raw text for logging.
    Malformed(String),
    /// The other side closed the pipe.
    Closed,
}

/// Buffered line reader for IPC.
pub struct LineReader {
    reader: BufReader<PipeFd>,
    line_buffer: String,
}

impl LineReader {
    pub fn new(fd: PipeFd) -> Self {
        Self {
            reader: BufReader::with_capacity(BUFFER_SIZE, fd),
            line_buffer: String::with_capacity(256),
        }
    }

    /// Read a line without its terminator. Returns `None` on EOF.
    pub fn read_line(&mut self) -> io::Result<Option<&str>> {
        self.line_buffer.clear();
        if self.reader.read_line(&mut self.line_buffer)? == 0 {
            return Ok(None);
        }
        let trimmed = self.line_buffer.trim_end_matches(['\n', '\r']).len();
        self.line_buffer.truncate(trimmed);
        Ok(Some(&self.line_buffer))
    }

    /// Read and decode the next non-empty line.
    pub fn recv<T: DeserializeOwned>(&mut self) -> io::Result<Received<T>> {
        loop {
            let Some(line) = self.read_line()? else {
                return Ok(Received::Closed);
            };
            if line.trim().is_empty() {
                continue;
            }
            return Ok(match serde_json::from_str(line.trim()) {
                Ok(message) => Received::Message(message),
                Err(_) => Received::Malformed(line.to_string()),
            });
        }
    }
}

/// Line writer for IPC.
///
/// Each line goes out in a single `write(2)`. Lines shorter than `PIPE_BUF`
/// are atomic on a pipe, so on a non-blocking pipe a full buffer rejects the
/// whole line with `WouldBlock` and nothing is left half-written.
pub struct LineWriter {
    fd: PipeFd,
    buffer: Vec<u8>,
}

impl LineWriter {
    pub fn new(fd: PipeFd) -> Self {
        Self {
            fd,
            buffer: Vec::with_capacity(256),
        }
    }

    /// Write a line, appending a newline if not present.
    pub fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.buffer.clear();
        self.buffer.extend_from_slice(line.as_bytes());
        if !line.ends_with('\n') {
            self.buffer.push(b'\n');
        }
        self.fd.write_all(&self.buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::protocol::{ControlMessage, WorkerMessage};

    fn create_pipe() -> (PipeFd, PipeFd) {
        let (read_fd, write_fd) = nix::unistd::pipe().expect("Failed to create pipe");
        (PipeFd::from(read_fd), PipeFd::from(write_fd))
    }

    #[test]
    fn test_line_framing() {
        let (read_fd, write_fd) = create_pipe();
        let mut reader = LineReader::new(read_fd);
        let mut writer = LineWriter::new(write_fd);

        writer.write_line("hello").unwrap();
        writer.write_line("world\n").unwrap();
        writer.write_line("crlf\r\n").unwrap();
        drop(writer);

        assert_eq!(reader.read_line().unwrap(), Some("hello"));
        assert_eq!(reader.read_line().unwrap(), Some("world"));
        assert_eq!(reader.read_line().unwrap(), Some("crlf"));
        assert_eq!(reader.read_line().unwrap(), None);
    }

    #[test]
    fn test_write_and_recv_messages() {
        let (read_fd, write_fd) = create_pipe();
        let mut reader = LineReader::new(read_fd);
        let mut writer = LineWriter::new(write_fd);

        writer.write_line(&ControlMessage::Ping { nonce: 9 }.to_line()).unwrap();
        writer.write_line(&ControlMessage::Shutdown.to_line()).unwrap();
        drop(writer);

        match reader.recv::<ControlMessage>().unwrap() {
            Received::Message(msg) => assert_eq!(msg, ControlMessage::Ping { nonce: 9 }),
            other => panic!("Expected ping, got {:?}", other),
        }
        match reader.recv::<ControlMessage>().unwrap() {
            Received::Message(msg) => assert_eq!(msg, ControlMessage::Shutdown),
            other => panic!("Expected shutdown, got {:?}", other),
        }
        assert!(matches!(
            reader.recv::<ControlMessage>().unwrap(),
            Received::Closed
        ));
    }

    #[test]
    fn test_recv_skips_blank_lines_and_reports_garbage() {
        let (read_fd, write_fd) = create_pipe();
        let mut reader = LineReader::new(read_fd);
        let mut writer = LineWriter::new(write_fd);

        writer.write_line("").unwrap();
        writer.write_line("starting up...").unwrap();
        writer.write_line(r#"{"type":"ready"}"#).unwrap();
        drop(writer);

        match reader.recv::<WorkerMessage>().unwrap() {
            Received::Malformed(raw) => assert_eq!(raw, "starting up..."),
            other => panic!("Expected malformed line, got {:?}", other),
        }
        assert!(matches!(
            reader.recv::<WorkerMessage>().unwrap(),
            Received::Message(WorkerMessage::Ready)
        ));
    }

    #[test]
    fn test_nonblocking_writer_rejects_lines_when_pipe_is_full() {
        let (read_fd, write_fd) = create_pipe();
        write_fd.set_nonblocking().unwrap();
        let mut writer = LineWriter::new(write_fd);
        let line = ControlMessage::Ping { nonce: u64::MAX }.to_line();

        // Nobody reads, so the pipe fills up and the writer must not block.
        let mut written = 0usize;
        let err = loop {
            match writer.write_line(&line) {
                Ok(()) => written += 1,
                Err(e) => break e,
            }
            assert!(written < 1_000_000, "pipe never filled");
        };
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
        assert!(written > 0);

        // Only whole lines made it into the pipe.
        drop(writer);
        let mut reader = LineReader::new(read_fd);
        let mut read = 0usize;
        while let Some(got) = reader.read_line().unwrap() {
            assert_eq!(got, line);
            read += 1;
        }
        assert_eq!(read, written);
    }
}
