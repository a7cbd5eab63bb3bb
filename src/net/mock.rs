use std::cell::Cell;
use std::io::{self, Read, Write};
use std::rc::Rc;
use std::time::Duration;

use crate::net::conn::Connection;

/// In-memory stream that serves a canned reply and records what was written.
#[derive(Debug)]
pub(crate) struct ScriptedStream {
    input: Vec<u8>,
    pos: usize,
    fragment: usize,
    read_calls: usize,
    interrupt_next: bool,
    pub written: Vec<u8>,
    /// Number of bytes written at the moment of the first read.
    pub written_before_first_read: Option<usize>,
    pub timeout: Cell<Option<Duration>>,
    pub keepalive: Cell<bool>,
    pub closed: Rc<Cell<bool>>,
}

impl ScriptedStream {
    pub fn new(input: &[u8]) -> Self {
        ScriptedStream {
            input: input.to_vec(),
            pos: 0,
            fragment: usize::MAX,
            read_calls: 0,
            interrupt_next: false,
            written: Vec::new(),
            written_before_first_read: None,
            timeout: Cell::new(None),
            keepalive: Cell::new(false),
            closed: Rc::new(Cell::new(false)),
        }
    }

    /// Deliver at most `n` bytes per read call.
    pub fn fragment(mut self, n: usize) -> Self {
        self.fragment = n;
        self
    }

    pub fn interrupt_first(mut self) -> Self {
        self.interrupt_next = true;
        self
    }

    pub fn read_calls(&self) -> usize {
        self.read_calls
    }

    pub fn remaining(&self) -> usize {
        self.input.len() - self.pos
    }
}

impl Read for ScriptedStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.written_before_first_read.is_none() {
            self.written_before_first_read = Some(self.written.len());
        }
        if self.interrupt_next {
            self.interrupt_next = false;
            return Err(io::Error::new(io::ErrorKind::Interrupted, "interrupted"));
        }
        self.read_calls += 1;
        let n = buf.len().min(self.fragment).min(self.remaining());
        buf[..n].copy_from_slice(&self.input[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

impl Write for ScriptedStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Connection for ScriptedStream {
    fn set_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.timeout.set(timeout);
        Ok(())
    }

    fn set_keepalive(&self) -> io::Result<()> {
        self.keepalive.set(true);
        Ok(())
    }

    fn close(&self) {
        self.closed.set(true);
    }
}
