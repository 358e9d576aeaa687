//! In-process link answered by a responder function.
//!
//! Every CR/LF terminated command written to the link is handed to the
//! responder, and whatever text it returns is queued for the reader. Extra
//! lines (unsolicited codes) can be pushed at any time through a
//! [`LineInjector`]. Backs the modem simulator and the channel tests.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::link::{LinkHalves, ModemLink};

type Responder = dyn FnMut(&str) -> String + Send;

/// Bytes travelling from the fake modem to the reader.
#[derive(Default)]
struct Pipe {
    buf: Mutex<PipeState>,
    ready: Condvar,
}

#[derive(Default)]
struct PipeState {
    bytes: VecDeque<u8>,
    closed: bool,
}

impl Pipe {
    fn state(&self) -> MutexGuard<'_, PipeState> {
        self.buf.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, text: &str) {
        let mut state = self.state();
        state.bytes.extend(text.as_bytes());
        self.ready.notify_all();
    }

    fn close(&self) {
        self.state().closed = true;
        self.ready.notify_all();
    }
}

/// Loopback link whose remote end is a closure.
pub struct LoopbackLink {
    responder: Arc<Mutex<Box<Responder>>>,
    current: Arc<Mutex<Option<Arc<Pipe>>>>,
    read_poll: Duration,
    name: String,
}

impl LoopbackLink {
    pub fn new<F>(name: &str, responder: F) -> Self
    where
        F: FnMut(&str) -> String + Send + 'static,
    {
        Self {
            responder: Arc::new(Mutex::new(Box::new(responder))),
            current: Arc::new(Mutex::new(None)),
            read_poll: Duration::from_millis(20),
            name: name.to_string(),
        }
    }

    /// Handle for pushing unsolicited lines into whichever stream is open.
    pub fn injector(&self) -> LineInjector {
        LineInjector {
            current: Arc::clone(&self.current),
        }
    }
}

impl ModemLink for LoopbackLink {
    fn open(&self) -> io::Result<LinkHalves> {
        let pipe = Arc::new(Pipe::default());
        let previous = self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(Arc::clone(&pipe));
        if let Some(old) = previous {
            old.close();
        }

        Ok(LinkHalves {
            reader: Box::new(PipeReader {
                pipe: Arc::clone(&pipe),
                poll: self.read_poll,
            }),
            writer: Box::new(ResponderWriter {
                pending: Vec::new(),
                responder: Arc::clone(&self.responder),
                pipe,
            }),
        })
    }

    fn describe(&self) -> String {
        format!("loopback:{}", self.name)
    }
}

/// Pushes lines to the currently open loopback stream.
#[derive(Clone)]
pub struct LineInjector {
    current: Arc<Mutex<Option<Arc<Pipe>>>>,
}

impl LineInjector {
    /// Queue `line` followed by CRLF. Returns false when no stream is open.
    pub fn push_line(&self, line: &str) -> bool {
        let current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        match current.as_ref() {
            Some(pipe) => {
                pipe.push(&format!("\r\n{line}\r\n"));
                true
            }
            None => false,
        }
    }

    /// End the open stream; the reader sees EOF.
    pub fn hang_up(&self) {
        if let Some(pipe) = self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            pipe.close();
        }
    }
}

struct PipeReader {
    pipe: Arc<Pipe>,
    poll: Duration,
}

impl Read for PipeReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let mut state = self.pipe.state();
        if state.bytes.is_empty() && !state.closed {
            state = self
                .pipe
                .ready
                .wait_timeout(state, self.poll)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        if state.bytes.is_empty() {
            return if state.closed {
                Ok(0)
            } else {
                Err(io::Error::new(io::ErrorKind::TimedOut, "no data"))
            };
        }
        let n = out.len().min(state.bytes.len());
        for (slot, byte) in out.iter_mut().zip(state.bytes.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

struct ResponderWriter {
    pending: Vec<u8>,
    responder: Arc<Mutex<Box<Responder>>>,
    pipe: Arc<Pipe>,
}

impl Write for ResponderWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.pipe.state().closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "link closed"));
        }
        self.pending.extend_from_slice(data);
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\r' || *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let command = String::from_utf8_lossy(&line).trim().to_string();
            if command.is_empty() {
                continue;
            }
            let reply = {
                let mut responder = self.responder.lock().unwrap_or_else(PoisonError::into_inner);
                responder(&command)
            };
            if !reply.is_empty() {
                self.pipe.push(&reply);
            }
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
