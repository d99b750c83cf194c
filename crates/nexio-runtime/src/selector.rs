//! Selector driver
//!
//! Thin wrapper around the OS readiness notification primitive (epoll,
//! kqueue, IOCP via mio). Blocks up to the configured timeout and yields
//! the ready keys of the iteration. Readiness is copied out of the event
//! buffer before dispatch so connection processing can mutate worker state
//! freely.

use std::io;
use std::time::Duration;

use mio::event::Source;
use mio::{Events, Interest, Poll, Token, Waker};

/// Readiness of one selector key, copied out of the OS event
#[derive(Debug, Clone, Copy)]
pub struct Ready {
    pub token: Token,
    pub readable: bool,
    pub writable: bool,
}

/// Readiness selector owned by a single worker
pub struct Selector {
    poll: Poll,
    events: Events,
}

impl Selector {
    /// Create a new selector with the given event buffer capacity
    pub fn new(capacity: usize) -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(capacity),
        })
    }

    /// Create a waker that interrupts a blocked poll
    pub fn waker(&self, token: Token) -> io::Result<Waker> {
        Waker::new(self.poll.registry(), token)
    }

    /// Register an event source with the given token and interest
    pub fn register<S: Source>(
        &self,
        source: &mut S,
        token: Token,
        interest: Interest,
    ) -> io::Result<()> {
        self.poll.registry().register(source, token, interest)
    }

    /// Update the interest mask of a registered source
    pub fn reregister<S: Source>(
        &self,
        source: &mut S,
        token: Token,
        interest: Interest,
    ) -> io::Result<()> {
        self.poll.registry().reregister(source, token, interest)
    }

    /// Remove a source from the selector (cancels its key)
    pub fn deregister<S: Source>(&self, source: &mut S) -> io::Result<()> {
        self.poll.registry().deregister(source)
    }

    /// Block up to `timeout` and collect the ready keys into `out`
    ///
    /// `out` is cleared first. A signal interrupting the poll yields an
    /// empty set rather than an error.
    pub fn poll(&mut self, timeout: Duration, out: &mut Vec<Ready>) -> io::Result<()> {
        out.clear();
        match self.poll.poll(&mut self.events, Some(timeout)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e),
        }
        for event in self.events.iter() {
            out.push(Ready {
                token: event.token(),
                readable: event.is_readable(),
                writable: event.is_writable(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_WAKE: Token = Token(7);

    #[test]
    fn test_poll_times_out_empty() {
        let mut selector = Selector::new(64).unwrap();
        let mut ready = Vec::new();
        selector.poll(Duration::from_millis(1), &mut ready).unwrap();
        assert!(ready.is_empty());
    }

    #[test]
    fn test_waker_interrupts_poll() {
        let mut selector = Selector::new(64).unwrap();
        let waker = selector.waker(TEST_WAKE).unwrap();
        waker.wake().unwrap();

        let mut ready = Vec::new();
        selector
            .poll(Duration::from_millis(100), &mut ready)
            .unwrap();
        assert!(ready.iter().any(|r| r.token == TEST_WAKE));
    }

    #[test]
    fn test_stream_registration_roundtrip() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let selector = Selector::new(64).unwrap();
        let mut stream = mio::net::TcpStream::connect(addr).unwrap();
        selector
            .register(&mut stream, Token(1), Interest::WRITABLE)
            .unwrap();
        selector
            .reregister(&mut stream, Token(1), Interest::READABLE | Interest::WRITABLE)
            .unwrap();
        selector.deregister(&mut stream).unwrap();
    }
}
