//! # Transport
//!
//! One connection carries one framed message. The [`Client`] connects, sends
//! and closes. The [`Server`] accepts indefinitely and runs every read event
//! of a connection through that connection's [`Pipeline`] of
//! [`ConnectionHandler`]s, synchronously, before reading again.
//!
//! A single read event is assumed to hold a whole message; messages split or
//! coalesced by the network are not reassembled.
use crate::error::Result;
use crate::Error;
use bytes::{Bytes, BytesMut};
use std::fmt;
use std::net::SocketAddr;

mod client;
mod handlers;
mod server;

pub use client::{Client, CLIENT_SPAN_NAME, CLIENT_TRACER_NAME, GREETING};
pub use handlers::{
    LogPayload, LoggingHandler, MessageProcessor, TracingHandler, SERVER_SPAN_NAME,
    SERVER_TRACER_NAME,
};
pub use server::Server;

/// Per-connection state visible to handlers.
#[derive(Debug)]
pub struct Connection {
    peer: SocketAddr,
    outbound: BytesMut,
}

impl Connection {
    /// Create the state for a connection with `peer`.
    pub fn new(peer: SocketAddr) -> Self {
        Connection {
            peer,
            outbound: BytesMut::new(),
        }
    }

    /// Remote address.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Queue bytes to send back once the current read event is handled.
    pub fn write(&mut self, data: &[u8]) {
        self.outbound.extend_from_slice(data);
    }

    /// Take everything queued by [`Connection::write`].
    pub fn take_outbound(&mut self) -> Option<Bytes> {
        if self.outbound.is_empty() {
            None
        } else {
            Some(self.outbound.split().freeze())
        }
    }
}

/// Reacts to the events of one connection.
pub trait ConnectionHandler: Send {
    /// Bytes from one read event. An error closes the connection.
    fn on_data(&mut self, conn: &mut Connection, data: &Bytes) -> Result<()>;

    /// The connection failed and is about to close.
    fn on_error(&mut self, conn: &Connection, err: &Error) {
        let _ = (conn, err);
    }

    /// All handlers have seen the current read event.
    fn on_complete(&mut self, conn: &mut Connection) {
        let _ = conn;
    }
}

/// Ordered list of handlers for one connection.
#[derive(Default)]
pub struct Pipeline {
    handlers: Vec<Box<dyn ConnectionHandler>>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

impl Pipeline {
    /// Create an empty pipeline.
    pub fn new() -> Self {
        Pipeline::default()
    }

    /// Append `handler`; it sees events after every handler added before it.
    pub fn add_last<H: ConnectionHandler + 'static>(mut self, handler: H) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    /// Number of handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// `true` if no handler was added.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Deliver a read event, stopping at the first handler that fails.
    pub fn fire_data(&mut self, conn: &mut Connection, data: &Bytes) -> Result<()> {
        for handler in self.handlers.iter_mut() {
            handler.on_data(conn, data)?;
        }
        Ok(())
    }

    /// Tell every handler the connection failed.
    pub fn fire_error(&mut self, conn: &Connection, err: &Error) {
        for handler in self.handlers.iter_mut() {
            handler.on_error(conn, err);
        }
    }

    /// Tell every handler the read event is done.
    pub fn fire_complete(&mut self, conn: &mut Connection) {
        for handler in self.handlers.iter_mut() {
            handler.on_complete(conn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Journal(Arc<Mutex<Vec<String>>>);

    impl Journal {
        fn entries(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    struct Recording {
        id: &'static str,
        fail: bool,
        journal: Journal,
    }

    impl ConnectionHandler for Recording {
        fn on_data(&mut self, conn: &mut Connection, data: &Bytes) -> Result<()> {
            self.journal.0.lock().unwrap().push(format!("{}:data:{}", self.id, data.len()));
            conn.write(self.id.as_bytes());
            if self.fail {
                return Err(Error::Processing(format!("{} failed", self.id)));
            }
            Ok(())
        }

        fn on_error(&mut self, _conn: &Connection, err: &Error) {
            self.journal.0.lock().unwrap().push(format!("{}:error:{err}", self.id));
        }

        fn on_complete(&mut self, _conn: &mut Connection) {
            self.journal.0.lock().unwrap().push(format!("{}:complete", self.id));
        }
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:4000".parse().unwrap()
    }

    #[test]
    fn events_reach_handlers_in_order() {
        let journal = Journal::default();
        let mut pipeline = Pipeline::new()
            .add_last(Recording { id: "a", fail: false, journal: journal.clone() })
            .add_last(Recording { id: "b", fail: false, journal: journal.clone() });
        let mut conn = Connection::new(peer());

        pipeline.fire_data(&mut conn, &Bytes::from_static(b"abc")).unwrap();
        pipeline.fire_complete(&mut conn);

        assert_eq!(journal.entries(), ["a:data:3", "b:data:3", "a:complete", "b:complete"]);
        assert_eq!(conn.take_outbound(), Some(Bytes::from_static(b"ab")));
        assert_eq!(conn.take_outbound(), None);
    }

    #[test]
    fn failing_handler_stops_delivery() {
        let journal = Journal::default();
        let mut pipeline = Pipeline::new()
            .add_last(Recording { id: "a", fail: true, journal: journal.clone() })
            .add_last(Recording { id: "b", fail: false, journal: journal.clone() });
        let mut conn = Connection::new(peer());

        let err = pipeline.fire_data(&mut conn, &Bytes::from_static(b"x")).unwrap_err();
        pipeline.fire_error(&conn, &err);

        assert_eq!(
            journal.entries(),
            [
                "a:data:1",
                "a:error:message processing failed: a failed",
                "b:error:message processing failed: a failed"
            ]
        );
        assert_eq!(pipeline.len(), 2);
    }
}
