//! Connection management for the acknowledgement protocol

use std::io;
use std::marker::PhantomData;
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;
use log::debug;
use olibmsg::{read_reply, write_request, OError, OResult, Reply, Request};
use serde::Serialize;

/// Connection to a server speaking the acknowledgement protocol
pub trait Connection<C>: Send {
    /// Send a request to the server
    fn send(&mut self, request: &Request<C>) -> OResult<()>;

    /// Receive the next reply
    fn receive(&mut self) -> OResult<Reply>;

    /// Receive the next reply, failing with `OError::Timeout` after `timeout`
    fn receive_timeout(&mut self, timeout: Duration) -> OResult<Reply>;

    /// Close the connection
    fn close(&mut self) -> OResult<()>;
}

/// TCP-based connection
pub struct TcpConnection<C> {
    stream: TcpStream,
    peer: SocketAddr,
    _command: PhantomData<fn(C)>,
}

impl<C> TcpConnection<C> {
    /// Connect to `address`, giving up after `connect_timeout`
    pub fn connect(address: &str, connect_timeout: Duration) -> OResult<Self> {
        let peer = address
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| OError::Config(format!("Address {} did not resolve", address)))?;
        let stream = TcpStream::connect_timeout(&peer, connect_timeout)?;
        stream.set_nodelay(true)?;
        debug!("Connected to {}", peer);

        Ok(Self {
            stream,
            peer,
            _command: PhantomData,
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Set the write timeout
    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> OResult<()> {
        self.stream.set_write_timeout(timeout)?;
        Ok(())
    }
}

/// Map a read timeout onto `OError::Timeout`
pub fn timeout_error(error: OError) -> OError {
    match error {
        OError::Io(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => {
            OError::Timeout
        }
        other => other,
    }
}

impl<C: Serialize> Connection<C> for TcpConnection<C> {
    fn send(&mut self, request: &Request<C>) -> OResult<()> {
        debug!("Sending request {} to {}", request.id, self.peer);
        write_request(&mut self.stream, request)
    }

    fn receive(&mut self) -> OResult<Reply> {
        self.stream.set_read_timeout(None)?;
        read_reply(&mut self.stream)
    }

    fn receive_timeout(&mut self, timeout: Duration) -> OResult<Reply> {
        // A zero duration means "no timeout" to set_read_timeout, which rejects it
        let timeout = timeout.max(Duration::from_millis(1));
        self.stream.set_read_timeout(Some(timeout))?;
        let result = read_reply(&mut self.stream).map_err(timeout_error);
        self.stream.set_read_timeout(None)?;
        result
    }

    fn close(&mut self) -> OResult<()> {
        match self.stream.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(OError::Io(e)),
        }
    }
}
