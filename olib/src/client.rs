//! Acknowledgement protocol clients
//!
//! `AckClient` forwards one sub-command at a time to an ISS or DpRt server and
//! waits for its DONE, extending the wait each time an ACK arrives.
//! `OClient` is the matching high-level client for the instrument itself.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use log::{debug, warn};
use olibmsg::{
    AckReply, AcquireCommand, Command, DarkCommand, DonePayload, DoneReply, ExposeCommand,
    MultBiasCommand, MultDarkCommand, OError, OResult, RebootCommand, RebootLevel, Reply, Request,
    RequestId, SetupCommand, StatusReport,
};
use serde::Serialize;
use crate::connection::{Connection, TcpConnection};

/// All replies received for one request
#[derive(Debug, Clone)]
pub struct Exchange {
    pub acks: Vec<AckReply>,
    pub done: DoneReply,
}

/// Send `request` and collect replies until its DONE arrives.
///
/// The first reply must arrive within `initial_timeout`. After each ACK the
/// wait becomes the ACK's time to complete plus `margin`.
pub fn exchange<C, K: Connection<C> + ?Sized>(
    connection: &mut K,
    request: &Request<C>,
    initial_timeout: Duration,
    margin: Duration,
) -> OResult<Exchange> {
    connection.send(request)?;

    let mut acks = Vec::new();
    let mut timeout = initial_timeout;
    loop {
        match connection.receive_timeout(timeout)? {
            Reply::Ack(ack) => {
                if ack.id != request.id {
                    warn!("Ignoring ACK for {} while waiting for {}", ack.id, request.id);
                    continue;
                }
                debug!("ACK for {}: {} ms to complete", ack.id, ack.time_to_complete_ms);
                timeout = ack.time_to_complete() + margin;
                acks.push(ack);
            }
            Reply::Done(done) => {
                if done.id != request.id {
                    return Err(OError::protocol(format!(
                        "DONE for {} while waiting for {}",
                        done.id, request.id
                    )));
                }
                return Ok(Exchange { acks, done });
            }
        }
    }
}

/// Client forwarding sub-commands to one acknowledgement protocol server
#[derive(Debug, Clone)]
pub struct AckClient {
    name: String,
    address: String,
    connect_timeout: Duration,
    initial_timeout: Duration,
    margin: Duration,
}

impl AckClient {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            connect_timeout: Duration::from_secs(5),
            initial_timeout: Duration::from_secs(10),
            margin: Duration::from_secs(5),
        }
    }

    pub fn with_timeouts(mut self, connect: Duration, initial: Duration, margin: Duration) -> Self {
        self.connect_timeout = connect;
        self.initial_timeout = initial;
        self.margin = margin;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Send one sub-command over a fresh connection and return its DONE
    pub fn send<C: Serialize>(&self, request: &Request<C>) -> OResult<DoneReply> {
        let mut connection: TcpConnection<C> = TcpConnection::connect(&self.address, self.connect_timeout)
            .map_err(|e| OError::NoReply(format!("{} at {}: {}", self.name, self.address, e)))?;
        let result = exchange(&mut connection, request, self.initial_timeout, self.margin);
        let _ = connection.close();
        let exchange = result.map_err(|e| match e {
            OError::Timeout => OError::NoReply(self.name.clone()),
            other => other,
        })?;
        debug!(
            "{} completed {} after {} ACKs",
            self.name,
            request.id,
            exchange.acks.len()
        );
        Ok(exchange.done)
    }
}

/// High-level client for the instrument server
pub struct OClient {
    address: String,
    prefix: String,
    sequence: AtomicU32,
    connect_timeout: Duration,
    initial_timeout: Duration,
    margin: Duration,
}

impl OClient {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            prefix: "olib".to_string(),
            sequence: AtomicU32::new(1),
            connect_timeout: Duration::from_secs(5),
            initial_timeout: Duration::from_secs(30),
            margin: Duration::from_secs(10),
        }
    }

    pub fn with_timeouts(mut self, initial: Duration, margin: Duration) -> Self {
        self.initial_timeout = initial;
        self.margin = margin;
        self
    }

    /// Get the next request identifier
    fn next_id(&self) -> RequestId {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        RequestId::new(format!("{}-{}", self.prefix, seq))
    }

    /// Send a command and return every reply it produced
    pub fn call(&self, command: Command) -> OResult<Exchange> {
        let request = Request::new(self.next_id(), command);
        let mut connection: TcpConnection<Command> =
            TcpConnection::connect(&self.address, self.connect_timeout)?;
        let result = exchange(&mut connection, &request, self.initial_timeout, self.margin);
        let _ = connection.close();
        result
    }

    fn run(&self, command: Command) -> OResult<DonePayload> {
        self.call(command)?.done.into_result()
    }

    pub fn bias(&self) -> OResult<DonePayload> {
        self.run(Command::Bias)
    }

    pub fn dark(&self, exposure_length_ms: u64) -> OResult<DonePayload> {
        self.run(Command::Dark(DarkCommand { exposure_length_ms }))
    }

    pub fn mult_bias(&self, number_exposures: u32) -> OResult<DonePayload> {
        self.run(Command::MultBias(MultBiasCommand { number_exposures }))
    }

    pub fn mult_dark(&self, number_exposures: u32, exposure_length_ms: u64) -> OResult<DonePayload> {
        self.run(Command::MultDark(MultDarkCommand { number_exposures, exposure_length_ms }))
    }

    pub fn glance(&self, exposure_length_ms: u64) -> OResult<DonePayload> {
        self.run(Command::Glance(ExposeCommand { exposure_length_ms }))
    }

    pub fn save(&self, exposure_length_ms: u64) -> OResult<DonePayload> {
        self.run(Command::Save(ExposeCommand { exposure_length_ms }))
    }

    pub fn acquire(&self, command: AcquireCommand) -> OResult<DonePayload> {
        self.run(Command::Acquire(command))
    }

    pub fn setup(&self, command: SetupCommand) -> OResult<DonePayload> {
        self.run(Command::Setup(command))
    }

    pub fn reboot(&self, level: RebootLevel) -> OResult<DonePayload> {
        self.run(Command::Reboot(RebootCommand { level }))
    }

    pub fn interrupt(&self) -> OResult<DonePayload> {
        self.run(Command::Interrupt)
    }

    pub fn pause(&self) -> OResult<DonePayload> {
        self.run(Command::Pause)
    }

    pub fn resume(&self) -> OResult<DonePayload> {
        self.run(Command::Resume)
    }

    pub fn get_status(&self) -> OResult<StatusReport> {
        match self.run(Command::GetStatus)? {
            DonePayload::Status(report) => Ok(report),
            other => Err(OError::protocol(format!("Unexpected GET_STATUS payload {:?}", other))),
        }
    }
}
