//! Command dispatcher for the O instrument server
//!
//! Accepts one request per TCP connection, runs its handler and writes the
//! ACK and DONE replies back on the same connection. At most one primary
//! command runs at a time; INTERRUPT, PAUSE, RESUME and GET_STATUS bypass
//! that rule.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, error, info, warn};
use olibmsg::{read_request, Command, DoneReply, OResult, Reply, Request};

use crate::config::constants::{ACCEPT_POLL, REQUEST_READ_TIMEOUT};
use crate::handlers::{handler_for, HandlerContext, Services};
use crate::keepalive::{KeepAlive, ReplySink, StreamSink};

/// Run one request to completion and build its DONE
pub fn process_request(services: &Services, request: &Request<Command>, sink: Arc<dyn ReplySink>) -> DoneReply {
    let id = &request.id;
    let cmd_type = request.command.cmd_type();
    let handler = handler_for(cmd_type);
    info!("{} {} received", id, cmd_type.name());

    let result = if cmd_type.is_exempt() {
        let ctx = HandlerContext {
            id,
            services,
            cancel: Default::default(),
            keep_alive: None,
        };
        handler.handle(&request.command, &ctx)
    } else {
        match services.slot.try_claim(cmd_type) {
            Err(e) => Err(e),
            Ok(guard) => {
                services.status.set_current_command(Some(cmd_type));
                let keep_alive = KeepAlive::start(
                    id.clone(),
                    sink,
                    services.config.timing.keep_alive(),
                    handler.estimate(&request.command, &services.config),
                );
                let ctx = HandlerContext {
                    id,
                    services,
                    cancel: guard.token(),
                    keep_alive: Some(&keep_alive),
                };
                let result = handler.handle(&request.command, &ctx);
                keep_alive.stop();
                services.status.set_current_command(None);
                result
            }
        }
    };

    match result {
        Ok(payload) => {
            info!("{} {} done", id, cmd_type.name());
            DoneReply::success(id.clone(), payload)
        }
        Err(e) => {
            warn!("{} {} failed: {}", id, cmd_type.name(), e);
            DoneReply::failure(id.clone(), &e)
        }
    }
}

fn serve_connection(services: &Services, mut stream: TcpStream, peer: SocketAddr) -> OResult<()> {
    stream.set_nonblocking(false)?;
    stream.set_nodelay(true)?;
    stream.set_read_timeout(Some(REQUEST_READ_TIMEOUT))?;
    let request: Request<Command> = read_request(&mut stream)?;
    stream.set_read_timeout(None)?;
    debug!("Request {} from {}", request.id, peer);

    let sink: Arc<dyn ReplySink> = Arc::new(StreamSink::new(stream));
    let done = process_request(services, &request, sink.clone());
    sink.send(&Reply::Done(done))
}

/// The instrument server's accept loop
pub struct CommandDispatcher {
    listener: TcpListener,
    services: Arc<Services>,
}

impl CommandDispatcher {
    /// Bind the configured server address
    pub fn new(services: Arc<Services>) -> OResult<Self> {
        let address = services.config.server.socket_address();
        let listener = TcpListener::bind(&address)?;
        listener.set_nonblocking(true)?;
        Ok(Self { listener, services })
    }

    pub fn local_addr(&self) -> OResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    /// Serve connections until the server is stopped
    pub fn run(&self) -> OResult<()> {
        info!("O server listening on {}", self.local_addr()?);
        let mut workers: Vec<JoinHandle<()>> = Vec::new();

        while self.services.shutdown.is_running() {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    let services = self.services.clone();
                    workers.push(thread::spawn(move || {
                        if let Err(e) = serve_connection(&services, stream, peer) {
                            error!("Connection from {}: {}", peer, e);
                        }
                    }));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
                Err(e) => return Err(e.into()),
            }
            workers.retain(|worker| !worker.is_finished());
        }

        if let Some(cmd_type) = self.services.slot.cancel_current() {
            info!("Shutting down during {}", cmd_type.name());
        }
        for worker in workers {
            let _ = worker.join();
        }
        info!("O server stopped");
        Ok(())
    }

    pub fn stop(&self) {
        self.services.shutdown.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::tests::TestRig;
    use olib::OClient;
    use olibmsg::{CommandType, OError, RebootLevel};
    use std::time::Duration;
    use tempfile::tempdir;

    fn serve(services: Services) -> (Arc<CommandDispatcher>, JoinHandle<OResult<()>>, OClient) {
        let dispatcher = Arc::new(CommandDispatcher::new(Arc::new(services)).unwrap());
        let client = OClient::new(dispatcher.local_addr().unwrap().to_string());
        let runner = dispatcher.clone();
        let handle = thread::spawn(move || runner.run());
        (dispatcher, handle, client)
    }

    fn wait_for_command(services: &Services) {
        for _ in 0..200 {
            if services.status.current_command().is_some() {
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("command never started");
    }

    #[test]
    fn test_bias_over_tcp() {
        let dir = tempdir().unwrap();
        let rig = TestRig::new(dir.path(), vec![]);
        let (dispatcher, handle, client) = serve(rig.services);

        let exchange = client.call(Command::Bias).unwrap();
        assert!(!exchange.acks.is_empty());
        assert!(exchange.done.successful);
        assert_eq!(exchange.done.id, exchange.acks[0].id);
        assert_eq!(rig.ccd.bias_count(), 1);

        dispatcher.stop();
        handle.join().unwrap().unwrap();
    }

    #[test]
    fn test_busy_while_primary_in_flight() {
        let dir = tempdir().unwrap();
        let rig = TestRig::new(dir.path(), vec![]);
        let (dispatcher, handle, client) = serve(rig.services);

        let guard = dispatcher.services().slot.try_claim(CommandType::Acquire).unwrap();
        match client.bias() {
            Err(OError::Remote { code, .. }) => assert_eq!(code, 106),
            other => panic!("unexpected result {:?}", other),
        }
        // Exempt commands still run
        assert!(client.get_status().is_ok());
        drop(guard);
        assert!(client.bias().is_ok());

        dispatcher.stop();
        handle.join().unwrap().unwrap();
    }

    #[test]
    fn test_interrupt_aborts_exposure() {
        let dir = tempdir().unwrap();
        let rig = TestRig::new(dir.path(), vec![]);
        let (dispatcher, handle, client) = serve(rig.services);
        let client = Arc::new(client);

        let exposing = client.clone();
        let dark = thread::spawn(move || exposing.dark(60_000));
        wait_for_command(dispatcher.services());

        let status = client.get_status().unwrap();
        assert_eq!(status.current_command.as_deref(), Some("DARK"));
        client.interrupt().unwrap();

        match dark.join().unwrap() {
            Err(OError::Remote { code, .. }) => assert_eq!(code, 500),
            other => panic!("unexpected result {:?}", other),
        }
        assert_eq!(client.get_status().unwrap().current_command, None);

        dispatcher.stop();
        handle.join().unwrap().unwrap();
    }

    #[test]
    fn test_software_reboot_stops_server() {
        let dir = tempdir().unwrap();
        let rig = TestRig::new(dir.path(), vec![]);
        let (dispatcher, handle, client) = serve(rig.services);

        client.reboot(RebootLevel::Software).unwrap();
        handle.join().unwrap().unwrap();
        assert_eq!(dispatcher.services().shutdown.exit_code(), 2);
    }
}
