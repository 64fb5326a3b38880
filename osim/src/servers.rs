//! Acknowledgement protocol server used by the simulated systems

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};
use olibmsg::{
    read_request, write_reply, AckReply, DonePayload, DoneReply, OResult, Reply, Request,
};
use serde::de::DeserializeOwned;

/// One simulated system answering sub-commands of type `C`
pub trait SimHandler<C>: Send + Sync {
    fn name(&self) -> &str;

    /// Time the command takes, announced in the ACK
    fn duration(&self, command: &C) -> Duration;

    fn handle(&self, command: &C) -> OResult<DonePayload>;
}

/// Serve one connection: request, ACK, simulated work, DONE
fn serve_connection<C, H>(handler: &H, mut stream: TcpStream, peer: SocketAddr) -> OResult<()>
where
    C: DeserializeOwned + std::fmt::Debug,
    H: SimHandler<C> + ?Sized,
{
    stream.set_nonblocking(false)?;
    let request: Request<C> = read_request(&mut stream)?;
    debug!("{} <- {} {:?} from {}", handler.name(), request.id, request.command, peer);

    let duration = handler.duration(&request.command);
    write_reply(&mut stream, &Reply::Ack(AckReply::new(request.id.clone(), duration)))?;
    thread::sleep(duration);

    let done = match handler.handle(&request.command) {
        Ok(payload) => DoneReply::success(request.id, payload),
        Err(e) => {
            warn!("{} {} failed: {}", handler.name(), request.id, e);
            DoneReply::failure(request.id, &e)
        }
    };
    write_reply(&mut stream, &Reply::Done(done))
}

/// Bind `address` and serve `handler` until `running` clears
pub fn run_server<C, H>(address: &str, handler: Arc<H>, running: Arc<AtomicBool>) -> OResult<()>
where
    C: DeserializeOwned + std::fmt::Debug + 'static,
    H: SimHandler<C> + 'static,
{
    let listener = TcpListener::bind(address)?;
    serve(listener, handler, running)
}

/// Serve `handler` on an already bound listener
pub fn serve<C, H>(listener: TcpListener, handler: Arc<H>, running: Arc<AtomicBool>) -> OResult<()>
where
    C: DeserializeOwned + std::fmt::Debug + 'static,
    H: SimHandler<C> + 'static,
{
    listener.set_nonblocking(true)?;
    info!("{} listening on {}", handler.name(), listener.local_addr()?);

    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                let handler = handler.clone();
                thread::spawn(move || {
                    if let Err(e) = serve_connection::<C, H>(&handler, stream, peer) {
                        warn!("{} connection from {}: {}", handler.name(), peer, e);
                    }
                });
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(100));
            }
            Err(e) => {
                warn!("{} accept error: {}", handler.name(), e);
                thread::sleep(Duration::from_millis(100));
            }
        }
    }

    info!("{} stopped", handler.name());
    Ok(())
}
