//! O Instrument Simulator (osim)
//!
//! Serves the two external systems the instrument server talks to:
//!
//! | System | Default address  | Sub-commands                                |
//! |--------|------------------|---------------------------------------------|
//! | ISS    | 127.0.0.1:7383   | OffsetFocalPlane                            |
//! | DpRt   | 127.0.0.1:6880   | ExposeReduce, CalibrateReduce, Abort        |
//!
//! Usage: `osim [iss_address] [dprt_address]`

mod dprt;
mod iss;
mod servers;

use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use dprt::{SimulatedDpRt, SkyModel};
use iss::{SimulatedIss, TelescopeState};
use log::{error, info, warn};
use olibmsg::{DpRtCommand, IssCommand};

const DEFAULT_ISS_ADDRESS: &str = "127.0.0.1:7383";
const DEFAULT_DPRT_ADDRESS: &str = "127.0.0.1:6880";

const OFFSET_TIME: Duration = Duration::from_millis(500);
const REDUCE_TIME: Duration = Duration::from_secs(2);

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    info!("OSim starting up");

    let mut args = env::args().skip(1);
    let iss_address = args.next().unwrap_or_else(|| DEFAULT_ISS_ADDRESS.to_string());
    let dprt_address = args.next().unwrap_or_else(|| DEFAULT_DPRT_ADDRESS.to_string());

    let running = Arc::new(AtomicBool::new(true));
    let telescope = Arc::new(TelescopeState::new());

    let running_clone = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        running_clone.store(false, Ordering::SeqCst);
    }) {
        warn!("Error setting Ctrl+C handler: {}", e);
    }

    let mut handles = Vec::new();

    let iss = Arc::new(SimulatedIss::new(telescope.clone(), OFFSET_TIME));
    let r = running.clone();
    handles.push(thread::spawn(move || {
        if let Err(e) = servers::run_server::<IssCommand, _>(&iss_address, iss, r.clone()) {
            error!("ISS server error: {}", e);
            r.store(false, Ordering::SeqCst);
        }
    }));

    let dprt = Arc::new(SimulatedDpRt::new(telescope, SkyModel::default(), REDUCE_TIME));
    let r = running.clone();
    handles.push(thread::spawn(move || {
        if let Err(e) = servers::run_server::<DpRtCommand, _>(&dprt_address, dprt, r.clone()) {
            error!("DpRt server error: {}", e);
            r.store(false, Ordering::SeqCst);
        }
    }));

    for handle in handles {
        let _ = handle.join();
    }

    info!("OSim shutdown complete");
}
