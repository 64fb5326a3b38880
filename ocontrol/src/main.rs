//! O instrument server entry point
//!
//! Loads the configuration, connects the hardware proxies and the external
//! system clients, then serves commands until stopped or rebooted.

use std::env;
use std::process;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use log::{error, info, warn};
use ocontrol_lib::cancel::CommandSlot;
use ocontrol_lib::config::{constants::FILTER_SLIDE_TIMEOUT, load_config, OConfig};
use ocontrol_lib::filter_slide::TcpFilterSlide;
use ocontrol_lib::fits::FitsFilename;
use ocontrol_lib::hardware::{CcdController, FilterSlide};
use ocontrol_lib::pipeline::DpRtClient;
use ocontrol_lib::simulated::SimulatedCcd;
use ocontrol_lib::status::Status;
use ocontrol_lib::telescope::IssClient;
use ocontrol_lib::wcs::TanWcsLookup;
use ocontrol_lib::{CommandDispatcher, Services, Shutdown};
use olib::AckClient;
use olibmsg::OResult;

fn build_services(config: OConfig, running: Arc<AtomicBool>) -> OResult<Services> {
    warn!("No CCD driver linked, using the simulated controller");
    let ccd = Arc::new(SimulatedCcd::new(config.readout_time(), true));
    ccd.setup_dimensions(&config.detector.default_setup)?;

    let slides: Option<Arc<dyn FilterSlide>> = config.filter_slide.as_ref().map(|endpoint| {
        Arc::new(TcpFilterSlide::new(
            endpoint.socket_address(),
            config.nd_slide_count,
            FILTER_SLIDE_TIMEOUT,
        )) as Arc<dyn FilterSlide>
    });

    let wcs = Arc::new(TanWcsLookup::new());
    let pipeline = DpRtClient::new(AckClient::new("DpRt", config.dprt.socket_address()), wcs.clone());
    let telescope = IssClient::new(AckClient::new("ISS", config.iss.socket_address()));
    let filenames = FitsFilename::new(&config.fits.data_dir, config.fits.instrument_code.clone());

    Ok(Services {
        config,
        status: Status::new(),
        ccd,
        slides,
        pipeline: Arc::new(pipeline),
        telescope: Arc::new(telescope),
        wcs,
        filenames,
        slot: CommandSlot::new(),
        shutdown: Shutdown::new(running),
    })
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let config_path = env::args().nth(1).unwrap_or_else(|| "o.json".to_string());
    info!("Loading configuration from {}", config_path);

    let config = match load_config(&config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("Error loading configuration: {}", e);
            process::exit(1);
        }
    };
    info!(
        "ISS at {}, DpRt at {}, data in {}",
        config.iss.socket_address(),
        config.dprt.socket_address(),
        config.fits.data_dir
    );

    let running = Arc::new(AtomicBool::new(true));
    let services = match build_services(config, running.clone()) {
        Ok(services) => Arc::new(services),
        Err(e) => {
            error!("Error starting hardware: {}", e);
            process::exit(1);
        }
    };

    let dispatcher = match CommandDispatcher::new(services.clone()) {
        Ok(dispatcher) => dispatcher,
        Err(e) => {
            error!("Error binding {}: {}", services.config.server.socket_address(), e);
            process::exit(1);
        }
    };

    let ctrlc_services = services.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received Ctrl+C, shutting down...");
        ctrlc_services.shutdown.stop();
    }) {
        warn!("Error setting Ctrl+C handler: {}", e);
    }

    if let Err(e) = dispatcher.run() {
        error!("Error in main loop: {}", e);
        process::exit(1);
    }

    let exit_code = services.shutdown.exit_code();
    info!("O server exiting with code {}", exit_code);
    process::exit(exit_code);
}
