//! Data reduction pipeline proxy

use std::sync::Arc;

use log::{debug, info};
use olib::AckClient;
use olibmsg::{
    CalibrationResult, DonePayload, DpRtCommand, OError, OResult, ReductionResult, Request, RequestId,
};

use crate::wcs::TanWcsLookup;

/// Reduction of raw frames
pub trait ReductionPipeline: Send + Sync {
    /// Reduce a science or acquisition frame, optionally fitting a WCS
    fn expose_reduce(&self, id: &RequestId, filename: &str, wcs_fit: bool) -> OResult<ReductionResult>;

    /// Reduce a bias or dark frame
    fn calibrate_reduce(&self, id: &RequestId, filename: &str) -> OResult<CalibrationResult>;
}

/// Forwards reductions to the DpRt server
pub struct DpRtClient {
    client: AckClient,
    wcs: Arc<TanWcsLookup>,
}

impl DpRtClient {
    /// WCS solutions returned by the pipeline are registered in `wcs`
    pub fn new(client: AckClient, wcs: Arc<TanWcsLookup>) -> Self {
        Self { client, wcs }
    }

    fn reduce(&self, id: &RequestId, command: DpRtCommand) -> OResult<DonePayload> {
        let request = Request::new(id.clone(), command);
        let done = self
            .client
            .send(&request)
            .map_err(|e| OError::reduction(format!("{}: {}", self.client.name(), e)))?;
        done.into_result()
            .map_err(|e| OError::reduction(format!("{}: {}", self.client.name(), e)))
    }
}

impl ReductionPipeline for DpRtClient {
    fn expose_reduce(&self, id: &RequestId, filename: &str, wcs_fit: bool) -> OResult<ReductionResult> {
        debug!("Reducing {} (WCS fit {})", filename, wcs_fit);
        let payload = self.reduce(
            id,
            DpRtCommand::ExposeReduce {
                filename: filename.to_string(),
                wcs_fit,
            },
        )?;
        let result = match payload {
            DonePayload::Reduction(result) => result,
            other => {
                return Err(OError::reduction(format!(
                    "Unexpected expose-reduce reply {:?}",
                    other
                )))
            }
        };
        if wcs_fit {
            match result.wcs {
                Some(solution) => self.wcs.register(&result.reduced_filename, solution),
                None => {
                    return Err(OError::reduction(format!(
                        "No WCS fit returned for {}",
                        filename
                    )))
                }
            }
        }
        info!(
            "Reduced {} -> {} (seeing {:.2}, counts {:.1})",
            filename, result.reduced_filename, result.seeing, result.counts
        );
        Ok(result)
    }

    fn calibrate_reduce(&self, id: &RequestId, filename: &str) -> OResult<CalibrationResult> {
        debug!("Calibrate-reducing {}", filename);
        match self.reduce(
            id,
            DpRtCommand::CalibrateReduce {
                filename: filename.to_string(),
            },
        )? {
            DonePayload::Calibration(result) => Ok(result),
            other => Err(OError::reduction(format!(
                "Unexpected calibrate-reduce reply {:?}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use olibmsg::{read_request, write_reply, DoneReply, Reply, WcsSolution};
    use std::net::TcpListener;
    use std::thread;
    use std::time::Duration;

    use crate::wcs::WcsLookup;

    /// One-shot DpRt answering the first request with `payload`
    fn dprt(payload: DonePayload, successful: bool) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let request: Request<DpRtCommand> = read_request(&mut stream).unwrap();
            let done = if successful {
                DoneReply::success(request.id, payload)
            } else {
                DoneReply::failure(request.id, &OError::reduction("no stars"))
            };
            write_reply(&mut stream, &Reply::Done(done)).unwrap();
        });
        address
    }

    fn client(address: String) -> (DpRtClient, Arc<TanWcsLookup>) {
        let wcs = Arc::new(TanWcsLookup::new());
        let ack = AckClient::new("DpRt", address).with_timeouts(
            Duration::from_secs(1),
            Duration::from_secs(2),
            Duration::from_secs(1),
        );
        (DpRtClient::new(ack, wcs.clone()), wcs)
    }

    fn reduction(wcs: Option<WcsSolution>) -> ReductionResult {
        ReductionResult {
            reduced_filename: "h_q_1_1_1_1.fits".to_string(),
            brightest_pixel: (100.0, 120.0),
            seeing: 1.2,
            counts: 5000.0,
            photometricity: 1.0,
            sky_brightness: 20.0,
            saturation: false,
            wcs,
        }
    }

    #[test]
    fn test_expose_reduce_registers_wcs() {
        // Star at the reference point, CRPIX 1-based
        let solution = WcsSolution {
            crval: [10.0, 20.0],
            crpix: [101.0, 121.0],
            cd: [[-1e-4, 0.0], [0.0, 1e-4]],
        };
        let (pipeline, wcs) = client(dprt(DonePayload::Reduction(reduction(Some(solution))), true));
        let result = pipeline
            .expose_reduce(&RequestId::new("o-1-reduce-1"), "h_q_1_1_1_0.fits", true)
            .unwrap();
        assert_eq!(result.brightest_pixel, (100.0, 120.0));
        let (x, y) = wcs.pixel_for_sky(&result.reduced_filename, 10.0, 20.0).unwrap();
        assert!((x - result.brightest_pixel.0).abs() < 1e-9);
        assert!((y - result.brightest_pixel.1).abs() < 1e-9);
    }

    #[test]
    fn test_failed_reduction_is_reduction_error() {
        let (pipeline, _) = client(dprt(DonePayload::Empty, false));
        let result = pipeline.expose_reduce(&RequestId::new("o-2"), "f.fits", false);
        assert!(matches!(result, Err(OError::Reduction(_))));
    }

    #[test]
    fn test_missing_wcs_fit_is_reduction_error() {
        let (pipeline, _) = client(dprt(DonePayload::Reduction(reduction(None)), true));
        let result = pipeline.expose_reduce(&RequestId::new("o-3"), "f.fits", true);
        assert!(matches!(result, Err(OError::Reduction(_))));
    }

    #[test]
    fn test_calibrate_reduce() {
        let calibration = CalibrationResult {
            reduced_filename: "h_b_1_1_1_1.fits".to_string(),
            mean_counts: 1000.0,
            peak_counts: 1200.0,
        };
        let (pipeline, _) = client(dprt(DonePayload::Calibration(calibration.clone()), true));
        let result = pipeline.calibrate_reduce(&RequestId::new("o-4"), "h_b_1_1_1_0.fits").unwrap();
        assert_eq!(result, calibration);
    }

    #[test]
    fn test_unreachable_pipeline() {
        let (pipeline, _) = client("127.0.0.1:1".to_string());
        let result = pipeline.calibrate_reduce(&RequestId::new("o-5"), "f.fits");
        assert!(matches!(result, Err(OError::Reduction(_))));
    }
}
