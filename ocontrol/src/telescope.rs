//! Telescope (ISS) proxy

use log::info;
use olib::AckClient;
use olibmsg::{IssCommand, OError, OResult, Request, RequestId};

/// Telescope motions needed by the instrument
pub trait TelescopeControl: Send + Sync {
    /// Offset the focal plane, in arcseconds, from the nominal pointing
    fn offset_focal_plane(&self, id: &RequestId, x_arcsec: f64, y_arcsec: f64, rotation_deg: f64) -> OResult<()>;
}

/// Forwards telescope commands to the ISS server
pub struct IssClient {
    client: AckClient,
}

impl IssClient {
    pub fn new(client: AckClient) -> Self {
        Self { client }
    }
}

impl TelescopeControl for IssClient {
    fn offset_focal_plane(&self, id: &RequestId, x_arcsec: f64, y_arcsec: f64, rotation_deg: f64) -> OResult<()> {
        info!(
            "Offsetting focal plane to ({:.3}, {:.3}) arcsec, rotation {:.2} deg",
            x_arcsec, y_arcsec, rotation_deg
        );
        let request = Request::new(
            id.clone(),
            IssCommand::OffsetFocalPlane {
                x_arcsec,
                y_arcsec,
                rotation_deg,
            },
        );
        // Telescope failures surface as reduction errors
        let done = self
            .client
            .send(&request)
            .map_err(|e| OError::reduction(format!("{}: {}", self.client.name(), e)))?;
        done.into_result()
            .map(|_| ())
            .map_err(|e| OError::reduction(format!("{} offset failed: {}", self.client.name(), e)))
    }
}
