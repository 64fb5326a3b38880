//! SETUP

use std::time::Duration;

use log::info;
use olibmsg::{Command, DetectorSetup, DonePayload, OError, OResult, SetupCommand};

use super::{CommandHandler, HandlerContext};
use crate::config::constants::MAX_BINNING;
use crate::config::{DetectorConfig, OConfig};

fn check_detector(setup: &DetectorSetup, detector: &DetectorConfig) -> OResult<()> {
    for binning in [setup.bin_x, setup.bin_y] {
        if binning == 0 || binning > MAX_BINNING {
            return Err(OError::parameter(format!(
                "Binning {} outside 1..={}",
                binning, MAX_BINNING
            )));
        }
    }
    if let Some(window) = &setup.window {
        if window.x_start > window.x_end || window.y_start > window.y_end {
            return Err(OError::parameter(format!("Empty window {:?}", window)));
        }
        if window.x_end >= detector.width || window.y_end >= detector.height {
            return Err(OError::parameter(format!(
                "Window {:?} outside the {}x{} detector",
                window, detector.width, detector.height
            )));
        }
    }
    Ok(())
}

/// Detector dimensions, filter wheel and ND slides
pub struct SetupHandler;

impl SetupHandler {
    fn setup_command(command: &Command) -> OResult<&SetupCommand> {
        match command {
            Command::Setup(setup) => Ok(setup),
            other => Err(OError::protocol(format!(
                "{} is not a setup",
                other.cmd_type().name()
            ))),
        }
    }
}

impl CommandHandler for SetupHandler {
    fn estimate(&self, command: &Command, config: &OConfig) -> Duration {
        let slides = Self::setup_command(command).map(|s| s.nd_slides.len()).unwrap_or(0);
        let moves = u32::try_from(slides).unwrap_or(u32::MAX).saturating_add(1);
        config.timing.filter_move().saturating_mul(moves)
    }

    fn handle(&self, command: &Command, ctx: &HandlerContext<'_>) -> OResult<DonePayload> {
        let setup = Self::setup_command(command)?;
        let services = ctx.services;
        let config = ctx.config();

        check_detector(&setup.detector, &config.detector)?;
        let position = config.filter_position(&setup.filter)?;
        let slides = match (&services.slides, setup.nd_slides.is_empty()) {
            (_, true) => None,
            (None, false) => return Err(OError::parameter("No ND filter slides configured")),
            (Some(slides), false) => {
                if setup.nd_slides.len() > slides.slide_count() {
                    return Err(OError::parameter(format!(
                        "{} ND slide positions for {} slides",
                        setup.nd_slides.len(),
                        slides.slide_count()
                    )));
                }
                Some(slides)
            }
        };

        info!(
            "SETUP {}: binning {}x{}, filter {} (position {})",
            setup.name, setup.detector.bin_x, setup.detector.bin_y, setup.filter, position
        );
        services.ccd.setup_dimensions(&setup.detector)?;
        ctx.cancel.check()?;

        ctx.acknowledge(self.estimate(command, config));
        services.ccd.filter_wheel_move(position)?;
        ctx.cancel.check()?;

        if let Some(slides) = slides {
            for (slide, slide_position) in setup.nd_slides.iter().enumerate() {
                ctx.acknowledge(config.timing.filter_move());
                slides.move_slide(slide, *slide_position)?;
                ctx.cancel.check()?;
            }
        }

        let config_id = services.status.apply_config(&setup.name, setup.detector, &setup.filter);
        Ok(DonePayload::Setup { config_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::tests::TestRig;
    use crate::hardware::FilterSlide;
    use olibmsg::{SlidePosition, Window};
    use std::sync::{Arc, Mutex};
    use tempfile::tempdir;

    #[derive(Default)]
    struct RecordingSlides {
        moves: Mutex<Vec<(usize, SlidePosition)>>,
    }

    impl FilterSlide for RecordingSlides {
        fn slide_count(&self) -> usize {
            2
        }

        fn move_slide(&self, slide: usize, position: SlidePosition) -> OResult<()> {
            self.moves.lock().unwrap().push((slide, position));
            Ok(())
        }

        fn slide_position(&self, slide: usize) -> OResult<SlidePosition> {
            self.moves
                .lock()
                .unwrap()
                .iter()
                .rev()
                .find(|(s, _)| *s == slide)
                .map(|(_, p)| *p)
                .ok_or_else(|| OError::NoReply("slides".to_string()))
        }
    }

    fn setup(detector: DetectorSetup, filter: &str, nd_slides: Vec<SlidePosition>) -> Command {
        Command::Setup(SetupCommand {
            name: "science-r".to_string(),
            detector,
            filter: filter.to_string(),
            nd_slides,
        })
    }

    fn binned(bin: u32) -> DetectorSetup {
        DetectorSetup {
            bin_x: bin,
            bin_y: bin,
            window: None,
        }
    }

    #[test]
    fn test_setup_applies_config() {
        let dir = tempdir().unwrap();
        let rig = TestRig::new(dir.path(), vec![]);

        let payload = rig.run(&setup(binned(2), "SDSS-R", vec![])).unwrap();
        assert_eq!(payload, DonePayload::Setup { config_id: 1 });
        assert_eq!(rig.ccd.setup(), binned(2));
        assert_eq!(rig.ccd.filter_position(), Some(3));

        let payload = rig.run(&setup(binned(1), "clear", vec![])).unwrap();
        assert_eq!(payload, DonePayload::Setup { config_id: 2 });

        let status = rig.services.status.report();
        assert_eq!(status.config_name.as_deref(), Some("science-r"));
        assert_eq!(status.filter.as_deref(), Some("clear"));
    }

    #[test]
    fn test_setup_moves_nd_slides() {
        let dir = tempdir().unwrap();
        let mut rig = TestRig::new(dir.path(), vec![]);
        let slides = Arc::new(RecordingSlides::default());
        rig.services.slides = Some(slides.clone());

        rig.run(&setup(binned(1), "SDSS-G", vec![SlidePosition::In, SlidePosition::Out]))
            .unwrap();
        assert_eq!(
            *slides.moves.lock().unwrap(),
            vec![(0, SlidePosition::In), (1, SlidePosition::Out)]
        );

        let too_many = setup(binned(1), "SDSS-G", vec![SlidePosition::In; 3]);
        assert!(matches!(rig.run(&too_many), Err(OError::Parameter(_))));
    }

    #[test]
    fn test_nd_slides_without_controller() {
        let dir = tempdir().unwrap();
        let rig = TestRig::new(dir.path(), vec![]);
        let result = rig.run(&setup(binned(1), "SDSS-G", vec![SlidePosition::In]));
        assert!(matches!(result, Err(OError::Parameter(_))));
        assert_eq!(rig.ccd.filter_position(), None);
    }

    #[test]
    fn test_invalid_setups_rejected() {
        let dir = tempdir().unwrap();
        let rig = TestRig::new(dir.path(), vec![]);

        assert!(matches!(rig.run(&setup(binned(0), "clear", vec![])), Err(OError::Parameter(_))));
        assert!(matches!(rig.run(&setup(binned(5), "clear", vec![])), Err(OError::Parameter(_))));
        assert!(matches!(rig.run(&setup(binned(1), "H-alpha", vec![])), Err(OError::Parameter(_))));

        let outside = DetectorSetup {
            bin_x: 1,
            bin_y: 1,
            window: Some(Window {
                x_start: 100,
                y_start: 100,
                x_end: 4096,
                y_end: 200,
            }),
        };
        assert!(matches!(rig.run(&setup(outside, "clear", vec![])), Err(OError::Parameter(_))));
        assert_eq!(rig.services.status.config_id(), 0);
    }

    #[test]
    fn test_window_accepted() {
        let dir = tempdir().unwrap();
        let rig = TestRig::new(dir.path(), vec![]);
        let windowed = DetectorSetup {
            bin_x: 2,
            bin_y: 2,
            window: Some(Window {
                x_start: 0,
                y_start: 0,
                x_end: 4095,
                y_end: 1023,
            }),
        };
        rig.run(&setup(windowed, "clear", vec![])).unwrap();
        assert_eq!(rig.services.status.detector(), Some(windowed));
    }
}
