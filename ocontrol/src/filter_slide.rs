//! ND filter slide proxy
//!
//! The slide controller speaks a line protocol over TCP. Each request is one
//! line, `move <slide> <in|out>` or `status <slide>`, answered by one line,
//! `ok <in|out>` or `error <text>`. A controller that closes the connection or
//! stays silent is reported as `OError::NoReply`, never as a default position.

use std::io::{self, BufRead, BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use log::{debug, info};
use olibmsg::{OError, OResult, SlidePosition};

use crate::hardware::FilterSlide;

const CONTROLLER_NAME: &str = "ND filter slide controller";

/// TCP proxy for the ND filter slide controller
#[derive(Debug, Clone)]
pub struct TcpFilterSlide {
    address: String,
    slide_count: usize,
    timeout: Duration,
}

impl TcpFilterSlide {
    pub fn new(address: impl Into<String>, slide_count: usize, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            slide_count,
            timeout,
        }
    }

    fn check_slide(&self, slide: usize) -> OResult<()> {
        if slide >= self.slide_count {
            return Err(OError::parameter(format!(
                "ND slide {} out of range (0..{})",
                slide, self.slide_count
            )));
        }
        Ok(())
    }

    /// Send one request line and return the reply line
    fn transact(&self, request: &str) -> OResult<String> {
        let peer = self
            .address
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| OError::Config(format!("Address {} did not resolve", self.address)))?;
        let mut stream = TcpStream::connect_timeout(&peer, self.timeout)
            .map_err(|e| OError::hardware(format!("{}: {}", CONTROLLER_NAME, e)))?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;

        debug!("{} <- {}", CONTROLLER_NAME, request);
        stream.write_all(request.as_bytes())?;
        stream.write_all(b"\n")?;
        stream.flush()?;

        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        match reader.read_line(&mut line) {
            Ok(0) => return Err(OError::NoReply(CONTROLLER_NAME.to_string())),
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => {
                return Err(OError::NoReply(CONTROLLER_NAME.to_string()));
            }
            Err(e) => return Err(OError::Io(e)),
        }
        let line = line.trim().to_string();
        debug!("{} -> {}", CONTROLLER_NAME, line);
        if line.is_empty() {
            return Err(OError::NoReply(CONTROLLER_NAME.to_string()));
        }
        Ok(line)
    }

    fn parse_reply(reply: &str) -> OResult<SlidePosition> {
        let mut words = reply.splitn(2, ' ');
        match (words.next(), words.next()) {
            (Some("ok"), Some(position)) => SlidePosition::parse(position.trim()).ok_or_else(|| {
                OError::hardware(format!("{} reported unknown position {}", CONTROLLER_NAME, position))
            }),
            (Some("error"), message) => Err(OError::hardware(format!(
                "{}: {}",
                CONTROLLER_NAME,
                message.unwrap_or("unspecified error")
            ))),
            _ => Err(OError::protocol(format!("Unparseable slide reply '{}'", reply))),
        }
    }
}

impl FilterSlide for TcpFilterSlide {
    fn slide_count(&self) -> usize {
        self.slide_count
    }

    fn move_slide(&self, slide: usize, position: SlidePosition) -> OResult<()> {
        self.check_slide(slide)?;
        info!("Moving ND slide {} {}", slide, position.as_str());
        let reply = self.transact(&format!("move {} {}", slide, position.as_str()))?;
        let reached = Self::parse_reply(&reply)?;
        if reached != position {
            return Err(OError::hardware(format!(
                "ND slide {} stopped {} instead of {}",
                slide,
                reached.as_str(),
                position.as_str()
            )));
        }
        Ok(())
    }

    fn slide_position(&self, slide: usize) -> OResult<SlidePosition> {
        self.check_slide(slide)?;
        let reply = self.transact(&format!("status {}", slide))?;
        Self::parse_reply(&reply)
    }
}
