//! Cooperative cancellation
//!
//! A command in flight holds a `CancelToken`. INTERRUPT sets it from another
//! connection; blocking steps check it when they return.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use log::info;
use olibmsg::{CommandType, OError, OResult};

use crate::config::constants::CANCEL_POLL;

/// Shared abort flag for one command
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Fail with `OError::Aborted` once cancelled
    pub fn check(&self) -> OResult<()> {
        if self.is_cancelled() {
            Err(OError::Aborted)
        } else {
            Ok(())
        }
    }

    /// Sleep for `duration`, returning early with `OError::Aborted` when cancelled
    pub fn sleep(&self, duration: Duration) -> OResult<()> {
        let deadline = Instant::now() + duration;
        loop {
            self.check()?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            thread::sleep((deadline - now).min(CANCEL_POLL));
        }
    }
}

/// The single primary command allowed in flight
#[derive(Debug, Default)]
pub struct CommandSlot {
    current: Mutex<Option<(CommandType, CancelToken)>>,
}

impl CommandSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the slot for `cmd_type`, failing with `OError::Busy` while another command holds it
    pub fn try_claim(&self, cmd_type: CommandType) -> OResult<SlotGuard<'_>> {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((running, _)) = current.as_ref() {
            return Err(OError::Busy(running.name().to_string()));
        }
        let token = CancelToken::new();
        *current = Some((cmd_type, token.clone()));
        Ok(SlotGuard { slot: self, token })
    }

    /// Command currently holding the slot
    pub fn current(&self) -> Option<CommandType> {
        self.current
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|(cmd_type, _)| *cmd_type)
    }

    /// Cancel the command in flight, returning its type
    pub fn cancel_current(&self) -> Option<CommandType> {
        let current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        current.as_ref().map(|(cmd_type, token)| {
            info!("Cancelling {}", cmd_type.name());
            token.cancel();
            *cmd_type
        })
    }

    fn release(&self) {
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

/// Releases the slot when dropped
pub struct SlotGuard<'a> {
    slot: &'a CommandSlot,
    token: CancelToken,
}

impl SlotGuard<'_> {
    pub fn token(&self) -> CancelToken {
        self.token.clone()
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.slot.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_check() {
        let token = CancelToken::new();
        assert!(token.check().is_ok());
        let clone = token.clone();
        clone.cancel();
        assert!(matches!(token.check(), Err(OError::Aborted)));
    }

    #[test]
    fn test_sleep_interrupted() {
        let token = CancelToken::new();
        let canceller = token.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(60));
            canceller.cancel();
        });
        let start = Instant::now();
        assert!(matches!(token.sleep(Duration::from_secs(10)), Err(OError::Aborted)));
        assert!(start.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
    }

    #[test]
    fn test_slot_single_flight() {
        let slot = CommandSlot::new();
        let guard = slot.try_claim(CommandType::Acquire).unwrap();
        assert_eq!(slot.current(), Some(CommandType::Acquire));
        assert!(matches!(slot.try_claim(CommandType::Bias), Err(OError::Busy(_))));

        assert_eq!(slot.cancel_current(), Some(CommandType::Acquire));
        assert!(guard.token().is_cancelled());

        drop(guard);
        assert_eq!(slot.current(), None);
        assert_eq!(slot.cancel_current(), None);
        let next = slot.try_claim(CommandType::Bias).unwrap();
        assert!(!next.token().is_cancelled());
    }
}
