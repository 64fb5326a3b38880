/*
 * Keep-alive acknowledgements for a command in flight
 *
 * While a handler blocks on an exposure, a reduction or a telescope offset, a
 * worker thread re-sends an ACK every interval so the client keeps waiting.
 * Changing the estimate wakes the worker and sends an ACK at once. An ACK
 * never promises less than two intervals, so a client that allows the ACK's
 * time to complete always hears from us again before giving up.
 */

use std::io::Write;
use std::net::TcpStream;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, warn};
use olibmsg::{write_reply, AckReply, OResult, Reply, RequestId};

use crate::config::constants::MAX_ACK_ESTIMATE;

/// Destination of the replies to one request
pub trait ReplySink: Send + Sync {
    fn send(&self, reply: &Reply) -> OResult<()>;
}

/// Replies written to the request's TCP stream
pub struct StreamSink {
    stream: Mutex<TcpStream>,
}

impl StreamSink {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream: Mutex::new(stream),
        }
    }
}

impl ReplySink for StreamSink {
    fn send(&self, reply: &Reply) -> OResult<()> {
        let mut stream = self.stream.lock().unwrap_or_else(|e| e.into_inner());
        write_reply(&mut *stream, reply)?;
        stream.flush()?;
        Ok(())
    }
}

struct Schedule {
    next_send: Instant,
    deadline: Instant,
    stopped: bool,
}

struct CondPair<T> {
    lock: Mutex<T>,
    cvar: Condvar,
}

impl<T> CondPair<T> {
    fn lock(&self) -> MutexGuard<'_, T> {
        self.lock.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Periodic ACK sender for one request
pub struct KeepAlive {
    pair: Arc<CondPair<Schedule>>,
    handle: Option<JoinHandle<()>>,
}

impl KeepAlive {
    /// Send an ACK for `estimate` now and keep re-sending every `interval`
    pub fn start(id: RequestId, sink: Arc<dyn ReplySink>, interval: Duration, estimate: Duration) -> KeepAlive {
        let now = Instant::now();
        let interval = interval.min(MAX_ACK_ESTIMATE);
        let estimate = estimate.min(MAX_ACK_ESTIMATE);
        let first = Reply::Ack(AckReply::new(id.clone(), estimate.max(interval * 2)));
        if let Err(e) = sink.send(&first) {
            warn!("First ACK for {} not sent: {}", id, e);
        }

        let pair = Arc::new(CondPair {
            lock: Mutex::new(Schedule {
                next_send: now + interval,
                deadline: now + estimate,
                stopped: false,
            }),
            cvar: Condvar::new(),
        });

        let worker = pair.clone();
        let handle = thread::spawn(move || Self::run(worker, id, sink, interval));

        KeepAlive {
            pair,
            handle: Some(handle),
        }
    }

    fn run(pair: Arc<CondPair<Schedule>>, id: RequestId, sink: Arc<dyn ReplySink>, interval: Duration) {
        let mut schedule = pair.lock();
        loop {
            // Wait until the next send time, a new estimate or stop
            while !schedule.stopped && schedule.next_send > Instant::now() {
                let timeout = schedule.next_send.saturating_duration_since(Instant::now());
                let (guard, _) = pair
                    .cvar
                    .wait_timeout(schedule, timeout.max(Duration::from_millis(1)))
                    .unwrap_or_else(|e| e.into_inner());
                schedule = guard;
            }
            if schedule.stopped {
                return;
            }

            let now = Instant::now();
            let remaining = schedule.deadline.saturating_duration_since(now).max(interval * 2);
            let ack = Reply::Ack(AckReply::new(id.clone(), remaining));
            if let Err(e) = sink.send(&ack) {
                warn!("Keep-alive for {} stopped: {}", id, e);
                return;
            }
            debug!("ACK {} ({} ms)", id, remaining.as_millis());
            schedule.next_send = now + interval;
        }
    }

    /// Expect completion `estimate` from now and acknowledge immediately
    pub fn set_estimate(&self, estimate: Duration) {
        let now = Instant::now();
        let mut schedule = self.pair.lock();
        schedule.deadline = now + estimate.min(MAX_ACK_ESTIMATE);
        schedule.next_send = now;
        self.pair.cvar.notify_one();
    }

    /// Stop sending. No ACK follows once this returns.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.pair.lock().stopped = true;
        self.pair.cvar.notify_one();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for KeepAlive {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Sink keeping every reply in memory
    #[derive(Default)]
    pub(crate) struct MemorySink {
        replies: Mutex<Vec<Reply>>,
    }

    impl MemorySink {
        pub(crate) fn replies(&self) -> Vec<Reply> {
            self.replies.lock().unwrap().clone()
        }

        pub(crate) fn acks(&self) -> Vec<AckReply> {
            self.replies()
                .into_iter()
                .filter_map(|reply| match reply {
                    Reply::Ack(ack) => Some(ack),
                    Reply::Done(_) => None,
                })
                .collect()
        }
    }

    impl ReplySink for MemorySink {
        fn send(&self, reply: &Reply) -> OResult<()> {
            self.replies.lock().unwrap().push(reply.clone());
            Ok(())
        }
    }

    #[test]
    fn test_periodic_acks() {
        let sink = Arc::new(MemorySink::default());
        let keep_alive = KeepAlive::start(
            RequestId::new("rcs-1"),
            sink.clone(),
            Duration::from_millis(20),
            Duration::from_secs(10),
        );
        thread::sleep(Duration::from_millis(110));
        keep_alive.stop();

        let acks = sink.acks();
        assert!(acks.len() >= 3, "only {} ACKs", acks.len());
        assert!(acks.iter().all(|ack| ack.id == RequestId::new("rcs-1")));
        assert!(acks[0].time_to_complete_ms > 9_000);
        assert!(acks.windows(2).all(|w| w[1].time_to_complete_ms <= w[0].time_to_complete_ms));
    }

    #[test]
    fn test_new_estimate_sent_immediately() {
        let sink = Arc::new(MemorySink::default());
        let keep_alive = KeepAlive::start(
            RequestId::new("rcs-2"),
            sink.clone(),
            Duration::from_secs(60),
            Duration::from_secs(1),
        );
        thread::sleep(Duration::from_millis(50));
        keep_alive.set_estimate(Duration::from_secs(300));
        thread::sleep(Duration::from_millis(50));
        keep_alive.stop();

        let acks = sink.acks();
        assert_eq!(acks.len(), 2);
        // Never less than two intervals
        assert_eq!(acks[0].time_to_complete_ms, 120_000);
        assert!(acks[1].time_to_complete_ms > 290_000);
    }

    #[test]
    fn test_nothing_sent_after_stop() {
        let sink = Arc::new(MemorySink::default());
        let keep_alive = KeepAlive::start(
            RequestId::new("rcs-3"),
            sink.clone(),
            Duration::from_millis(10),
            Duration::from_secs(1),
        );
        thread::sleep(Duration::from_millis(30));
        keep_alive.stop();
        let count = sink.replies().len();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(sink.replies().len(), count);
    }

    #[test]
    fn test_unbounded_estimate_capped() {
        let sink = Arc::new(MemorySink::default());
        let keep_alive = KeepAlive::start(
            RequestId::new("rcs-4"),
            sink.clone(),
            Duration::from_secs(60),
            Duration::MAX,
        );
        keep_alive.set_estimate(Duration::MAX);
        thread::sleep(Duration::from_millis(50));
        keep_alive.stop();

        let acks = sink.acks();
        assert_eq!(acks.len(), 2);
        assert_eq!(acks[0].time_to_complete(), MAX_ACK_ESTIMATE);
        assert!(acks[1].time_to_complete() <= MAX_ACK_ESTIMATE);
    }
}
