//! Request correlator.
//!
//! Owned by the session task, so it is a plain synchronous map with no
//! locking. Every registered id is resolved exactly once: by its end marker,
//! a gateway error, its deadline, a cancel, or a connection failure. Whatever
//! arrives for an id after that is ignored.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use ibhist_model::{Bar, HistoricalDataRequest};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::error::{ConnectionError, RequestError};
use crate::wire::is_informational;

/// Token linking a submitted request to its response events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CorrelationId(pub i64);

impl CorrelationId {
    pub fn as_i64(self) -> i64 {
        self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A successfully finished request
#[derive(Debug, Clone, PartialEq)]
pub struct Completed {
    pub request: HistoricalDataRequest,
    pub bars: Vec<Bar>,
    /// Span reported by the gateway, if any
    pub start: Option<String>,
    pub end: Option<String>,
}

pub type Resolution = Result<Completed, RequestError>;

struct Pending {
    request: HistoricalDataRequest,
    bars: Vec<Bar>,
    timeout: Duration,
    deadline: Instant,
    waiter: oneshot::Sender<Resolution>,
}

#[derive(Default)]
pub struct Correlator {
    pending: HashMap<CorrelationId, Pending>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new request. A live duplicate id is refused and the new
    /// waiter resolved with [`RequestError::DuplicateId`].
    pub fn register(
        &mut self,
        id: CorrelationId,
        request: HistoricalDataRequest,
        timeout: Duration,
        waiter: oneshot::Sender<Resolution>,
    ) -> bool {
        if self.pending.contains_key(&id) {
            warn!(req_id = %id, "duplicate correlation id");
            let _ = waiter.send(Err(RequestError::DuplicateId(id.0)));
            return false;
        }
        self.pending.insert(
            id,
            Pending {
                request,
                bars: Vec::new(),
                timeout,
                deadline: Instant::now() + timeout,
                waiter,
            },
        );
        true
    }

    pub fn on_bar(&mut self, id: CorrelationId, bar: Bar) -> bool {
        match self.pending.get_mut(&id) {
            Some(pending) => {
                pending.bars.push(bar);
                true
            }
            None => {
                trace!(req_id = %id, "bar for unknown or resolved request ignored");
                false
            }
        }
    }

    pub fn on_end(&mut self, id: CorrelationId, start: &str, end: &str) -> bool {
        let Some(pending) = self.pending.remove(&id) else {
            trace!(req_id = %id, "end marker for unknown or resolved request ignored");
            return false;
        };
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
        info!(
            req_id = %id,
            request = %pending.request,
            bars = pending.bars.len(),
            "historical data request complete"
        );
        let completed = Completed {
            request: pending.request,
            bars: pending.bars,
            start: non_empty(start),
            end: non_empty(end),
        };
        let _ = pending.waiter.send(Ok(completed));
        true
    }

    /// Informational codes are logged and never resolve a request.
    pub fn on_error(&mut self, id: CorrelationId, code: i32, message: &str) -> bool {
        if is_informational(code) {
            debug!(req_id = %id, code, message, "gateway notice");
            return false;
        }
        if !self.pending.contains_key(&id) {
            trace!(req_id = %id, code, message, "error for unknown or resolved request ignored");
            return false;
        }
        warn!(req_id = %id, code, message, "gateway rejected request");
        self.resolve(
            id,
            Err(RequestError::Rejected {
                code,
                message: message.to_string(),
            }),
        )
    }

    /// Resolve a pending id as cancelled. Unknown ids are a no-op.
    pub fn cancel(&mut self, id: CorrelationId) -> bool {
        self.resolve(id, Err(RequestError::Cancelled))
    }

    /// Resolve every request whose deadline is at or before `now` with a
    /// timeout and return their ids.
    pub fn expire(&mut self, now: Instant) -> Vec<CorrelationId> {
        let mut expired: Vec<CorrelationId> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        expired.sort();

        for id in &expired {
            if let Some(pending) = self.pending.remove(id) {
                warn!(
                    req_id = %id,
                    timeout_ms = pending.timeout.as_millis() as u64,
                    bars_received = pending.bars.len(),
                    "historical data request timed out"
                );
                let _ = pending.waiter.send(Err(RequestError::Timeout {
                    timeout: pending.timeout,
                }));
            }
        }
        expired
    }

    /// Resolve everything outstanding with a connection error.
    pub fn fail_all(&mut self, err: &ConnectionError) -> usize {
        let count = self.pending.len();
        for (id, pending) in self.pending.drain() {
            debug!(req_id = %id, error = %err, "failing outstanding request");
            let _ = pending
                .waiter
                .send(Err(RequestError::Connection(err.clone())));
        }
        count
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|p| p.deadline).min()
    }

    pub fn is_pending(&self, id: CorrelationId) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn resolve(&mut self, id: CorrelationId, result: Resolution) -> bool {
        match self.pending.remove(&id) {
            Some(pending) => {
                let _ = pending.waiter.send(result);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot::error::TryRecvError;

    fn request(symbol: &str) -> HistoricalDataRequest {
        HistoricalDataRequest::builder(symbol).build().unwrap()
    }

    fn bar(time: &str, close: f64) -> Bar {
        Bar::new(time, close, close, close, close, 10)
    }

    fn register(
        correlator: &mut Correlator,
        id: i64,
        symbol: &str,
        timeout: Duration,
    ) -> oneshot::Receiver<Resolution> {
        let (tx, rx) = oneshot::channel();
        correlator.register(CorrelationId(id), request(symbol), timeout, tx);
        rx
    }

    #[test]
    fn test_interleaved_bars_stay_with_their_request() {
        let mut c = Correlator::new();
        let mut aapl = register(&mut c, 1, "AAPL", Duration::from_secs(30));
        let mut msft = register(&mut c, 2, "MSFT", Duration::from_secs(30));

        c.on_bar(CorrelationId(1), bar("t1", 1.0));
        c.on_bar(CorrelationId(2), bar("t1", 100.0));
        c.on_bar(CorrelationId(1), bar("t2", 2.0));
        c.on_bar(CorrelationId(2), bar("t2", 200.0));
        c.on_end(CorrelationId(2), "t1", "t2");
        c.on_bar(CorrelationId(1), bar("t3", 3.0));
        c.on_end(CorrelationId(1), "", "");

        let aapl = aapl.try_recv().unwrap().unwrap();
        assert_eq!(aapl.request.symbol(), "AAPL");
        let closes: Vec<f64> = aapl.bars.iter().map(|b| b.close).collect();
        assert_eq!(closes, vec![1.0, 2.0, 3.0]);
        assert_eq!(aapl.start, None);

        let msft = msft.try_recv().unwrap().unwrap();
        assert_eq!(msft.request.symbol(), "MSFT");
        assert_eq!(msft.bars.len(), 2);
        assert_eq!(msft.end.as_deref(), Some("t2"));
        assert_eq!(c.pending_count(), 0);
    }

    #[test]
    fn test_resolution_happens_exactly_once() {
        let mut c = Correlator::new();
        let mut rx = register(&mut c, 1, "AAPL", Duration::from_secs(30));

        assert!(c.on_error(CorrelationId(1), 162, "no data"));
        assert!(!c.on_end(CorrelationId(1), "", ""));
        assert!(!c.on_bar(CorrelationId(1), bar("late", 1.0)));
        assert!(!c.cancel(CorrelationId(1)));
        assert!(c.expire(Instant::now() + Duration::from_secs(3600)).is_empty());

        assert_eq!(
            rx.try_recv().unwrap(),
            Err(RequestError::Rejected {
                code: 162,
                message: "no data".into()
            })
        );
    }

    #[test]
    fn test_unknown_ids_are_ignored() {
        let mut c = Correlator::new();
        assert!(!c.on_bar(CorrelationId(99), bar("t", 1.0)));
        assert!(!c.on_end(CorrelationId(99), "", ""));
        assert!(!c.on_error(CorrelationId(99), 200, "no security definition"));
        assert!(!c.cancel(CorrelationId(99)));
    }

    #[test]
    fn test_informational_error_does_not_resolve() {
        let mut c = Correlator::new();
        let mut rx = register(&mut c, 1, "AAPL", Duration::from_secs(30));
        assert!(!c.on_error(CorrelationId(1), 2104, "Market data farm connection is OK"));
        assert!(c.is_pending(CorrelationId(1)));
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn test_duplicate_registration_rejects_new_waiter() {
        let mut c = Correlator::new();
        let mut first = register(&mut c, 1, "AAPL", Duration::from_secs(30));
        let mut second = register(&mut c, 1, "MSFT", Duration::from_secs(30));

        assert_eq!(second.try_recv().unwrap(), Err(RequestError::DuplicateId(1)));
        assert!(matches!(first.try_recv(), Err(TryRecvError::Empty)));

        c.on_end(CorrelationId(1), "", "");
        assert_eq!(first.try_recv().unwrap().unwrap().request.symbol(), "AAPL");
    }

    #[test]
    fn test_deadlines_are_independent() {
        let mut c = Correlator::new();
        let mut short = register(&mut c, 1, "AAPL", Duration::from_secs(5));
        let mut long = register(&mut c, 2, "MSFT", Duration::from_secs(60));

        let next = c.next_deadline().unwrap();
        assert!(next <= Instant::now() + Duration::from_secs(5));

        let expired = c.expire(Instant::now() + Duration::from_secs(10));
        assert_eq!(expired, vec![CorrelationId(1)]);
        assert_eq!(
            short.try_recv().unwrap(),
            Err(RequestError::Timeout {
                timeout: Duration::from_secs(5)
            })
        );
        assert!(matches!(long.try_recv(), Err(TryRecvError::Empty)));
        assert!(c.is_pending(CorrelationId(2)));
    }

    #[test]
    fn test_fail_all_drains_everything() {
        let mut c = Correlator::new();
        let mut a = register(&mut c, 1, "AAPL", Duration::from_secs(30));
        let mut b = register(&mut c, 2, "MSFT", Duration::from_secs(30));
        c.on_bar(CorrelationId(1), bar("t", 1.0));

        let err = ConnectionError::Lost("eof".into());
        assert_eq!(c.fail_all(&err), 2);
        assert_eq!(c.pending_count(), 0);
        assert_eq!(c.next_deadline(), None);
        for rx in [&mut a, &mut b] {
            assert_eq!(
                rx.try_recv().unwrap(),
                Err(RequestError::Connection(err.clone()))
            );
        }
    }

    #[test]
    fn test_cancel_resolves_pending() {
        let mut c = Correlator::new();
        let mut rx = register(&mut c, 4, "AAPL", Duration::from_secs(30));
        assert!(c.cancel(CorrelationId(4)));
        assert_eq!(rx.try_recv().unwrap(), Err(RequestError::Cancelled));
    }

    #[test]
    fn test_dropped_waiter_is_harmless() {
        let mut c = Correlator::new();
        drop(register(&mut c, 1, "AAPL", Duration::from_secs(30)));
        assert!(c.on_end(CorrelationId(1), "", ""));
    }
}
