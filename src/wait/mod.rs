//! Bounded busy-poll primitives that turn the non-blocking [IoQueueApi::poll] into a blocking style
//! call. Neither primitive ever yields to a scheduler or sleeps, they spin on the backend until a
//! token resolves or a fixed number of attempts has been made, at which point they give up with
//! [Error::Timeout] and leave the remaining tokens pending for the caller to retry.

use std::task::Poll;

use tracing::{debug, trace, warn};

use crate::{
    io_queue::IoQueueApi,
    queue::{QResult, QToken},
    Error, Result,
};

/// Default number of poll attempts before a wait gives up.
pub const WAIT_MAX_ITER: usize = 10_000;

/// Tuning for [wait] and [wait_any].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitConfig {
    max_iter: usize,
}

impl WaitConfig {
    /// A config that gives up after `max_iter` not ready polls, which must be at least one.
    pub fn new(max_iter: usize) -> Result<WaitConfig> {
        if max_iter == 0 {
            return Err(Error::InvalidArgument(
                "wait ceiling must allow at least one poll".into(),
            ));
        }
        Ok(WaitConfig { max_iter })
    }

    pub fn max_iter(&self) -> usize {
        self.max_iter
    }
}

impl Default for WaitConfig {
    fn default() -> Self {
        WaitConfig {
            max_iter: WAIT_MAX_ITER,
        }
    }
}

/// The resume and ready offsets threaded through successive [wait_any] calls over the same token
/// set.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WaitCursor {
    /// Index the next sweep starts from.
    pub start: usize,
    /// Index of the token the last call resolved, if any.
    pub ready: Option<usize>,
}

/// Poll `qt` until it resolves or `config.max_iter()` attempts have been made.
///
/// A definitive result releases the token before it is returned. The exception is
/// [Error::InvalidHandle], the token is already gone and there is nothing left to release. On
/// [Error::Timeout] the token stays pending.
pub fn wait<B>(io: &mut B, qt: QToken, config: &WaitConfig) -> Result<QResult>
where
    B: IoQueueApi + ?Sized,
{
    for _ in 0..config.max_iter {
        match io.poll(qt) {
            Poll::Pending => continue,
            Poll::Ready(Err(Error::InvalidHandle)) => return Err(Error::InvalidHandle),
            Poll::Ready(result) => {
                io.drop_token(qt)?;
                trace!(%qt, ok = result.is_ok(), "wait resolved token");
                return result;
            }
        }
    }

    warn!(%qt, attempts = config.max_iter, "wait reached its retry ceiling");
    Err(Error::Timeout {
        attempts: config.max_iter,
    })
}

/// Poll `tokens` in turn, starting at `cursor.start`, until one of them completes successfully or
/// reports its connection terminated.
///
/// That token is released, its index is recorded in `cursor.ready` and `cursor.start` goes back
/// to zero. Any other failure does not end the wait: the failed token is released (unless it is
/// already gone, see [Error::InvalidHandle]) and the sweep moves on. Every poll that does not end
/// the wait counts as one attempt. Once `config.max_iter()` attempts have been made, the index of
/// the last polled token is recorded in `cursor.start` so the next call picks up there, and
/// [Error::Timeout] is returned. Sweeps wrap around to the first token.
pub fn wait_any<B>(
    io: &mut B,
    tokens: &[QToken],
    cursor: &mut WaitCursor,
    config: &WaitConfig,
) -> Result<QResult>
where
    B: IoQueueApi + ?Sized,
{
    if tokens.is_empty() {
        return Err(Error::InvalidArgument(
            "wait_any requires at least one token".into(),
        ));
    }

    cursor.ready = None;
    let mut idx = if cursor.start < tokens.len() {
        cursor.start
    } else {
        0
    };
    let mut attempts = 0;

    loop {
        let qt = tokens[idx];
        match io.poll(qt) {
            Poll::Pending => {}
            Poll::Ready(result) if ends_wait(&result) => {
                io.drop_token(qt)?;
                cursor.ready = Some(idx);
                cursor.start = 0;
                trace!(%qt, ready = idx, attempts, "wait_any resolved token");
                return result;
            }
            Poll::Ready(Err(Error::InvalidHandle)) => {
                trace!(%qt, index = idx, "wait_any skipping released token");
            }
            Poll::Ready(Err(e)) => {
                debug!(%qt, index = idx, error = %e, "wait_any skipping failed token");
                if let Err(e) = io.drop_token(qt) {
                    debug!(%qt, error = %e, "failed to release failed token");
                }
            }
            Poll::Ready(Ok(_)) => unreachable!("successful polls always end the wait"),
        }

        attempts += 1;
        if attempts >= config.max_iter {
            cursor.start = idx;
            warn!(
                tokens = tokens.len(),
                resume = idx,
                attempts,
                "wait_any reached its retry ceiling"
            );
            return Err(Error::Timeout { attempts });
        }
        idx = (idx + 1) % tokens.len();
    }
}

fn ends_wait(result: &Result<QResult>) -> bool {
    match result {
        Ok(_) => true,
        Err(e) => e.is_connection_terminated(),
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, net::SocketAddr};

    use nix::sys::socket::{AddressFamily, SockProtocol, SockType};

    use crate::{
        context::NetContext,
        queue::{OpKind, QDesc, QValue},
        sga::SgArray,
    };

    use super::*;

    const NEVER: usize = usize::MAX;

    #[derive(Clone, Copy)]
    enum Outcome {
        Done,
        Reset,
        Fail,
    }

    struct Op {
        pending: usize,
        outcome: Outcome,
        resolved: bool,
    }

    /// A backend whose tokens resolve after a scripted number of not ready polls.
    #[derive(Default)]
    struct Scripted {
        ops: HashMap<u64, Op>,
        polls: HashMap<u64, usize>,
        dropped: Vec<u64>,
    }

    impl Scripted {
        fn script(&mut self, id: u64, pending: usize, outcome: Outcome) -> QToken {
            self.ops.insert(
                id,
                Op {
                    pending,
                    outcome,
                    resolved: false,
                },
            );
            QToken(id)
        }

        fn polls(&self, qt: QToken) -> usize {
            self.polls.get(&qt.0).copied().unwrap_or(0)
        }

        fn dropped(&self, qt: QToken) -> bool {
            self.dropped.contains(&qt.0)
        }
    }

    impl IoQueueApi for Scripted {
        fn socket(
            &mut self,
            _: AddressFamily,
            _: SockType,
            _: Option<SockProtocol>,
        ) -> Result<QDesc> {
            Err(Error::InvalidArgument("scripted".into()))
        }

        fn set_io_ctx(&mut self, _: QDesc, _: &NetContext) -> Result<()> {
            Ok(())
        }

        fn bind(&mut self, _: QDesc, _: SocketAddr) -> Result<()> {
            Ok(())
        }

        fn connect(&mut self, _: QDesc, _: SocketAddr) -> Result<()> {
            Ok(())
        }

        fn local_addr(&self, _: QDesc) -> Result<SocketAddr> {
            Err(Error::InvalidHandle)
        }

        fn push(&mut self, _: QDesc, _: SgArray) -> Result<QToken> {
            Err(Error::InvalidHandle)
        }

        fn pop(&mut self, _: QDesc) -> Result<QToken> {
            Err(Error::InvalidHandle)
        }

        fn poll(&mut self, qt: QToken) -> Poll<Result<QResult>> {
            *self.polls.entry(qt.0).or_default() += 1;
            let op = match self.ops.get_mut(&qt.0) {
                Some(op) if !op.resolved => op,
                _ => return Poll::Ready(Err(Error::InvalidHandle)),
            };
            if op.pending > 0 {
                op.pending -= 1;
                return Poll::Pending;
            }
            op.resolved = true;
            Poll::Ready(match op.outcome {
                Outcome::Done => Ok(QResult {
                    qd: QDesc(0),
                    qt,
                    op: OpKind::Pop,
                    value: QValue::Raw(qt.0),
                }),
                Outcome::Reset => Err(Error::ConnectionReset),
                Outcome::Fail => Err(Error::InvalidArgument("scripted failure".into())),
            })
        }

        fn drop_token(&mut self, qt: QToken) -> Result<()> {
            self.ops.remove(&qt.0).ok_or(Error::InvalidHandle)?;
            self.dropped.push(qt.0);
            Ok(())
        }

        fn close(&mut self, _: QDesc) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn wait_times_out_after_exactly_the_ceiling() {
        let mut io = Scripted::default();
        let qt = io.script(1, NEVER, Outcome::Done);
        let config = WaitConfig::new(100).unwrap();

        let err = wait(&mut io, qt, &config).unwrap_err();
        assert!(matches!(err, Error::Timeout { attempts: 100 }));
        assert_eq!(io.polls(qt), 100);
        assert!(!io.dropped(qt));
    }

    #[test]
    fn wait_default_ceiling() {
        let mut io = Scripted::default();
        let qt = io.script(1, NEVER, Outcome::Done);

        assert!(wait(&mut io, qt, &WaitConfig::default())
            .unwrap_err()
            .is_timeout());
        assert_eq!(io.polls(qt), WAIT_MAX_ITER);
    }

    #[test]
    fn wait_releases_resolved_token() {
        let mut io = Scripted::default();
        let qt = io.script(7, 3, Outcome::Done);

        let res = wait(&mut io, qt, &WaitConfig::default()).unwrap();
        assert_eq!(res.qt, qt);
        assert!(matches!(res.value, QValue::Raw(7)));
        assert_eq!(io.polls(qt), 4);
        assert!(io.dropped(qt));

        // Already released, reported without another release attempt.
        assert!(matches!(
            wait(&mut io, qt, &WaitConfig::default()),
            Err(Error::InvalidHandle)
        ));
        assert_eq!(io.polls(qt), 5);
    }

    #[test]
    fn wait_delivers_connection_reset() {
        let mut io = Scripted::default();
        let qt = io.script(1, 0, Outcome::Reset);

        let err = wait(&mut io, qt, &WaitConfig::default()).unwrap_err();
        assert!(matches!(err, Error::ConnectionReset));
        assert!(io.dropped(qt));
    }

    #[test]
    fn wait_any_rejects_empty_set() {
        let mut io = Scripted::default();
        let mut cursor = WaitCursor::default();
        let err = wait_any(&mut io, &[], &mut cursor, &WaitConfig::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn wait_any_reports_ready_offset() {
        let mut io = Scripted::default();
        let tokens = [
            io.script(0, NEVER, Outcome::Done),
            io.script(1, NEVER, Outcome::Done),
            io.script(2, 0, Outcome::Done),
            io.script(3, NEVER, Outcome::Done),
        ];
        let mut cursor = WaitCursor::default();

        let res = wait_any(&mut io, &tokens, &mut cursor, &WaitConfig::default()).unwrap();
        assert_eq!(res.qt, tokens[2]);
        assert_eq!(cursor.ready, Some(2));
        assert_eq!(cursor.start, 0);
        assert!(io.dropped(tokens[2]));

        assert_eq!(io.polls(tokens[0]), 1);
        assert_eq!(io.polls(tokens[1]), 1);
        assert_eq!(io.polls(tokens[3]), 0);
        assert!(!io.dropped(tokens[0]) && !io.dropped(tokens[1]) && !io.dropped(tokens[3]));
    }

    #[test]
    fn wait_any_resumes_where_the_ceiling_hit() {
        let mut io = Scripted::default();
        let tokens = [
            io.script(0, NEVER, Outcome::Done),
            io.script(1, NEVER, Outcome::Done),
            io.script(2, NEVER, Outcome::Done),
        ];
        let config = WaitConfig::new(5).unwrap();
        let mut cursor = WaitCursor::default();

        // Polls 0, 1, 2, 0, 1.
        let err = wait_any(&mut io, &tokens, &mut cursor, &config).unwrap_err();
        assert!(matches!(err, Error::Timeout { attempts: 5 }));
        assert_eq!(cursor, WaitCursor { start: 1, ready: None });
        assert_eq!(tokens.map(|qt| io.polls(qt)), [2, 2, 1]);

        // Polls 1, 2, 0, 1, 2.
        wait_any(&mut io, &tokens, &mut cursor, &config).unwrap_err();
        assert_eq!(cursor.start, 2);
        assert_eq!(tokens.map(|qt| io.polls(qt)), [3, 4, 3]);
        assert!(io.dropped.is_empty());
    }

    #[test]
    fn wait_any_out_of_range_start_wraps() {
        let mut io = Scripted::default();
        let tokens = [io.script(0, 0, Outcome::Done), io.script(1, 0, Outcome::Done)];
        let mut cursor = WaitCursor {
            start: 9,
            ready: None,
        };

        let res = wait_any(&mut io, &tokens, &mut cursor, &WaitConfig::default()).unwrap();
        assert_eq!(res.qt, tokens[0]);
        assert_eq!(cursor.ready, Some(0));
    }

    #[test]
    fn wait_any_connection_reset_is_definitive() {
        let mut io = Scripted::default();
        let tokens = [
            io.script(0, NEVER, Outcome::Done),
            io.script(1, 2, Outcome::Reset),
        ];
        let mut cursor = WaitCursor::default();

        let err = wait_any(&mut io, &tokens, &mut cursor, &WaitConfig::default()).unwrap_err();
        assert!(matches!(err, Error::ConnectionReset));
        assert_eq!(cursor.ready, Some(1));
        assert_eq!(cursor.start, 0);
        assert_eq!(io.polls(tokens[1]), 3);
        assert!(io.dropped(tokens[1]));
        assert!(!io.dropped(tokens[0]));

        // The sibling is still pending and can be waited on.
        assert!(wait_any(&mut io, &tokens[..1], &mut cursor, &WaitConfig::new(10).unwrap())
            .unwrap_err()
            .is_timeout());
    }

    #[test]
    fn wait_any_skips_stale_and_failed_tokens() {
        let mut io = Scripted::default();
        // Never scripted, so every poll reports it as gone.
        let stale = QToken(40);
        let tokens = [
            stale,
            io.script(1, 0, Outcome::Fail),
            io.script(2, 2, Outcome::Done),
        ];
        let mut cursor = WaitCursor::default();

        // Polls stale, fail, 2, stale, fail (now gone), 2, stale, fail, 2.
        let res = wait_any(&mut io, &tokens, &mut cursor, &WaitConfig::default()).unwrap();
        assert_eq!(res.qt, tokens[2]);
        assert_eq!(cursor, WaitCursor { start: 0, ready: Some(2) });
        assert_eq!(tokens.map(|qt| io.polls(qt)), [3, 3, 3]);
        assert!(io.dropped(tokens[1]) && io.dropped(tokens[2]));
        assert!(!io.dropped(stale));
    }

    #[test]
    fn wait_any_skipped_tokens_count_towards_the_ceiling() {
        let mut io = Scripted::default();
        let tokens = [QToken(40), io.script(1, 0, Outcome::Fail)];
        let config = WaitConfig::new(5).unwrap();
        let mut cursor = WaitCursor::default();

        let err = wait_any(&mut io, &tokens, &mut cursor, &config).unwrap_err();
        assert!(matches!(err, Error::Timeout { attempts: 5 }));
        assert_eq!(cursor, WaitCursor { start: 0, ready: None });
        assert_eq!(tokens.map(|qt| io.polls(qt)), [3, 2]);

        // A token that resolves later in the set is still found after the stale ones.
        let ready = io.script(2, 0, Outcome::Done);
        let res = wait_any(&mut io, &[tokens[0], tokens[1], ready], &mut cursor, &config).unwrap();
        assert_eq!(res.qt, ready);
        assert_eq!(cursor.ready, Some(2));
    }

    #[test]
    fn wait_config_rejects_zero() {
        assert!(matches!(WaitConfig::new(0), Err(Error::InvalidArgument(_))));
        assert_eq!(WaitConfig::default().max_iter(), WAIT_MAX_ITER);
    }
}
