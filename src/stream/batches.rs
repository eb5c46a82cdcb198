//! Periodic readiness polling as a stream

use futures::{Stream, ready};
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval};
use tokio_stream::wrappers::IntervalStream;
use tracing::debug;

use crate::Result;
use crate::driver::{ReaderState, SharedCore, lock_core};
use crate::types::Capture;

pin_project! {
    /// Stream of drained captures, checked once per tick
    ///
    /// On each tick the reader's gate is consulted; when it reports ready the
    /// whole buffer is drained and yielded. The stream ends once the reader
    /// task has exited and nothing more is ready. A failed reader yields its
    /// error once before ending.
    pub struct ReadyBatches<T> {
        #[pin]
        ticks: T,
        core: SharedCore,
        state: watch::Receiver<ReaderState>,
        done: bool,
    }
}

impl ReadyBatches<IntervalStream> {
    /// Poll the reader every `period`
    pub fn new(core: SharedCore, state: watch::Receiver<ReaderState>, period: Duration) -> Self {
        let mut ticks = interval(period);
        // Late ticks are delayed rather than bursted
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self::with_ticks(IntervalStream::new(ticks), core, state)
    }
}

impl<T> ReadyBatches<T> {
    /// Poll the reader whenever `ticks` yields
    pub fn with_ticks(ticks: T, core: SharedCore, state: watch::Receiver<ReaderState>) -> Self {
        Self { ticks, core, state, done: false }
    }
}

impl<T: Stream> Stream for ReadyBatches<T> {
    type Item = Result<Capture>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            if *this.done {
                return Poll::Ready(None);
            }

            if ready!(this.ticks.as_mut().poll_next(cx)).is_none() {
                *this.done = true;
                return Poll::Ready(None);
            }

            // Read the state first so a batch routed just before exit is still seen
            let state = this.state.borrow().clone();
            let batch = lock_core(this.core).map(|mut core| {
                if core.buffers.is_data_ready() { Some(core.buffers.drain()) } else { None }
            });

            match (batch, state) {
                (Err(e), _) => {
                    *this.done = true;
                    return Poll::Ready(Some(Err(e)));
                }
                (Ok(Some(capture)), _) => return Poll::Ready(Some(Ok(capture))),
                (Ok(None), ReaderState::Failed(failure)) => {
                    *this.done = true;
                    return Poll::Ready(Some(Err(failure.detached())));
                }
                (Ok(None), state) if state.is_terminal() => {
                    debug!("Reader is {:?} with nothing ready, ending batches", state);
                    *this.done = true;
                    return Poll::Ready(None);
                }
                // Not ready yet, wait for the next tick
                (Ok(None), _) => {}
            }
        }
    }
}
