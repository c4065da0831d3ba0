//! Latest-wins stream throttling

use futures::Stream;
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::{Interval, MissedTickBehavior, interval};

/// Extension trait to add throttling to any Stream
pub trait ThrottleExt: Stream {
    /// Emit at most one item per `period`, always the newest one seen.
    ///
    /// Items arriving while the period is running replace each other. An item that
    /// arrives after a quiet period is emitted right away.
    fn throttle(self, period: Duration) -> Throttle<Self>
    where
        Self: Sized,
    {
        Throttle::new(self, period)
    }
}

impl<T: Stream> ThrottleExt for T {}

pin_project! {
    /// Stream returned by [`ThrottleExt::throttle`].
    pub struct Throttle<S: Stream> {
        #[pin]
        stream: S,
        interval: Interval,
        pending: Option<S::Item>,
        // A tick passed with nothing to emit.
        armed: bool,
        finished: bool,
    }
}

impl<S: Stream> Throttle<S> {
    pub fn new(stream: S, period: Duration) -> Self {
        let mut interval = interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { stream, interval, pending: None, armed: false, finished: false }
    }
}

impl<S: Stream> Stream for Throttle<S> {
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        while !*this.finished {
            match this.stream.as_mut().poll_next(cx) {
                Poll::Ready(Some(item)) => *this.pending = Some(item),
                Poll::Ready(None) => *this.finished = true,
                Poll::Pending => break,
            }
        }

        if *this.finished {
            // Flush the newest item without waiting for the next tick.
            return Poll::Ready(this.pending.take());
        }

        if !*this.armed && this.interval.poll_tick(cx).is_ready() {
            *this.armed = true;
        }
        if *this.armed {
            if let Some(item) = this.pending.take() {
                *this.armed = false;
                return Poll::Ready(Some(item));
            }
        }
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::ReceiverStream;

    #[tokio::test(start_paused = true)]
    async fn keeps_only_the_newest_item_per_period() {
        let (tx, rx) = mpsc::channel(16);
        let mut throttled = ReceiverStream::new(rx).throttle(Duration::from_millis(100));

        tx.send(1).await.expect("open");
        assert_eq!(throttled.next().await, Some(1));

        for value in 2..=4 {
            tx.send(value).await.expect("open");
        }
        assert_eq!(throttled.next().await, Some(4));

        drop(tx);
        assert_eq!(throttled.next().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn flushes_pending_item_when_source_ends() {
        let (tx, rx) = mpsc::channel(4);
        let mut throttled = ReceiverStream::new(rx).throttle(Duration::from_secs(5));

        tx.send("first").await.expect("open");
        assert_eq!(throttled.next().await, Some("first"));
        tx.send("last").await.expect("open");
        drop(tx);
        assert_eq!(throttled.next().await, Some("last"));
        assert_eq!(throttled.next().await, None);
    }
}
