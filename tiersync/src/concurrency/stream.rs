use core::pin::Pin;
use core::task::{Context, Poll};
use std::time::Duration;

use futures::{Future, Stream, ready};
use pin_project_lite::pin_project;
use tracing::info;

use crate::concurrency::shutdown::{ShutdownResult, ShutdownRx};

pin_project! {
    /// A stream adapter grouping items into batches of at most `max_size` items.
    ///
    /// A batch is emitted when it is full, when the inner stream ends, or when `max_fill` has
    /// elapsed since the batch started filling. Once shutdown is requested the buffered items
    /// are emitted as [`ShutdownResult::Shutdown`] and the stream ends.
    #[must_use = "streams do nothing unless polled"]
    #[derive(Debug)]
    pub struct BatchStream<B, S: Stream<Item = B>> {
        #[pin]
        stream: S,
        #[pin]
        deadline: Option<tokio::time::Sleep>,
        shutdown_rx: ShutdownRx,
        items: Vec<S::Item>,
        max_size: usize,
        max_fill: Duration,
        reset_timer: bool,
        finished: bool,
    }
}

impl<B, S: Stream<Item = B>> BatchStream<B, S> {
    pub fn wrap(stream: S, max_size: usize, max_fill: Duration, shutdown_rx: ShutdownRx) -> Self {
        let max_size = max_size.max(1);
        BatchStream {
            stream,
            deadline: None,
            shutdown_rx,
            items: Vec::with_capacity(max_size),
            max_size,
            max_fill,
            reset_timer: true,
            finished: false,
        }
    }
}

impl<B, S: Stream<Item = B>> Stream for BatchStream<B, S> {
    type Item = ShutdownResult<Vec<S::Item>, Vec<S::Item>>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        if *this.finished {
            return Poll::Ready(None);
        }

        loop {
            if this.shutdown_rx.is_shutdown() {
                info!("batch stream stopped due to shutdown signal");
                *this.finished = true;

                return Poll::Ready(Some(ShutdownResult::Shutdown(std::mem::take(this.items))));
            }

            if *this.reset_timer {
                this.deadline
                    .set(Some(tokio::time::sleep(*this.max_fill)));
                *this.reset_timer = false;
            }

            match this.stream.as_mut().poll_next(cx) {
                Poll::Pending => break,
                Poll::Ready(Some(item)) => {
                    this.items.push(item);

                    if this.items.len() >= *this.max_size {
                        *this.reset_timer = true;
                        return Poll::Ready(Some(ShutdownResult::Ok(std::mem::take(this.items))));
                    }
                }
                Poll::Ready(None) => {
                    *this.finished = true;

                    if this.items.is_empty() {
                        return Poll::Ready(None);
                    }

                    return Poll::Ready(Some(ShutdownResult::Ok(std::mem::take(this.items))));
                }
            }
        }

        if !this.items.is_empty() {
            if let Some(deadline) = this.deadline.as_pin_mut() {
                ready!(deadline.poll(cx));
                *this.reset_timer = true;

                return Poll::Ready(Some(ShutdownResult::Ok(std::mem::take(this.items))));
            }
        }

        Poll::Pending
    }
}
