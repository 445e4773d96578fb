//! 测试辅助
//!
//! Enabled for this crate's own tests and, through the `test-util` feature,
//! for the integration tests of the crates above it.

use std::future::Future;
use std::pin::Pin;
use std::task::Poll;

/// Poll a future exactly once; `None` if it is still pending
pub async fn poll_once<F: Future + Unpin>(mut fut: F) -> Option<F::Output> {
    std::future::poll_fn(|cx| {
        Poll::Ready(match Pin::new(&mut fut).poll(cx) {
            Poll::Ready(output) => Some(output),
            Poll::Pending => None,
        })
    })
    .await
}
