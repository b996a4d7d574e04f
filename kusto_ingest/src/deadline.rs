use std::{future::Future, time::Duration};

use crate::error::{Error, ErrorKind, Op, Result};

/// Await a remote call, failing with [`ErrorKind::Timeout`] if `timeout` passes first
///
/// Without a timeout the call is only bounded by the caller dropping the future.
pub(crate) async fn bounded<T, F>(timeout: Option<Duration>, op: Op, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>> + Send,
    T: Send,
{
    let res = match timeout {
        Some(timeout) => tokio::time::timeout(timeout, fut)
            .await
            .map_err(|_| Error::new(op, ErrorKind::Timeout(timeout)))?,
        None => fut.await,
    };
    res.map_err(|e| e.with_op(op))
}
