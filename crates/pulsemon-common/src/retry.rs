use std::future::Future;
use std::time::Duration;

/// Classification hook for [`with_retry`]: only transient failures are
/// worth another attempt. Cancellation, validation and not-found errors
/// must report `false`.
pub trait Retryable {
    fn is_transient(&self) -> bool;
}

const RETRY_DELAYS: [Duration; 2] = [Duration::from_secs(1), Duration::from_secs(3)];

/// Runs `op` up to three times, sleeping 1s then 3s between attempts.
/// Non-transient errors are returned immediately.
pub async fn with_retry<T, E, F, Fut>(mut op: F) -> Result<T, E>
where
    E: Retryable,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < RETRY_DELAYS.len() && err.is_transient() => {
                tokio::time::sleep(RETRY_DELAYS[attempt]).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
