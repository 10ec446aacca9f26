//! Retry-until-cancelled driver.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Run `handler` to completion over and over.
///
/// An `Err` from the handler stops the loop and is returned. Cancellation is
/// checked at every iteration boundary and ends the loop with `Ok(())`; the
/// handler receives the token so a long run can wind down early. `delay`
/// separates consecutive runs.
pub async fn run_until_cancelled<F, Fut, E>(
    cancel: CancellationToken,
    delay: Duration,
    mut handler: F,
) -> Result<(), E>
where
    F: FnMut(CancellationToken) -> Fut,
    Fut: Future<Output = Result<(), E>>,
{
    loop {
        if cancel.is_cancelled() {
            return Ok(());
        }
        handler(cancel.clone()).await?;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
