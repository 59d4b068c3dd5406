use std::future::Future;

/// Invokes `f(start, stop)` for consecutive non-overlapping windows covering
/// `[0, len)`, each at most `window` wide. Stops at the first callback error.
///
/// Returns the number of windows invoked together with the first error, if
/// any. Callers that tolerate per-window failures absorb them inside the
/// callback and tally there; the external services this crate talks to cap
/// their batch sizes, so every fan-out goes through here.
pub async fn each_window<F, Fut, E>(len: usize, window: usize, mut f: F) -> (usize, Result<(), E>)
where
    F: FnMut(usize, usize) -> Fut,
    Fut: Future<Output = Result<(), E>>,
{
    debug_assert!(window > 0, "window size must be non-zero");

    let mut invoked = 0;
    let mut start = 0;
    while start < len {
        let stop = len.min(start + window);
        invoked += 1;
        if let Err(e) = f(start, stop).await {
            return (invoked, Err(e));
        }
        start = stop;
    }

    (invoked, Ok(()))
}
