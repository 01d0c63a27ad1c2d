//! Fail-open helper for best-effort operations
//!
//! Use this for cleanup and display-only calls, such as closing the MCP
//! session or fetching the account balance before a run. Never for the
//! handshake itself.

use std::future::Future;
use tracing::warn;

use crate::Result;

/// Execute an operation whose failure must not abort the caller
///
/// Logs the error via `tracing::warn!` on failure and returns `None`.
///
/// ```no_run
/// use xcat_core::fail_open::fail_open;
/// use xcat_core::Result;
///
/// async fn close_session() -> Result<()> {
///     Ok(())
/// }
///
/// async fn example() {
///     let closed = fail_open("toolset.close", || close_session()).await;
///     // closed is None if close_session() failed
/// }
/// ```
pub async fn fail_open<F, Fut, T>(operation_name: &str, f: F) -> Option<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match f().await {
        Ok(val) => Some(val),
        Err(e) => {
            warn!("{} failed (fail-open): {}", operation_name, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::XcatError;

    #[tokio::test]
    async fn test_fail_open_success() {
        let result = fail_open("test_op", || async { Ok::<_, XcatError>(42) }).await;
        assert_eq!(result, Some(42));
    }

    #[tokio::test]
    async fn test_fail_open_failure() {
        let result = fail_open("test_op", || async {
            Err::<i32, _>(XcatError::Transport("connection reset".to_string()))
        })
        .await;
        assert_eq!(result, None);
    }
}
