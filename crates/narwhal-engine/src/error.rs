use std::future::Future;
use std::time::Duration;

use bollard::errors::Error as BollardError;
use narwhal_common::{NarwhalError, Result};

pub(crate) fn is_not_found(err: &BollardError) -> bool {
    matches!(
        err,
        BollardError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

pub(crate) fn is_bad_request(err: &BollardError) -> bool {
    matches!(
        err,
        BollardError::DockerResponseServerError {
            status_code: 400,
            ..
        }
    )
}

/// The daemon's own message when it sent one, otherwise the client error text.
pub(crate) fn engine_message(err: &BollardError) -> String {
    match err {
        BollardError::DockerResponseServerError { message, .. } => message.clone(),
        other => other.to_string(),
    }
}

/// Maps an engine failure onto the taxonomy: a 404 from the daemon is always
/// `NotFound`, anything else is wrapped by `wrap`.
pub(crate) fn classify(err: BollardError, wrap: impl FnOnce(String) -> NarwhalError) -> NarwhalError {
    let message = engine_message(&err);
    if is_not_found(&err) {
        NarwhalError::NotFound(message)
    } else {
        wrap(message)
    }
}

/// Runs `fut` under `limit`; expiry drops the in-flight call and reports `Cancelled`.
pub(crate) async fn with_deadline<T>(
    limit: Duration,
    operation: &str,
    fut: impl Future<Output = T>,
) -> Result<T> {
    tokio::time::timeout(limit, fut).await.map_err(|_| {
        NarwhalError::Cancelled(format!(
            "{operation} did not complete within {}s",
            limit.as_secs()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_error(status_code: u16, message: &str) -> BollardError {
        BollardError::DockerResponseServerError {
            status_code,
            message: message.to_string(),
        }
    }

    #[test]
    fn test_not_found_wins_over_wrapper() {
        let err = classify(server_error(404, "No such container: abc"), NarwhalError::Stop);
        assert_eq!(err, NarwhalError::NotFound("No such container: abc".to_string()));
    }

    #[test]
    fn test_message_is_passed_through() {
        let err = classify(
            server_error(409, "Conflict. The container name \"/t1\" is already in use"),
            NarwhalError::Create,
        );
        assert_eq!(
            err,
            NarwhalError::Create("Conflict. The container name \"/t1\" is already in use".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expiry_is_cancelled() {
        let slow = tokio::time::sleep(Duration::from_secs(120));
        let err = with_deadline(Duration::from_secs(5), "inspect", slow)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            NarwhalError::Cancelled("inspect did not complete within 5s".to_string())
        );
    }
}
