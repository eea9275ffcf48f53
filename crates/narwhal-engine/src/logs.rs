use std::sync::Arc;
use std::time::Duration;

use narwhal_common::{LogQuery, NarwhalError, Result};
use tracing::{debug, instrument};

use crate::engine::{EngineClient, LogRequest, LogStream};
use crate::error::{classify, engine_message, is_bad_request, with_deadline};

/// Opens container log streams.
///
/// The returned [`LogStream`] belongs to the caller; dropping it closes the
/// engine connection. In follow mode the stream has no natural end, so the
/// caller's lifetime is what bounds it.
#[derive(Clone)]
pub struct LogGateway {
    engine: Arc<dyn EngineClient>,
    request_timeout: Duration,
}

impl LogGateway {
    pub fn new(engine: Arc<dyn EngineClient>, request_timeout: Duration) -> Self {
        Self {
            engine,
            request_timeout,
        }
    }

    /// Engine options for a query: both output streams, timestamps and details on.
    pub fn request(query: &LogQuery) -> LogRequest {
        LogRequest {
            stdout: true,
            stderr: true,
            follow: query.follow,
            tail: query.tail,
            since: query.since.clone(),
            timestamps: true,
            details: true,
        }
    }

    #[instrument(skip(self, query), fields(container_id = %id, tail = query.tail, follow = query.follow))]
    pub async fn open(&self, id: &str, query: &LogQuery) -> Result<LogStream> {
        // The engine only reports a missing container once the stream is
        // polled, which is too late to pick a response status.
        with_deadline(
            self.request_timeout,
            "container lookup",
            self.engine.inspect_container(id),
        )
        .await?
        .map_err(|e| classify(e, NarwhalError::Engine))?;

        let stream = with_deadline(
            self.request_timeout,
            "log stream open",
            self.engine.logs(id, Self::request(query)),
        )
        .await?
        .map_err(|e| {
            if is_bad_request(&e) {
                NarwhalError::Validation(engine_message(&e))
            } else {
                classify(e, NarwhalError::Engine)
            }
        })?;

        debug!("Log stream opened");
        Ok(stream)
    }
}
