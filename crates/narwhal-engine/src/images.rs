use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use narwhal_common::{NarwhalError, Result};
use tracing::{debug, info, instrument};

use crate::engine::EngineClient;
use crate::error::{engine_message, is_not_found, with_deadline};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageStatus {
    /// Already available locally; nothing was pulled.
    Present,
    Pulled,
}

/// Makes sure an image is available locally before a container is created from it.
#[derive(Clone)]
pub struct ImageResolver {
    engine: Arc<dyn EngineClient>,
    request_timeout: Duration,
    pull_timeout: Duration,
}

impl ImageResolver {
    pub fn new(engine: Arc<dyn EngineClient>, request_timeout: Duration, pull_timeout: Duration) -> Self {
        Self {
            engine,
            request_timeout,
            pull_timeout,
        }
    }

    /// Looks the image up and pulls it only when the lookup misses.
    ///
    /// The pull is not finished until its progress stream is exhausted, so the
    /// stream is always drained before returning. Progress is logged, not returned.
    #[instrument(skip(self), fields(image = %image))]
    pub async fn ensure_image(&self, image: &str) -> Result<ImageStatus> {
        let lookup = with_deadline(
            self.request_timeout,
            "image lookup",
            self.engine.inspect_image(image),
        )
        .await?;

        match lookup {
            Ok(_) => {
                debug!("Image present locally");
                return Ok(ImageStatus::Present);
            }
            Err(e) if is_not_found(&e) => {}
            // Any other lookup failure is treated as a miss; the pull reports
            // the real problem if there is one.
            Err(e) => debug!(error = %e, "Image lookup failed, pulling"),
        }

        info!("Pulling image");
        let drain = async {
            let mut progress = self.engine.pull_image(image);
            while let Some(item) = progress.next().await {
                let update = item.map_err(|e| NarwhalError::Pull {
                    image: image.to_string(),
                    message: engine_message(&e),
                })?;
                if let Some(status) = update.status {
                    debug!(%status, progress = update.progress.as_deref().unwrap_or(""), "Pull progress");
                }
            }
            Ok::<_, NarwhalError>(())
        };

        with_deadline(self.pull_timeout, "image pull", drain).await??;

        info!("Image pulled");
        Ok(ImageStatus::Pulled)
    }
}
