use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::debug;

use vellora_core::error::{Result, VelloraError};
use vellora_core::traits::{Catalog, ToolAdapter};

/// Resolve a lecture id to its video reference.
pub struct LectureLookup {
    catalog: Arc<dyn Catalog>,
}

impl LectureLookup {
    pub fn new(catalog: Arc<dyn Catalog>) -> Self {
        Self { catalog }
    }
}

impl ToolAdapter for LectureLookup {
    type Args = String;
    type Output = String;

    fn name(&self) -> &str {
        "lecture_lookup"
    }

    fn invoke(&self, lecture_id: String) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            match self.catalog.video_reference(&lecture_id).await? {
                Some(video) if !video.trim().is_empty() => {
                    debug!(lecture_id = %lecture_id, video = %video, "Lecture resolved");
                    Ok(video)
                }
                _ => Err(VelloraError::NotFound(format!("lecture {}", lecture_id))),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vellora_test_utils::StubCatalog;

    #[tokio::test]
    async fn resolves_known_lecture() {
        let catalog = StubCatalog::new().with_lecture("lec-42", "dQw4w9WgXcQ");
        let lookup = LectureLookup::new(Arc::new(catalog));
        assert_eq!(lookup.invoke("lec-42".into()).await.unwrap(), "dQw4w9WgXcQ");
    }

    #[tokio::test]
    async fn unknown_lecture_is_not_found() {
        let lookup = LectureLookup::new(Arc::new(StubCatalog::new()));
        let err = lookup.invoke("lec-0".into()).await.unwrap_err();
        assert!(matches!(err, VelloraError::NotFound(_)));
    }
}
