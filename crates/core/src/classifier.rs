//! Job kind classification.
//!
//! A chat post is inspected once; the resulting kind is persisted on the job
//! and reused on every later attempt.

use std::sync::Arc;

use tracing::info;

use crate::acquisition::{ChatSource, ContentItem};
use crate::job::{Job, JobKind, JobStore};
use crate::pipeline::{PipelineError, Stage, TerminalError};
use crate::reference::Reference;

/// Kind for a fetched post. Audio/video always wins over text, images and documents.
pub fn classify(item: &ContentItem) -> Result<JobKind, TerminalError> {
    if item.has_av() {
        Ok(JobKind::Media)
    } else if item.has_text() || !item.attachments.is_empty() {
        Ok(JobKind::Ingest)
    } else {
        Err(TerminalError::Unsupported(format!(
            "post {} has neither text nor attachments",
            item.id
        )))
    }
}

pub struct Classifier {
    store: Arc<dyn JobStore>,
    chat: Option<Arc<dyn ChatSource>>,
}

impl Classifier {
    pub fn new(store: Arc<dyn JobStore>, chat: Option<Arc<dyn ChatSource>>) -> Self {
        Self { store, chat }
    }

    /// The job's kind, classifying and persisting it when still undetermined.
    pub async fn resolve(&self, job: &Job, reference: &Reference) -> Result<JobKind, PipelineError> {
        if job.kind != JobKind::Undetermined {
            return Ok(job.kind);
        }

        let kind = match reference {
            Reference::External(_) => JobKind::External,
            Reference::Chat(link) => {
                let chat = self.chat.as_ref().ok_or_else(|| {
                    TerminalError::Unsupported("no chat backend is configured".to_string())
                        .at(Stage::Classify)
                })?;
                let item = chat
                    .fetch_item(link)
                    .await
                    .map_err(|e| PipelineError::acquisition(Stage::Classify, e))?;
                classify(&item).map_err(|e| e.at(Stage::Classify))?
            }
        };

        self.store.set_kind(&job.id, kind)?;
        info!(job_id = %job.id, kind = %kind, "Job classified");
        Ok(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{CreateJobRequest, MediaKind, SqliteJobStore};
    use crate::reference::parse_reference;
    use crate::testing::fixtures;
    use crate::testing::MockChatSource;

    #[test]
    fn test_av_wins_over_text() {
        let item = fixtures::post(7, Some("look at this"), vec![
            fixtures::attachment(MediaKind::Image),
            fixtures::attachment(MediaKind::Voice),
        ]);
        assert_eq!(classify(&item).unwrap(), JobKind::Media);
    }

    #[test]
    fn test_text_and_documents_ingest() {
        let item = fixtures::post(7, Some("just words"), vec![]);
        assert_eq!(classify(&item).unwrap(), JobKind::Ingest);

        let item = fixtures::post(8, None, vec![fixtures::attachment(MediaKind::Document)]);
        assert_eq!(classify(&item).unwrap(), JobKind::Ingest);
    }

    #[test]
    fn test_empty_post_is_terminal() {
        let item = fixtures::post(9, Some("   "), vec![]);
        assert!(matches!(
            classify(&item),
            Err(TerminalError::Unsupported(_))
        ));
    }

    #[tokio::test]
    async fn test_resolve_caches_kind() {
        let store: Arc<dyn JobStore> = Arc::new(SqliteJobStore::in_memory().unwrap());
        let chat = Arc::new(MockChatSource::new());
        let reference = parse_reference("https://t.me/somechan/12").unwrap();
        chat.add_item(
            "somechan",
            fixtures::post(12, None, vec![fixtures::attachment(MediaKind::Audio)]),
        )
        .await;

        let job = store
            .create(CreateJobRequest::new(reference.identity_key(), JobKind::Undetermined))
            .unwrap();
        let classifier = Classifier::new(store.clone(), Some(chat.clone()));

        assert_eq!(
            classifier.resolve(&job, &reference).await.unwrap(),
            JobKind::Media
        );
        assert_eq!(chat.fetch_count().await, 1);

        let job = store.get(&job.id).unwrap().unwrap();
        assert_eq!(job.kind, JobKind::Media);
        assert_eq!(
            classifier.resolve(&job, &reference).await.unwrap(),
            JobKind::Media
        );
        assert_eq!(chat.fetch_count().await, 1);
    }
}
