use crate::SearchError;
use async_trait::async_trait;

/// Produces an answer from retrieved notes.
#[async_trait]
pub trait AnswerGenerator {
    async fn answer(&self, context: &str, query: &str) -> Result<String, SearchError>;
}

#[async_trait]
impl<G> AnswerGenerator for Box<G>
where
    G: AnswerGenerator + Send + Sync + ?Sized,
{
    async fn answer(&self, context: &str, query: &str) -> Result<String, SearchError> {
        (**self).answer(context, query).await
    }
}
