use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::error::ModelError;
use crate::events::ResponseEvent;
use crate::request::ModelRequest;

/// Lazy, finite event sequence for one request. Restartable only by issuing a
/// new request.
pub type ResponseStream = BoxStream<'static, Result<ResponseEvent, ModelError>>;

/// Backend capable of streaming model responses.
///
/// Errors returned from [`ModelClient::stream`] describe failures that happen
/// before the first event (rejected request, connection failure). Failures
/// after that are yielded as `Err` items of the stream itself.
#[async_trait]
pub trait ModelClient: Send + Sync + 'static {
    async fn stream(&self, request: ModelRequest) -> Result<ResponseStream, ModelError>;
}
