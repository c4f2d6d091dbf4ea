use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Instant,
};

use serde::Serialize;
use tokio::task::JoinHandle;

use crate::adapter::{
    ReqwestTransport, RestBytes, RestRequest, RestResponse, RestTransport, SharedRestTransport,
};
use crate::envelope::ResponseEnvelope;

const LOG_TARGET: &str = "json_poster::poster";

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PostError {
    /// The completed response body was not a JSON object. Network failures end
    /// up here too, with status 0 and an empty body.
    #[error("malformed response body from {url} (status {status}): {reason}")]
    MalformedResponseBody {
        url: String,
        status: u16,
        reason: String,
    },
    /// A structured payload could not be serialized; nothing was sent.
    #[error("payload for {url} could not be serialized: {reason}")]
    InvalidPayload { url: String, reason: String },
    /// The runtime shut down before the post completed; the callback never ran.
    #[error("post to {url} was cancelled before completion")]
    Cancelled { url: String },
}

impl PostError {
    pub fn malformed(url: impl Into<String>, status: u16, reason: impl Into<String>) -> Self {
        Self::MalformedResponseBody {
            url: url.into(),
            status,
            reason: reason.into(),
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::MalformedResponseBody { status, .. } => Some(*status),
            Self::InvalidPayload { .. } | Self::Cancelled { .. } => None,
        }
    }
}

pub type PostResult<T> = Result<T, PostError>;

/// An in-flight post. Awaiting it yields the outcome of the completion path;
/// dropping it leaves the request running.
#[derive(Debug)]
pub struct PostHandle {
    url: String,
    task: JoinHandle<PostResult<()>>,
}

impl PostHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Future for PostHandle {
    type Output = PostResult<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let polled = Pin::new(&mut self.task).poll(cx);
        match polled {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            // A panicking callback is the caller's panic.
            Poll::Ready(Err(err)) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Poll::Ready(Err(_)) => Poll::Ready(Err(PostError::Cancelled {
                url: self.url.clone(),
            })),
        }
    }
}

/// Posts a body to a URL and hands the parsed JSON object, tagged with the URL
/// and status, to a one-shot completion callback.
///
/// Every response that reaches its terminal state is delivered, whatever its
/// status code. The only response failure is a body that does not parse as a
/// JSON object.
#[derive(Clone)]
pub struct HttpPoster {
    transport: SharedRestTransport,
}

impl HttpPoster {
    pub fn new() -> Self {
        Self::with_transport(ReqwestTransport::new())
    }

    pub fn with_transport<T>(transport: T) -> Self
    where
        T: RestTransport + 'static,
    {
        Self {
            transport: Arc::new(transport),
        }
    }

    /// Sends `data` unmodified as the body of `POST url` and returns without
    /// waiting for the response.
    ///
    /// `callback`, when present, runs exactly once after the response is
    /// complete. When it is `None` the body is never parsed, so no response
    /// content can make the post fail.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn post<F>(
        &self,
        url: impl Into<String>,
        data: impl Into<RestBytes>,
        callback: Option<F>,
    ) -> PostHandle
    where
        F: FnOnce(ResponseEnvelope) + Send + 'static,
    {
        self.post_request(RestRequest::post(url).with_body(data), callback)
    }

    pub fn post_without_callback(
        &self,
        url: impl Into<String>,
        data: impl Into<RestBytes>,
    ) -> PostHandle {
        self.post::<fn(ResponseEnvelope)>(url, data, None)
    }

    /// Serializes `payload` as JSON and posts it.
    pub fn post_json<T, F>(
        &self,
        url: impl Into<String>,
        payload: &T,
        callback: Option<F>,
    ) -> PostResult<PostHandle>
    where
        T: Serialize + ?Sized,
        F: FnOnce(ResponseEnvelope) + Send + 'static,
    {
        let url = url.into();
        let body = sonic_rs::to_vec(payload).map_err(|err| PostError::InvalidPayload {
            url: url.clone(),
            reason: err.to_string(),
        })?;
        Ok(self.post(url, body, callback))
    }

    /// Posts a prebuilt request, e.g. one carrying extra headers.
    pub fn post_request<F>(&self, request: RestRequest, callback: Option<F>) -> PostHandle
    where
        F: FnOnce(ResponseEnvelope) + Send + 'static,
    {
        let transport = self.transport.clone();
        let url = request.url.clone();
        tracing::debug!(target: LOG_TARGET, "POST {} dispatched", request.url);
        let task = tokio::spawn(async move {
            let url = request.url.clone();
            let response = complete(transport.as_ref(), request).await;
            let result = deliver(url, response, callback);
            if let Err(err) = &result {
                tracing::error!(target: LOG_TARGET, "post completion failed: {}", err);
            }
            result
        });
        PostHandle { url, task }
    }

    /// The awaitable form of [`HttpPoster::post`]: resolves to the envelope the
    /// callback would have received.
    pub async fn post_envelope(
        &self,
        url: impl Into<String>,
        data: impl Into<RestBytes>,
    ) -> PostResult<ResponseEnvelope> {
        let request = RestRequest::post(url).with_body(data);
        let url = request.url.clone();
        let response = complete(self.transport.as_ref(), request).await;
        ResponseEnvelope::parse(url, response.status, response.body())
    }
}

impl Default for HttpPoster {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs one request to its terminal state. Transport failures complete the
/// request the way a browser does: status 0, empty body.
async fn complete(transport: &dyn RestTransport, request: RestRequest) -> RestResponse {
    let url = request.url.clone();
    let start = Instant::now();
    match transport.execute(request).await {
        Ok(response) => {
            tracing::debug!(
                target: LOG_TARGET,
                "POST {} completed with status {} ({} bytes in {:?})",
                url,
                response.status,
                response.body.len(),
                response.elapsed
            );
            response
        }
        Err(err) => {
            tracing::warn!(target: LOG_TARGET, "POST {} failed in transport: {}", url, err);
            RestResponse::network_failure(start.elapsed())
        }
    }
}

fn deliver<F>(url: String, response: RestResponse, callback: Option<F>) -> PostResult<()>
where
    F: FnOnce(ResponseEnvelope),
{
    let Some(callback) = callback else {
        return Ok(());
    };
    let envelope = ResponseEnvelope::parse(url, response.status, response.body())?;
    callback(envelope);
    Ok(())
}
