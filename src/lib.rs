//! Fire-and-forget JSON POSTs over reqwest: the response body is parsed as a
//! JSON object, tagged with the request URL and status code, and handed to a
//! one-shot callback. Ships an in-memory mock transport for deterministic
//! tests.

pub mod adapter;
pub mod envelope;
pub mod mock;
pub mod poster;

pub use reqwest::Method;

pub use adapter::{
    ReqwestTransport, RestBytes, RestError, RestErrorKind, RestFuture, RestRequest, RestResponse,
    RestResult, RestTransport,
};
pub use envelope::{REQUEST_URL_FIELD, ResponseEnvelope, STATUS_FIELD};
pub use mock::{MockBehavior, MockBehaviorPlan, MockResponse, MockRestAdapter, MockRestStateSnapshot};
pub use poster::{HttpPoster, PostError, PostHandle, PostResult};
