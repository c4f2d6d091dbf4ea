use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use bytes::Bytes;
use serde::Serialize;
use sonic_rs::to_vec;

use super::adapter::{
    RestBytes, RestError, RestFuture, RestRequest, RestResponse, RestResult, RestTransport,
};

#[derive(Clone, Debug, Default)]
pub enum MockBehavior {
    #[default]
    Pass,
    Delay(Duration),
    ConnectError {
        reason: String,
    },
    SendError {
        reason: String,
    },
    ReceiveError {
        status: Option<u16>,
        reason: String,
    },
    InternalError {
        reason: String,
    },
}

impl MockBehavior {
    pub fn pass() -> Self {
        Self::Pass
    }

    pub fn delay(ms: u64) -> Self {
        Self::Delay(Duration::from_millis(ms))
    }

    pub fn connect_error(reason: impl Into<String>) -> Self {
        Self::ConnectError {
            reason: reason.into(),
        }
    }

    pub fn send_error(reason: impl Into<String>) -> Self {
        Self::SendError {
            reason: reason.into(),
        }
    }

    pub fn receive_error(reason: impl Into<String>, status: Option<u16>) -> Self {
        Self::ReceiveError {
            status,
            reason: reason.into(),
        }
    }

    pub fn internal_error(reason: impl Into<String>) -> Self {
        Self::InternalError {
            reason: reason.into(),
        }
    }
}

/// Behaviors consumed one per request, in order. An exhausted plan passes.
#[derive(Clone, Debug, Default)]
pub struct MockBehaviorPlan {
    request: VecDeque<MockBehavior>,
}

impl MockBehaviorPlan {
    pub fn push(&mut self, behavior: MockBehavior) -> &mut Self {
        self.request.push_back(behavior);
        self
    }

    fn pop(&mut self) -> MockBehavior {
        self.request.pop_front().unwrap_or_default()
    }
}

#[derive(Clone, Debug)]
pub struct MockResponse {
    pub status: u16,
    pub headers: Vec<(String, RestBytes)>,
    pub body: RestBytes,
}

impl MockResponse {
    pub fn new(status: u16, body: impl Into<RestBytes>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<RestBytes>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self::new(status, body.into())
    }

    pub fn json<T: Serialize>(status: u16, payload: &T) -> RestResult<Self> {
        let body = to_vec(payload).map_err(|err| RestError::internal(err.to_string()))?;
        Ok(Self::new(status, body))
    }
}

#[derive(Clone, Debug)]
pub struct MockRestStateSnapshot {
    pub request_count: usize,
    pub in_flight: usize,
    pub last_url: Option<String>,
    pub last_status: Option<u16>,
    pub behavior_remaining: usize,
    pub response_queue_len: usize,
    pub route_queue_len: usize,
    pub inbound_count: usize,
    pub outbound_count: usize,
    pub elapsed_total: Duration,
    pub last_error: Option<String>,
}

#[derive(Debug, Default)]
struct MockRestAdapterState {
    request_count: usize,
    in_flight: usize,
    last_url: Option<String>,
    last_status: Option<u16>,
    behavior_plan: MockBehaviorPlan,
    default_response_queue: VecDeque<MockResponse>,
    route_response_queues: HashMap<String, VecDeque<MockResponse>>,
    outbound_log: Vec<RestRequest>,
    inbound_log: Vec<RestResponse>,
    last_error: Option<String>,
    elapsed_total: Duration,
}

impl MockRestAdapterState {
    fn snapshot(&self) -> MockRestStateSnapshot {
        MockRestStateSnapshot {
            request_count: self.request_count,
            in_flight: self.in_flight,
            last_url: self.last_url.clone(),
            last_status: self.last_status,
            behavior_remaining: self.behavior_plan.request.len(),
            response_queue_len: self.default_response_queue.len(),
            route_queue_len: self.route_response_queues.values().map(VecDeque::len).sum(),
            inbound_count: self.inbound_log.len(),
            outbound_count: self.outbound_log.len(),
            elapsed_total: self.elapsed_total,
            last_error: self.last_error.clone(),
        }
    }
}

/// In-memory transport. Responses are queued per URL (falling back to a shared
/// queue, then to an empty `200`), and every request is logged as sent.
#[derive(Clone, Debug, Default)]
pub struct MockRestAdapter {
    state: Arc<Mutex<MockRestAdapterState>>,
}

impl MockRestAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_behavior_plan(behavior_plan: MockBehaviorPlan) -> Self {
        let state = MockRestAdapterState {
            behavior_plan,
            ..MockRestAdapterState::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn snapshot(&self) -> MockRestStateSnapshot {
        self.state
            .lock()
            .expect("mock-poster mutex poisoned while taking snapshot")
            .snapshot()
    }

    pub fn queue_response(&self, response: MockResponse) {
        self.state
            .lock()
            .expect("mock-poster mutex poisoned while queueing response")
            .default_response_queue
            .push_back(response);
    }

    pub fn queue_post_response(&self, url: impl Into<String>, response: MockResponse) {
        self.state
            .lock()
            .expect("mock-poster mutex poisoned while queueing response by url")
            .route_response_queues
            .entry(url.into())
            .or_default()
            .push_back(response);
    }

    pub fn queue_post_text(&self, url: impl Into<String>, status: u16, body: impl Into<String>) {
        self.queue_post_response(url, MockResponse::text(status, body));
    }

    pub fn queue_post_json<T: Serialize>(
        &self,
        url: impl Into<String>,
        status: u16,
        payload: &T,
    ) -> RestResult<()> {
        let response = MockResponse::json(status, payload)?;
        self.queue_post_response(url, response);
        Ok(())
    }

    /// Requests in the order they reached the transport.
    pub fn outbound_requests(&self) -> Vec<RestRequest> {
        self.state
            .lock()
            .expect("mock-poster mutex poisoned while reading outbound log")
            .outbound_log
            .clone()
    }

    pub fn outbound_count(&self) -> usize {
        self.state
            .lock()
            .expect("mock-poster mutex poisoned while reading outbound count")
            .outbound_log
            .len()
    }

    pub fn inbound_count(&self) -> usize {
        self.state
            .lock()
            .expect("mock-poster mutex poisoned while reading inbound count")
            .inbound_log
            .len()
    }

    pub fn clear_logs(&self) {
        let mut state = self
            .state
            .lock()
            .expect("mock-poster mutex poisoned while clearing logs");
        state.outbound_log.clear();
        state.inbound_log.clear();
    }

    /// Logs the request as sent and picks the behavior that applies to it.
    fn begin(&self, request: &RestRequest) -> MockBehavior {
        let mut state = self
            .state
            .lock()
            .expect("mock-poster mutex poisoned while starting request");
        state.outbound_log.push(request.clone());
        state.request_count += 1;
        state.in_flight += 1;
        state.last_url = Some(request.url.clone());
        state.last_error = None;
        state.behavior_plan.pop()
    }

    fn next_response(&self, request: &RestRequest) -> Option<MockResponse> {
        let mut state = self
            .state
            .lock()
            .expect("mock-poster mutex poisoned while selecting response");
        if let Some(queue) = state.route_response_queues.get_mut(&request.url) {
            if let Some(response) = queue.pop_front() {
                return Some(response);
            }
        }
        state.default_response_queue.pop_front()
    }

    fn fail(&self, error: RestError) -> RestError {
        let mut state = self
            .state
            .lock()
            .expect("mock-poster mutex poisoned while recording error");
        state.in_flight -= 1;
        state.last_error = Some(error.message.clone());
        state.last_status = error.status;
        error
    }

    fn finish(&self, response: &RestResponse) {
        let mut state = self
            .state
            .lock()
            .expect("mock-poster mutex poisoned while recording inbound response");
        state.in_flight -= 1;
        state.last_status = Some(response.status);
        state.elapsed_total += response.elapsed;
        state.inbound_log.push(response.clone());
    }
}

impl RestTransport for MockRestAdapter {
    fn execute(&self, request: RestRequest) -> RestFuture<RestResult<RestResponse>> {
        let adapter = self.clone();
        Box::pin(async move {
            let start = Instant::now();
            let behavior = adapter.begin(&request);

            match behavior {
                MockBehavior::ConnectError { reason } => {
                    return Err(adapter.fail(RestError::connect(reason)));
                }
                MockBehavior::SendError { reason } => {
                    return Err(adapter.fail(RestError::send(reason)));
                }
                MockBehavior::ReceiveError { status, reason } => {
                    return Err(adapter.fail(RestError::receive(reason, status)));
                }
                MockBehavior::InternalError { reason } => {
                    return Err(adapter.fail(RestError::internal(reason)));
                }
                MockBehavior::Delay(duration) => tokio::time::sleep(duration).await,
                MockBehavior::Pass => {}
            }

            let response = match adapter.next_response(&request) {
                Some(response) => RestResponse {
                    status: response.status,
                    headers: response.headers,
                    body: response.body,
                    elapsed: start.elapsed(),
                },
                None => RestResponse {
                    status: 200,
                    headers: Vec::new(),
                    body: Bytes::new(),
                    elapsed: start.elapsed(),
                },
            };
            adapter.finish(&response);
            Ok(response)
        })
    }
}
