//! The value handed to a completion callback.

use sonic_rs::{JsonContainerTrait, JsonValueMutTrait, JsonValueTrait, Value};

use crate::poster::PostError;

/// Wire name of the field echoing the request URL.
pub const REQUEST_URL_FIELD: &str = "_request_url";
/// Wire name of the field carrying the HTTP status code.
pub const STATUS_FIELD: &str = "_status";

/// A parsed JSON object body together with the URL it was posted to and the
/// status the server answered with.
///
/// The status is never interpreted here: a 404 body is delivered exactly like
/// a 200 body, and callers who care branch on [`ResponseEnvelope::status`].
#[derive(Clone, Debug, PartialEq)]
pub struct ResponseEnvelope {
    pub body: Value,
    pub request_url: String,
    pub status: u16,
}

impl ResponseEnvelope {
    /// Parses a completed response body. The body must be a JSON object.
    pub fn parse(
        request_url: impl Into<String>,
        status: u16,
        body: &[u8],
    ) -> Result<Self, PostError> {
        let request_url = request_url.into();
        let body: Value = match sonic_rs::from_slice(body) {
            Ok(value) => value,
            Err(err) => {
                return Err(PostError::malformed(request_url, status, err.to_string()));
            }
        };
        if !body.is_object() {
            return Err(PostError::malformed(
                request_url,
                status,
                "response body is not a JSON object",
            ));
        }

        Ok(Self {
            body,
            request_url,
            status,
        })
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn request_url(&self) -> &str {
        &self.request_url
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Borrows a field of the server's body. The injected wire fields are not
    /// visible here unless the server sent them itself. A repeated key
    /// resolves to its last value, as in the wire form.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.body.as_object().and_then(|object| {
            object
                .iter()
                .filter(|(name, _)| *name == key)
                .last()
                .map(|(_, value)| value)
        })
    }

    /// The wire form: the body with `_request_url` and `_status` set,
    /// replacing any fields of the same name the server sent.
    pub fn into_value(self) -> Value {
        let mut body = self.body;
        if let Some(object) = body.as_object_mut() {
            object.insert(REQUEST_URL_FIELD, Value::from(self.request_url.as_str()));
            object.insert(STATUS_FIELD, Value::from(u64::from(self.status)));
        }
        body
    }

    pub fn to_json_string(&self) -> String {
        let value = self.clone().into_value();
        // Serializing an in-memory Value cannot fail.
        sonic_rs::to_string(&value).unwrap_or_default()
    }
}
