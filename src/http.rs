//! Transport primitives for AppNexus API calls.
//!
//! The module exposes the [`Transport`] trait, the only dependency the client has on an HTTP
//! stack, together with the request/response value types that cross it. The bundled
//! [`ReqwestTransport`] (feature `reqwest`) speaks the AppNexus JSON envelope: every reply carries a
//! `response` object, and failures set `error_id`/`error` inside it.

// crates.io
#[cfg(feature = "reqwest")]
use reqwest::{
	Method, StatusCode,
	header::{HeaderMap, HeaderName, HeaderValue},
};
#[cfg(feature = "reqwest")] use serde_json::Value;
// self
use crate::{_prelude::*, error::ConfigError};
#[cfg(feature = "reqwest")] use crate::error::TransportError;

/// Boxed future returned by [`Transport::call`].
pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + 'a + Send>>;

/// Header carrying the authentication token.
pub const AUTHORIZATION_HEADER: &str = "Authorization";

/// Abstraction over HTTP transports able to reach the API host.
///
/// Implementations must map server rejections onto the client taxonomy:
/// [`Error::Authentication`] for invalid credentials or tokens, [`Error::RateLimitExceeded`] when
/// the server exposes a structured quota signal, and [`Error::Server`] with the verbatim message
/// otherwise. Quota rejections that arrive as plain messages are recognised one layer up.
pub trait Transport
where
	Self: 'static + Send + Sync,
{
	/// Sends `request` and returns the `response` payload.
	fn call(&self, request: ApiRequest) -> TransportFuture<'_, ApiResponse>;
}

/// HTTP verbs supported by the API.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
	/// `GET`
	Get,
	/// `POST`
	Post,
	/// `PUT`
	Put,
	/// `DELETE`
	Delete,
}
impl HttpMethod {
	/// Returns the method token.
	pub const fn as_str(self) -> &'static str {
		match self {
			HttpMethod::Get => "GET",
			HttpMethod::Post => "POST",
			HttpMethod::Put => "PUT",
			HttpMethod::Delete => "DELETE",
		}
	}
}
impl Display for HttpMethod {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outbound API request; built per call and never persisted.
#[derive(Clone, Debug, PartialEq)]
pub struct ApiRequest {
	/// HTTP verb.
	pub method: HttpMethod,
	/// Path relative to the host, or an absolute URL.
	pub url: String,
	/// JSON body; [`serde_json::Value::Null`] sends no body.
	pub body: serde_json::Value,
	/// Extra headers; names are unique ignoring ASCII case.
	pub headers: BTreeMap<String, String>,
}
impl ApiRequest {
	/// Creates a bodiless request.
	pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
		Self { method, url: url.into(), body: serde_json::Value::Null, headers: BTreeMap::new() }
	}

	/// Sets the JSON body.
	pub fn with_body(mut self, body: serde_json::Value) -> Self {
		self.body = body;

		self
	}

	/// Merges extra headers; later names replace earlier ones regardless of case.
	pub fn with_headers<I, K, V>(mut self, headers: I) -> Self
	where
		I: IntoIterator<Item = (K, V)>,
		K: Into<String>,
		V: Into<String>,
	{
		for (name, value) in headers {
			self.insert_header(name.into(), value.into());
		}

		self
	}

	/// Sets a single header, replacing any previous value under the same name in any case.
	pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.insert_header(name.into(), value.into());

		self
	}

	/// Value of the header `name`, compared ignoring ASCII case.
	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers
			.iter()
			.find(|(existing, _)| existing.eq_ignore_ascii_case(name))
			.map(|(_, value)| value.as_str())
	}

	fn insert_header(&mut self, name: String, value: String) {
		self.headers.retain(|existing, _| !existing.eq_ignore_ascii_case(&name));
		self.headers.insert(name, value);
	}

	/// Resolves the request URL against the host's base URL.
	pub fn resolve(&self, base: &Url) -> Result<Url, ConfigError> {
		base.join(self.url.trim_start_matches('/'))
			.map_err(|source| ConfigError::InvalidUrl { url: self.url.clone(), source })
	}
}

/// Successful API payload: the `response` member of the reply envelope.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApiResponse(pub serde_json::Value);
impl ApiResponse {
	/// Returns the raw JSON payload.
	pub fn as_value(&self) -> &serde_json::Value {
		&self.0
	}

	/// Consumes the response and returns the raw JSON payload.
	pub fn into_value(self) -> serde_json::Value {
		self.0
	}

	/// Looks up a string field of the payload.
	pub fn str_field(&self, name: &str) -> Option<&str> {
		self.0.get(name).and_then(serde_json::Value::as_str)
	}
}

/// Reply envelope wrapping every API response.
#[derive(Clone, Debug, Deserialize)]
pub struct ResponseEnvelope {
	/// Payload, including error fields on failure.
	pub response: ResponseBody,
}

/// Interesting fields of the `response` member.
#[derive(Clone, Debug, Deserialize)]
pub struct ResponseBody {
	/// `"OK"` on success.
	#[serde(default)]
	pub status: Option<String>,
	/// Error identifier such as `NOAUTH` or `UNAUTH`.
	#[serde(default)]
	pub error_id: Option<String>,
	/// Human-readable error message.
	#[serde(default)]
	pub error: Option<String>,
	/// Everything else.
	#[serde(flatten)]
	pub rest: serde_json::Map<String, serde_json::Value>,
}
impl ResponseBody {
	/// Error identifier the API uses for missing or expired tokens.
	pub const NOAUTH: &'static str = "NOAUTH";

	/// Classifies the body into a payload or a client error.
	pub fn into_result(self, status: Option<u16>) -> Result<ApiResponse> {
		if self.error_id.is_none() && self.error.is_none() {
			let mut payload = self.rest;

			if let Some(status) = self.status {
				payload.insert("status".into(), serde_json::Value::String(status));
			}

			return Ok(ApiResponse(serde_json::Value::Object(payload)));
		}

		let message = self.error.clone().unwrap_or_else(|| {
			self.error_id.clone().unwrap_or_else(|| "Unknown API error".to_owned())
		});

		if self.error_id.as_deref() == Some(Self::NOAUTH) {
			return Err(Error::Authentication { reason: message });
		}
		if status == Some(429) {
			return Err(Error::RateLimitExceeded { message });
		}

		Err(Error::Server { message, error_id: self.error_id, status })
	}
}

/// Thin wrapper around [`ReqwestClient`] bound to one API host.
///
/// JSON bodies are sent for every verb but `GET`; the `Authorization` header set by the auth layer
/// is forwarded untouched.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
	client: ReqwestClient,
	base_url: Url,
}
#[cfg(feature = "reqwest")]
impl ReqwestTransport {
	/// Creates a transport with a default reqwest client.
	pub fn new(base_url: Url) -> Result<Self, ConfigError> {
		let client = ReqwestClient::builder().build()?;

		Ok(Self::with_client(client, base_url))
	}

	/// Wraps an existing reqwest [`ReqwestClient`].
	pub fn with_client(client: ReqwestClient, base_url: Url) -> Self {
		Self { client, base_url }
	}

	/// Base URL every request is resolved against.
	pub fn base_url(&self) -> &Url {
		&self.base_url
	}

	fn build_request(&self, request: &ApiRequest) -> Result<reqwest::Request> {
		let url = request.resolve(&self.base_url)?;
		let method = match request.method {
			HttpMethod::Get => Method::GET,
			HttpMethod::Post => Method::POST,
			HttpMethod::Put => Method::PUT,
			HttpMethod::Delete => Method::DELETE,
		};
		let mut headers = HeaderMap::with_capacity(request.headers.len());

		for (name, value) in &request.headers {
			let invalid = || ConfigError::InvalidHeader { name: name.clone() };
			let header = HeaderName::from_bytes(name.as_bytes()).map_err(|_| invalid())?;
			let value = HeaderValue::from_str(value).map_err(|_| invalid())?;

			headers.insert(header, value);
		}

		let mut builder = self.client.request(method, url).headers(headers);

		if request.method != HttpMethod::Get && !request.body.is_null() {
			builder = builder.json(&request.body);
		}

		builder.build().map_err(|e| ConfigError::from(e).into())
	}
}
#[cfg(feature = "reqwest")]
impl Transport for ReqwestTransport {
	fn call(&self, request: ApiRequest) -> TransportFuture<'_, ApiResponse> {
		Box::pin(async move {
			let outbound = self.build_request(&request)?;
			let response = self.client.execute(outbound).await.map_err(TransportError::from)?;
			let status = response.status();
			let bytes = response.bytes().await.map_err(TransportError::from)?;

			parse_reply(status, &bytes)
		})
	}
}

#[cfg(feature = "reqwest")]
fn parse_reply(status: StatusCode, bytes: &[u8]) -> Result<ApiResponse> {
	let code = Some(status.as_u16());
	let mut de = serde_json::Deserializer::from_slice(bytes);

	match serde_path_to_error::deserialize::<_, ResponseEnvelope>(&mut de) {
		Ok(envelope) => envelope.response.into_result(code),
		Err(_) if status == StatusCode::TOO_MANY_REQUESTS =>
			Err(Error::RateLimitExceeded { message: body_preview(bytes) }),
		Err(_) if status == StatusCode::UNAUTHORIZED =>
			Err(Error::Authentication { reason: body_preview(bytes) }),
		Err(_) if !status.is_success() => Err(Error::Server {
			message: body_preview(bytes),
			error_id: None,
			status: code,
		}),
		Err(source) => Err(TransportError::Envelope { source, status: code }.into()),
	}
}

#[cfg(feature = "reqwest")]
fn body_preview(bytes: &[u8]) -> String {
	const LIMIT: usize = 256;

	let text = String::from_utf8_lossy(bytes);
	let trimmed = text.trim();

	match serde_json::from_str::<Value>(trimmed) {
		Ok(Value::String(message)) => message,
		_ => trimmed.chars().take(LIMIT).collect(),
	}
}
