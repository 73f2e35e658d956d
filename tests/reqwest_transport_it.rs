// std
use std::sync::Arc;
// crates.io
use httpmock::prelude::*;
use parking_lot::Mutex;
use serde_json::json;
use time::Duration;
use url::Url;
// self
use appnexus_client::{
	auth::TokenRecord,
	client::ApiClient,
	config::{ClientConfig, Host},
	error::Error,
	guard::{SleepFuture, Sleeper},
	http::ReqwestTransport,
	store::{MemoryStore, TokenStore},
};

#[derive(Clone, Default)]
struct RecordedWaits(Arc<Mutex<Vec<Duration>>>);
impl Sleeper for RecordedWaits {
	fn sleep(&self, duration: Duration) -> SleepFuture<'_> {
		self.0.lock().push(duration);

		Box::pin(async {})
	}
}

fn host(server: &MockServer) -> Host {
	Host::Custom(Url::parse(&server.base_url()).expect("Mock server URL should parse."))
}

fn config(server: &MockServer) -> ClientConfig {
	ClientConfig::builder()
		.username("api-user")
		.password("api-pass")
		.host(host(server))
		.request_limit_quantity(5)
		.request_limit_seconds(1)
		.build()
		.expect("Configuration should build.")
}

fn client_with_waits(server: &MockServer) -> (ApiClient, RecordedWaits) {
	let config = config(server);
	let base = config.credentials.host.base_url().expect("Mock host should form a base URL.");
	let transport = ReqwestTransport::new(base).expect("Reqwest transport should build.");
	let waits = RecordedWaits::default();
	let client = ApiClient::with_transport(config, Arc::new(transport), Arc::new(waits.clone()))
		.expect("Client should build.");

	(client, waits)
}

#[tokio::test]
async fn first_call_logs_in_and_reuses_the_token() -> color_eyre::Result<()> {
	let server = MockServer::start_async().await;
	let login = server
		.mock_async(|when, then| {
			when.method(POST)
				.path("/auth")
				.json_body(json!({ "auth": { "username": "api-user", "password": "api-pass" } }));
			then.status(200)
				.json_body(json!({ "response": { "status": "OK", "token": "hbapi:1" } }));
		})
		.await;
	let campaign = server
		.mock_async(|when, then| {
			when.method(GET)
				.path("/campaign")
				.query_param("id", "7")
				.header("Authorization", "hbapi:1")
				.header("X-Trace", "abc");
			then.status(200).json_body(json!({
				"response": { "status": "OK", "campaign": { "id": 7, "name": "spring" } }
			}));
		})
		.await;
	let client = ApiClient::new(config(&server))?;

	for _ in 0..2 {
		let response = client.get("campaign?id=7", [("X-Trace", "abc")]).await?;

		assert_eq!(response.as_value()["campaign"]["name"], "spring");
		assert_eq!(response.str_field("status"), Some("OK"));
	}

	login.assert_calls_async(1).await;
	campaign.assert_calls_async(2).await;

	assert_eq!(client.login_metrics().successes(), 1);

	Ok(())
}

#[tokio::test]
async fn post_sends_the_json_body() -> color_eyre::Result<()> {
	let server = MockServer::start_async().await;
	let _login = server
		.mock_async(|when, then| {
			when.method(POST).path("/auth");
			then.status(200)
				.json_body(json!({ "response": { "status": "OK", "token": "hbapi:2" } }));
		})
		.await;
	let create = server
		.mock_async(|when, then| {
			when.method(POST)
				.path("/campaign")
				.header("Authorization", "hbapi:2")
				.json_body(json!({ "campaign": { "name": "autumn" } }));
			then.status(200).json_body(json!({ "response": { "status": "OK", "id": 11 } }));
		})
		.await;
	let (client, _) = client_with_waits(&server);
	let response = client
		.post(
			"campaign",
			json!({ "campaign": { "name": "autumn" } }),
			Vec::<(String, String)>::new(),
		)
		.await?;

	assert_eq!(response.as_value()["id"], 11);

	create.assert_calls_async(1).await;

	Ok(())
}

#[tokio::test]
async fn noauth_on_a_cached_token_refreshes_and_retries_once() -> color_eyre::Result<()> {
	let server = MockServer::start_async().await;
	let login = server
		.mock_async(|when, then| {
			when.method(POST).path("/auth");
			then.status(200)
				.json_body(json!({ "response": { "status": "OK", "token": "fresh" } }));
		})
		.await;
	let rejected = server
		.mock_async(|when, then| {
			when.method(GET).path("/member").header("Authorization", "stale");
			then.status(401).json_body(json!({
				"response": { "error_id": "NOAUTH", "error": "Authentication failed - not logged in" }
			}));
		})
		.await;
	let accepted = server
		.mock_async(|when, then| {
			when.method(GET).path("/member").header("Authorization", "fresh");
			then.status(200)
				.json_body(json!({ "response": { "status": "OK", "member": { "id": 1 } } }));
		})
		.await;
	let config = config(&server);
	let key = config.credentials.store_key()?;
	let store = Arc::new(MemoryStore::default());
	let now = time::OffsetDateTime::now_utc();
	let stale = TokenRecord::builder()
		.token("stale")
		.issued_at(now)
		.expires_in(Duration::hours(1))
		.build()?;

	store.save(&key, stale).await?;

	let base = config.credentials.host.base_url()?;
	let client = ApiClient::with_store(
		config,
		store.clone(),
		Arc::new(ReqwestTransport::new(base)?),
		Arc::new(RecordedWaits::default()),
	)?;
	let response = client.get("member", Vec::<(String, String)>::new()).await?;

	assert_eq!(response.as_value()["member"]["id"], 1);

	rejected.assert_calls_async(1).await;
	login.assert_calls_async(1).await;
	accepted.assert_calls_async(1).await;

	let cached = store.load(&key).await?.expect("Fresh token should be cached.");

	assert_eq!(cached.token.expose(), "fresh");
	assert_eq!(client.login_metrics().invalidations(), 1);

	Ok(())
}

#[tokio::test]
async fn rejected_credentials_surface_as_authentication_errors() {
	let server = MockServer::start_async().await;
	let login = server
		.mock_async(|when, then| {
			when.method(POST).path("/auth");
			then.status(401).json_body(json!({
				"response": { "error_id": "UNAUTH", "error": "No match found for user/pass" }
			}));
		})
		.await;
	let (client, _) = client_with_waits(&server);
	let err = client
		.get("member", Vec::<(String, String)>::new())
		.await
		.expect_err("Bad credentials must fail.");

	assert!(matches!(
		err,
		Error::Authentication { ref reason } if reason == "No match found for user/pass"
	));

	login.assert_calls_async(1).await;
}

#[tokio::test]
async fn quota_message_backs_off_once_then_surfaces() {
	let server = MockServer::start_async().await;
	let _login = server
		.mock_async(|when, then| {
			when.method(POST).path("/auth");
			then.status(200).json_body(json!({ "response": { "status": "OK", "token": "t" } }));
		})
		.await;
	let message = "You have exceeded your request limit of 5 per 1 seconds for this member, please wait and try again or contact AppNexus for higher limits";
	let limited = server
		.mock_async(|when, then| {
			when.method(GET).path("/report");
			then.status(200)
				.json_body(json!({ "response": { "error_id": "SYSTEM", "error": message } }));
		})
		.await;
	let (client, waits) = client_with_waits(&server);
	let err = client
		.get("report", Vec::<(String, String)>::new())
		.await
		.expect_err("Persistent quota rejection must surface.");

	assert_eq!(err.server_message(), Some(message));
	assert_eq!(*waits.0.lock(), vec![Duration::seconds(1)]);

	limited.assert_calls_async(2).await;
}

#[tokio::test]
async fn plain_429_bodies_are_rate_limit_errors() {
	let server = MockServer::start_async().await;
	let _login = server
		.mock_async(|when, then| {
			when.method(POST).path("/auth");
			then.status(200).json_body(json!({ "response": { "status": "OK", "token": "t" } }));
		})
		.await;
	let limited = server
		.mock_async(|when, then| {
			when.method(DELETE).path("/campaign");
			then.status(429).body("Too Many Requests");
		})
		.await;
	let (client, waits) = client_with_waits(&server);
	let err = client
		.delete("campaign", serde_json::Value::Null, Vec::<(String, String)>::new())
		.await
		.expect_err("Persistent 429 must surface.");

	assert!(matches!(
		err,
		Error::RateLimitExceeded { ref message } if message == "Too Many Requests"
	));
	assert_eq!(waits.0.lock().len(), 1);

	limited.assert_calls_async(2).await;
}

#[tokio::test]
async fn unrelated_server_errors_are_not_retried() {
	let server = MockServer::start_async().await;
	let _login = server
		.mock_async(|when, then| {
			when.method(POST).path("/auth");
			then.status(200).json_body(json!({ "response": { "status": "OK", "token": "t" } }));
		})
		.await;
	let missing = server
		.mock_async(|when, then| {
			when.method(PUT).path("/campaign");
			then.status(404).json_body(json!({
				"response": { "error_id": "NOTFOUND", "error": "Campaign not found" }
			}));
		})
		.await;
	let (client, waits) = client_with_waits(&server);
	let err = client
		.put("campaign", json!({ "campaign": {} }), Vec::<(String, String)>::new())
		.await
		.expect_err("Server errors must surface.");

	match err {
		Error::Server { message, error_id, status } => {
			assert_eq!(message, "Campaign not found");
			assert_eq!(error_id.as_deref(), Some("NOTFOUND"));
			assert_eq!(status, Some(404));
		},
		other => panic!("Unexpected error: {other:?}"),
	}

	assert!(waits.0.lock().is_empty());

	missing.assert_calls_async(1).await;
}
