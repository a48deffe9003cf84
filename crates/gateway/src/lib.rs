//! Typed client for the clicker server.
//!
//! Every endpoint may answer with `{ "error": "..." }` instead of its success payload, sometimes with
//! a success status. Callers always get that back as [`Error::Rejected`], so transport failures and
//! application failures can be handled the same way.

#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::unnecessary_cast,
	clippy::cast_lossless,
	clippy::cast_possible_truncation,
	clippy::cast_possible_wrap,
	clippy::cast_precision_loss,
	clippy::cast_sign_loss,
	clippy::dbg_macro,
	clippy::deprecated_cfg_attr,
	clippy::separated_literal_suffix,
	deprecated
)]
#![forbid(deprecated_in_future)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

mod types;

pub use types::*;

use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use tracing::{debug, instrument};

#[derive(Debug, Clone)]
pub struct RequestConfig {
	pub client: reqwest::Client,
	pub api_url: String,
	/// Raw `Cookie` header value carrying the logged-in server session
	pub session_cookie: Option<String>,
}

impl RequestConfig {
	#[must_use]
	pub fn new(api_url: impl Into<String>) -> Self {
		Self {
			client: reqwest::Client::new(),
			api_url: api_url.into().trim_end_matches('/').to_string(),
			session_cookie: None,
		}
	}

	#[must_use]
	pub fn with_session_cookie(mut self, cookie: impl Into<String>) -> Self {
		self.session_cookie = Some(cookie.into());
		self
	}

	fn url(&self, path: &str) -> String {
		format!("{}{path}", self.api_url)
	}
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
	#[error("request to '{endpoint}' failed: {source}")]
	Transport {
		endpoint: &'static str,
		#[source]
		source: reqwest::Error,
	},
	#[error("'{endpoint}' answered with status {status}")]
	Status {
		endpoint: &'static str,
		status: StatusCode,
	},
	#[error("'{endpoint}' rejected the request: {message}")]
	Rejected {
		endpoint: &'static str,
		message: String,
	},
	#[error("failed to decode '{endpoint}' response: {source}")]
	Decode {
		endpoint: &'static str,
		#[source]
		source: serde_json::Error,
	},
}

trait WithSession {
	fn with_session(self, config: &RequestConfig) -> Self;
}

impl WithSession for RequestBuilder {
	fn with_session(self, config: &RequestConfig) -> Self {
		match &config.session_cookie {
			Some(cookie) => self.header(reqwest::header::COOKIE, cookie),
			None => self,
		}
	}
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Reply<T> {
	Failure { error: String },
	Success(T),
}

async fn send<T: DeserializeOwned>(
	endpoint: &'static str,
	config: &RequestConfig,
	req: RequestBuilder,
) -> Result<T, Error> {
	let response = req
		.with_session(config)
		.send()
		.await
		.map_err(|source| Error::Transport { endpoint, source })?;

	let status = response.status();

	let body = response
		.bytes()
		.await
		.map_err(|source| Error::Transport { endpoint, source })?;

	debug!(endpoint, %status, len = body.len(), "Received response");

	match serde_json::from_slice::<Reply<T>>(&body) {
		Ok(Reply::Failure { error }) => Err(Error::Rejected {
			endpoint,
			message: error,
		}),
		Ok(Reply::Success(value)) if status.is_success() => Ok(value),
		Ok(Reply::Success(_)) => Err(Error::Status { endpoint, status }),
		Err(_) if !status.is_success() => Err(Error::Status { endpoint, status }),
		Err(source) => Err(Error::Decode { endpoint, source }),
	}
}

pub mod user_data {
	use super::*;

	pub use get::exec as get;
	pub mod get {
		use super::*;

		pub const ENDPOINT: &str = "/api/get_user_data";

		pub async fn exec(config: &RequestConfig) -> Result<UserPayload, Error> {
			send(ENDPOINT, config, config.client.get(config.url(ENDPOINT))).await
		}
	}
}

pub mod click {
	use super::*;

	pub use single::exec as single;
	pub mod single {
		use super::*;

		pub const ENDPOINT: &str = "/click";

		pub async fn exec(config: &RequestConfig, req: ClickRequest) -> Result<UserPayload, Error> {
			send(
				ENDPOINT,
				config,
				config.client.post(config.url(ENDPOINT)).json(&req),
			)
			.await
		}
	}

	pub use batch::exec as batch;
	pub mod batch {
		use super::*;

		pub const ENDPOINT: &str = "/api/batch_click";

		pub async fn exec(
			config: &RequestConfig,
			req: BatchClickRequest,
		) -> Result<UserPayload, Error> {
			send(
				ENDPOINT,
				config,
				config.client.post(config.url(ENDPOINT)).json(&req),
			)
			.await
		}
	}
}

pub mod case_click {
	use super::*;

	pub use single::exec as single;
	pub mod single {
		use super::*;

		pub const ENDPOINT: &str = "/case_click";

		pub async fn exec(
			config: &RequestConfig,
			req: CaseClickRequest,
		) -> Result<CaseProgress, Error> {
			send(
				ENDPOINT,
				config,
				config.client.post(config.url(ENDPOINT)).json(&req),
			)
			.await
		}
	}

	pub use batch::exec as batch;
	pub mod batch {
		use super::*;

		pub const ENDPOINT: &str = "/api/batch_case_click";

		pub async fn exec(
			config: &RequestConfig,
			req: BatchCaseClickRequest,
		) -> Result<CaseProgress, Error> {
			send(
				ENDPOINT,
				config,
				config.client.post(config.url(ENDPOINT)).json(&req),
			)
			.await
		}
	}
}

pub mod upgrades {
	use super::*;

	pub use purchase::exec as purchase;
	pub mod purchase {
		use serde_json::json;

		use super::*;

		pub const ENDPOINT: &str = "/purchase_upgrade";

		pub async fn exec(
			config: &RequestConfig,
			kind: UpgradeKind,
		) -> Result<PurchaseReceipt, Error> {
			send(
				ENDPOINT,
				config,
				config
					.client
					.post(config.url(ENDPOINT))
					.json(&json!({ "upgrade_type": kind })),
			)
			.await
		}
	}
}

/// Everything the coordinator needs from the server
#[async_trait]
pub trait Gateway: Send + Sync + 'static {
	async fn user_data(&self) -> Result<UserPayload, Error>;

	async fn click(&self, req: ClickRequest) -> Result<UserPayload, Error>;

	async fn batch_click(&self, req: BatchClickRequest) -> Result<UserPayload, Error>;

	async fn case_click(&self, req: CaseClickRequest) -> Result<CaseProgress, Error>;

	async fn batch_case_click(&self, req: BatchCaseClickRequest) -> Result<CaseProgress, Error>;

	async fn purchase_upgrade(&self, kind: UpgradeKind) -> Result<PurchaseReceipt, Error>;
}

#[derive(Debug, Clone)]
pub struct HttpGateway {
	config: RequestConfig,
}

impl HttpGateway {
	#[must_use]
	pub const fn new(config: RequestConfig) -> Self {
		Self { config }
	}
}

#[async_trait]
impl Gateway for HttpGateway {
	#[instrument(skip(self), err)]
	async fn user_data(&self) -> Result<UserPayload, Error> {
		user_data::get(&self.config).await
	}

	#[instrument(skip(self), err)]
	async fn click(&self, req: ClickRequest) -> Result<UserPayload, Error> {
		click::single(&self.config, req).await
	}

	#[instrument(skip(self), err)]
	async fn batch_click(&self, req: BatchClickRequest) -> Result<UserPayload, Error> {
		click::batch(&self.config, req).await
	}

	#[instrument(skip(self), err)]
	async fn case_click(&self, req: CaseClickRequest) -> Result<CaseProgress, Error> {
		case_click::single(&self.config, req).await
	}

	#[instrument(skip(self), err)]
	async fn batch_case_click(&self, req: BatchCaseClickRequest) -> Result<CaseProgress, Error> {
		case_click::batch(&self.config, req).await
	}

	#[instrument(skip(self), err)]
	async fn purchase_upgrade(&self, kind: UpgradeKind) -> Result<PurchaseReceipt, Error> {
		upgrades::purchase(&self.config, kind).await
	}
}
