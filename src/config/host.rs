//! API host selection.

// self
use crate::{_prelude::*, error::ConfigError};

/// AppNexus API endpoint the client talks to.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Host {
	/// Client-testing sandbox.
	#[default]
	Testing,
	/// Production API.
	Production,
	/// Any other deployment, e.g. a mock server.
	Custom(Url),
}
impl Host {
	/// Base URL of the client-testing sandbox.
	pub const TESTING_URL: &'static str = "http://api-console.client-testing.adnxs.net/";
	/// Base URL of the production API.
	pub const PRODUCTION_URL: &'static str = "http://api.appnexus.com/";

	/// Returns the base URL, always ending with `/` so relative paths join beneath it.
	pub fn base_url(&self) -> Result<Url, ConfigError> {
		let mut url = match self {
			Self::Testing => parse(Self::TESTING_URL)?,
			Self::Production => parse(Self::PRODUCTION_URL)?,
			Self::Custom(url) => url.clone(),
		};

		if !url.path().ends_with('/') {
			let path = format!("{}/", url.path());

			url.set_path(&path);
		}

		Ok(url)
	}
}
impl FromStr for Host {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"testing" => Ok(Self::Testing),
			"production" => Ok(Self::Production),
			custom => Ok(Self::Custom(parse(custom)?)),
		}
	}
}
impl Display for Host {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		match self {
			Self::Testing => f.write_str(Self::TESTING_URL),
			Self::Production => f.write_str(Self::PRODUCTION_URL),
			Self::Custom(url) => write!(f, "{url}"),
		}
	}
}

fn parse(raw: &str) -> Result<Url, ConfigError> {
	Url::parse(raw).map_err(|source| ConfigError::InvalidUrl { url: raw.to_owned(), source })
}
