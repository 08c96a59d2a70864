use serde::Deserialize;
use thiserror::Error;
use url::Url;

pub const DEFAULT_API_BASE_URL: &str = "https://api.github.com";
pub const DEFAULT_USER_AGENT: &str = "csv-relay";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("github.{0} cannot be empty (set {1})")]
    MissingGithubSetting(&'static str, &'static str),

    #[error("github.api_base_url cannot be used as a base URL: {0}")]
    InvalidApiBaseUrl(String),

    #[error("github.timeout_secs cannot be 0")]
    InvalidTimeout,

    #[error("max_body_bytes cannot be 0")]
    InvalidMaxBodyBytes,

    #[error("blob_store.public_url is required (set R2_PUBLIC_URL)")]
    MissingPublicUrl,

    #[error("blob_store.{0} cannot be empty")]
    MissingBlobStoreSetting(&'static str),
}

#[derive(Error, Debug, PartialEq)]
pub enum EnvError {
    #[error("environment variable {var} is invalid: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// Relay configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Listener for browser uploads
    #[serde(default = "Listener::relay_default")]
    pub listener: Listener,
    /// Listener for health and readiness checks
    #[serde(default = "Listener::admin_default")]
    pub admin_listener: Listener,
    /// Upload bodies larger than this are rejected
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// Downstream repository dispatch target
    #[serde(default)]
    pub github: GithubConfig,
    /// When present, uploads are stored here and only their URL is dispatched
    pub blob_store: Option<BlobStoreConfig>,
}

impl Config {
    /// Builds a configuration from environment variables alone.
    pub fn from_env<F>(lookup: F) -> Result<Self, EnvError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config {
            listener: Listener::relay_default(),
            admin_listener: Listener::admin_default(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            github: GithubConfig::default(),
            blob_store: None,
        };
        config.apply_env(lookup)?;
        Ok(config)
    }

    /// Overrides file settings with any of the recognized environment variables
    /// that are set.
    ///
    /// `GITHUB_OWNER`, `GITHUB_REPO`, `GITHUB_TOKEN`, `RELAY_HOST`, `RELAY_PORT`
    /// and the `R2_*` bucket settings. Setting `R2_BUCKET` without a
    /// `blob_store` section switches the relay to the stored-URL variant.
    /// The `R2_*` bucket settings are ignored for a `memory` store, except
    /// `R2_PUBLIC_URL`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), EnvError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.is_empty());

        if let Some(owner) = var("GITHUB_OWNER") {
            self.github.owner = owner;
        }
        if let Some(repo) = var("GITHUB_REPO") {
            self.github.repo = repo;
        }
        if let Some(token) = var("GITHUB_TOKEN") {
            self.github.token = token;
        }
        if let Some(host) = var("RELAY_HOST") {
            self.listener.host = host;
        }
        if let Some(port) = var("RELAY_PORT") {
            self.listener.port = port.parse().map_err(|e: std::num::ParseIntError| {
                EnvError::Invalid {
                    var: "RELAY_PORT",
                    reason: e.to_string(),
                }
            })?;
        }

        if self.blob_store.is_none() && var("R2_BUCKET").is_some() {
            self.blob_store = Some(BlobStoreConfig {
                r#type: BlobStoreType::S3 {
                    endpoint: None,
                    bucket: String::new(),
                    region: default_region(),
                    access_key_id: String::new(),
                    secret_access_key: String::new(),
                },
                public_url: None,
            });
        }

        if let Some(blob_store) = self.blob_store.as_mut() {
            if let Some(public_url) = var("R2_PUBLIC_URL") {
                blob_store.public_url = Some(parse_env_url("R2_PUBLIC_URL", &public_url)?);
            }

            if let BlobStoreType::S3 {
                endpoint,
                bucket,
                region,
                access_key_id,
                secret_access_key,
            } = &mut blob_store.r#type
            {
                if let Some(name) = var("R2_BUCKET") {
                    *bucket = name;
                }
                if let Some(name) = var("R2_REGION") {
                    *region = name;
                }
                if let Some(url) = var("R2_ENDPOINT") {
                    *endpoint = Some(parse_env_url("R2_ENDPOINT", &url)?);
                }
                if let Some(key) = var("R2_ACCESS_KEY_ID") {
                    *access_key_id = key;
                }
                if let Some(secret) = var("R2_SECRET_ACCESS_KEY") {
                    *secret_access_key = secret;
                }
            }
        }

        Ok(())
    }

    /// Validates the relay configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;
        self.github.validate()?;

        if self.max_body_bytes == 0 {
            return Err(ValidationError::InvalidMaxBodyBytes);
        }

        if let Some(blob_store) = &self.blob_store {
            blob_store.validate()?;
        }

        Ok(())
    }
}

fn parse_env_url(var: &'static str, value: &str) -> Result<Url, EnvError> {
    Url::parse(value).map_err(|e| EnvError::Invalid {
        var,
        reason: e.to_string(),
    })
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    pub host: String,
    pub port: u16,
}

impl Listener {
    fn relay_default() -> Self {
        Listener {
            host: "0.0.0.0".into(),
            port: 8080,
        }
    }

    fn admin_default() -> Self {
        Listener {
            host: "127.0.0.1".into(),
            port: 8081,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct GithubConfig {
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub repo: String,
    /// Bearer token sent with every dispatch
    #[serde(default)]
    pub token: String,
    /// Overridable for GitHub Enterprise and tests. `https://api.github.com`
    /// when unset.
    #[serde(default)]
    pub api_base_url: Option<Url>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Upper bound on the whole downstream exchange, body included
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GithubConfig {
    fn default() -> Self {
        GithubConfig {
            owner: String::new(),
            repo: String::new(),
            token: String::new(),
            api_base_url: None,
            user_agent: default_user_agent(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl GithubConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.owner.is_empty() {
            return Err(ValidationError::MissingGithubSetting("owner", "GITHUB_OWNER"));
        }
        if self.repo.is_empty() {
            return Err(ValidationError::MissingGithubSetting("repo", "GITHUB_REPO"));
        }
        if self.token.is_empty() {
            return Err(ValidationError::MissingGithubSetting("token", "GITHUB_TOKEN"));
        }
        if self.timeout_secs == 0 {
            return Err(ValidationError::InvalidTimeout);
        }
        self.dispatches_url()?;
        Ok(())
    }

    /// `{api_base_url}/repos/{owner}/{repo}/dispatches`, with owner and repo
    /// percent-encoded as path segments.
    pub fn dispatches_url(&self) -> Result<Url, ValidationError> {
        let base = self
            .api_base_url
            .as_ref()
            .map_or(DEFAULT_API_BASE_URL, Url::as_str);
        let invalid = || ValidationError::InvalidApiBaseUrl(base.to_owned());

        let mut url = Url::parse(base).map_err(|_| invalid())?;
        url.path_segments_mut()
            .map_err(|_| invalid())?
            .pop_if_empty()
            .extend(["repos", &self.owner, &self.repo, "dispatches"]);
        Ok(url)
    }
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.into()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_max_body_bytes() -> usize {
    DEFAULT_MAX_BODY_BYTES
}

fn default_region() -> String {
    "auto".into()
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
#[serde(tag = "type")]
pub enum BlobStoreType {
    /// Any S3-compatible bucket: Cloudflare R2, AWS S3, MinIO.
    S3 {
        /// Custom endpoint, e.g. `https://<account>.r2.cloudflarestorage.com`.
        /// Uses the AWS endpoint for `region` when unset.
        endpoint: Option<Url>,
        bucket: String,
        #[serde(default = "default_region")]
        region: String,
        #[serde(default)]
        access_key_id: String,
        #[serde(default)]
        secret_access_key: String,
    },
    /// Process-local store, for development.
    Memory,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct BlobStoreConfig {
    #[serde(flatten)]
    pub r#type: BlobStoreType,
    /// Public base under which stored objects can be fetched
    pub public_url: Option<Url>,
}

impl BlobStoreConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.public_url.is_none() {
            return Err(ValidationError::MissingPublicUrl);
        }

        if let BlobStoreType::S3 {
            bucket,
            access_key_id,
            secret_access_key,
            ..
        } = &self.r#type
        {
            if bucket.is_empty() {
                return Err(ValidationError::MissingBlobStoreSetting("bucket"));
            }
            if access_key_id.is_empty() {
                return Err(ValidationError::MissingBlobStoreSetting("access_key_id"));
            }
            if secret_access_key.is_empty() {
                return Err(ValidationError::MissingBlobStoreSetting(
                    "secret_access_key",
                ));
            }
        }

        Ok(())
    }
}
