//! Manager configuration.

use std::time::Duration;

use tern_bson::{Document, Value};

use crate::error::Result;
use crate::logging::Logger;
use crate::uri::ConnectionString;

/// Default timeout for establishing a connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for a single socket read or write.
pub const DEFAULT_SOCKET_TIMEOUT: Duration = Duration::from_secs(300);

/// Configuration for a [`Manager`](crate::Manager).
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// MongoDB connection URI.
    pub uri: String,
    /// Options applied on top of the URI's own options.
    pub options: Document,
    /// Application name sent in the handshake.
    pub app_name: Option<String>,
    /// Connection timeout; overrides `connectTimeoutMS`.
    pub connect_timeout: Option<Duration>,
    /// Socket timeout; overrides `socketTimeoutMS`.
    pub socket_timeout: Option<Duration>,
    /// Where log events go.
    pub logger: Logger,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            uri: "mongodb://localhost:27017".to_string(),
            options: Document::new(),
            app_name: None,
            connect_timeout: None,
            socket_timeout: None,
            logger: Logger::inherit(),
        }
    }
}

fn millis_option(cs: &ConnectionString, key: &str) -> Option<Duration> {
    cs.option(key)
        .and_then(Value::as_i32)
        .filter(|ms| *ms > 0)
        .map(|ms| Duration::from_millis(ms as u64))
}

impl ManagerConfig {
    /// Create a configuration for a URI with defaults for everything else.
    pub fn from_uri(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            ..Self::default()
        }
    }

    /// Create a builder for configuration.
    pub fn builder() -> ManagerConfigBuilder {
        ManagerConfigBuilder::new()
    }

    /// Parse the URI and apply the options document.
    pub fn connection_string(&self) -> Result<ConnectionString> {
        let mut cs = ConnectionString::parse(&self.uri)?;
        cs.apply_options(&self.options)?;
        Ok(cs)
    }

    /// Application name: explicit setting, else the `appName` option.
    pub fn effective_app_name(&self, cs: &ConnectionString) -> Option<String> {
        self.app_name
            .clone()
            .or_else(|| cs.app_name().map(str::to_string))
    }

    /// Connect timeout: explicit setting, else `connectTimeoutMS`, else the default.
    pub fn effective_connect_timeout(&self, cs: &ConnectionString) -> Duration {
        self.connect_timeout
            .or_else(|| millis_option(cs, "connecttimeoutms"))
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT)
    }

    /// Socket timeout: explicit setting, else `socketTimeoutMS`, else the default.
    pub fn effective_socket_timeout(&self, cs: &ConnectionString) -> Duration {
        self.socket_timeout
            .or_else(|| millis_option(cs, "sockettimeoutms"))
            .unwrap_or(DEFAULT_SOCKET_TIMEOUT)
    }
}

/// Builder for manager configuration.
#[derive(Debug, Default)]
pub struct ManagerConfigBuilder {
    uri: Option<String>,
    options: Document,
    app_name: Option<String>,
    connect_timeout: Option<Duration>,
    socket_timeout: Option<Duration>,
    logger: Option<Logger>,
}

impl ManagerConfigBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the MongoDB URI.
    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    /// Replace the options document.
    pub fn options(mut self, options: Document) -> Self {
        self.options = options;
        self
    }

    /// Set a single option.
    pub fn option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key, value);
        self
    }

    /// Set the application name.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = Some(name.into());
        self
    }

    /// Set the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Set the socket timeout.
    pub fn socket_timeout(mut self, timeout: Duration) -> Self {
        self.socket_timeout = Some(timeout);
        self
    }

    /// Set the logger.
    pub fn logger(mut self, logger: Logger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Build the configuration, checking that the URI and options parse.
    pub fn build(self) -> Result<ManagerConfig> {
        let defaults = ManagerConfig::default();
        let config = ManagerConfig {
            uri: self.uri.unwrap_or(defaults.uri),
            options: self.options,
            app_name: self.app_name,
            connect_timeout: self.connect_timeout,
            socket_timeout: self.socket_timeout,
            logger: self.logger.unwrap_or(defaults.logger),
        };
        config.connection_string()?;
        Ok(config)
    }
}
