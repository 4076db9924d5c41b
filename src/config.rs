//! Connection options, loadable from TOML.
//!
//! # Example
//! ```
//! use qail_native::ConnectOptions;
//!
//! let opts = ConnectOptions::from_toml_str(r#"
//!     host = "db.internal"
//!     user = "app"
//!     password = "secret"
//!     tenant = "tenant_a"
//! "#).unwrap();
//! assert_eq!(opts.port, 4588);
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

/// Default server port.
pub const DEFAULT_PORT: u16 = 4588;

/// Options for opening a connection.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct ConnectOptions {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    /// Tenant label sent at auth-init and login.
    pub tenant: Option<String>,
    /// Rows requested per execute/fetch round trip.
    pub fetch_size: u32,
    /// Bound on TCP connect plus handshake.
    pub connect_timeout_secs: u64,
    /// Overrides the client address reported at login.
    pub client_addr: Option<String>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            user: String::new(),
            password: String::new(),
            tenant: None,
            fetch_size: 100,
            connect_timeout_secs: 10,
            client_addr: None,
        }
    }
}

impl std::fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"***")
            .field("tenant", &self.tenant)
            .field("fetch_size", &self.fetch_size)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("client_addr", &self.client_addr)
            .finish()
    }
}

impl ConnectOptions {
    pub fn new(host: &str, port: u16, user: &str, password: &str) -> Self {
        Self {
            host: host.to_string(),
            port,
            user: user.to_string(),
            password: password.to_string(),
            ..Self::default()
        }
    }

    pub fn tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = Some(tenant.into());
        self
    }

    pub fn fetch_size(mut self, rows: u32) -> Self {
        self.fetch_size = rows;
        self
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let opts: Self =
            toml::from_str(text).map_err(|e| Error::Config(format!("invalid TOML: {e}")))?;
        opts.validate()?;
        Ok(opts)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// `<config dir>/qail/native.toml`, if a config directory exists.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("qail").join("native.toml"))
    }

    /// Options from the default path, or defaults when no file exists there.
    pub fn load_default() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.user.is_empty() {
            return Err(Error::Config("user must not be empty".to_string()));
        }
        if self.host.is_empty() {
            return Err(Error::Config("host must not be empty".to_string()));
        }
        if self.fetch_size == 0 {
            return Err(Error::Config("fetch_size must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
