//! Configuration surface: the bespoke `key = value` file grammar this
//! gateway's original `vconf`-based config reader speaks, plus the derived
//! [`AppConfig`] the rest of the process is built from.
//!
//! This is deliberately hand-parsed rather than built on a config crate
//! (`figment`/`toml`/etc. from the teacher's own dependency set): the
//! grammar here is not TOML, YAML, or any format those crates natively
//! read, the same way [`crate::registry`] hand-parses its own bespoke
//! statement-file grammar.

use std::collections::HashMap;
use std::time::Duration;

use url::Url;

const DEFAULT_LISTEN: &str = "0.0.0.0:3406";
const DEFAULT_SQL_FILE: &str = "sqls";
const DEFAULT_CONN_TIMEOUT_SECS: u64 = 180;
const DEFAULT_POOL_CAPACITY: usize = 100;
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;
const MAX_IDLE_TIMEOUT_SECS: u64 = 1800;
const DEFAULT_MYSQL_PORT: u16 = 3306;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0}: missing backend db configuration")]
    MissingBackendDb(String),
    #[error("{0}: db not properly configured: host and user are required")]
    IncompleteBackendDb(String),
    #[error("{0}: not a valid backend db url: {1}")]
    BadBackendDbUrl(String, url::ParseError),
    #[error("{0}: not a valid listen address")]
    BadListenAddress(String),
}

/// The raw `key -> value` map parsed from the config file, before any
/// keys are interpreted. Kept around so `<name>_var` lookups (used by
/// statement-file `$name.` expansion) can see arbitrary entries the typed
/// [`AppConfig`] fields don't name.
#[derive(Debug, Clone, Default)]
pub struct RawConfig {
    entries: HashMap<String, String>,
}

impl RawConfig {
    /// Parse the `key = value` / `key: value` line grammar: `#` starts a
    /// comment, blank lines are ignored, one assignment per line.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut entries = HashMap::new();
        for raw_line in text.lines() {
            let line = match raw_line.find('#') {
                Some(pound) => &raw_line[..pound],
                None => raw_line,
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Some(sep) = line.find(['=', ':']) else { continue };
            let key = line[..sep].trim().to_ascii_lowercase();
            let value = line[sep + 1..].trim().to_owned();
            if !key.is_empty() {
                entries.insert(key, value);
            }
        }
        Self { entries }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> { self.entries.get(key).map(String::as_str) }

    /// Look up the `$name.`-expansion database name for `name`, i.e. the
    /// value of a `<name>_var` config entry.
    #[must_use]
    pub fn find_db(&self, name: &str) -> Option<String> {
        self.entries.get(&format!("{name}_var")).filter(|v| !v.is_empty()).cloned()
    }
}

/// Fully resolved, typed process configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// `tcp://host:port` address for the external ZeroMQ `ROUTER` socket.
    pub listen_address: String,
    pub backend_host: String,
    pub backend_port: u16,
    pub backend_user: String,
    pub backend_password: String,
    pub backend_db: String,
    pub sql_file: String,
    pub mysql_conn_timeout: Duration,
    pub conn_pool_capacity: usize,
    pub txn_idle_timeout: Duration,
}

impl AppConfig {
    /// Resolve typed configuration from a raw parsed file, applying
    /// defaults and validating the required `backend_db` entry.
    ///
    /// # Errors
    /// Returns [`ConfigError`] if `backend_db` is absent, malformed, or
    /// missing a host/user.
    pub fn from_raw(raw: &RawConfig) -> Result<Self, ConfigError> {
        let listen_address = parse_listen_address(raw.get("listen_address").unwrap_or(DEFAULT_LISTEN))?;

        let backend = raw
            .get("backend_db")
            .ok_or_else(|| ConfigError::MissingBackendDb("backend_db".to_owned()))?;
        let url = Url::parse(&format!("mysql://{backend}"))
            .map_err(|e| ConfigError::BadBackendDbUrl(backend.to_owned(), e))?;

        let backend_host = url.host_str().filter(|h| !h.is_empty()).map(ToOwned::to_owned);
        let backend_user = (!url.username().is_empty()).then(|| url.username().to_owned());
        let (Some(backend_host), Some(backend_user)) = (backend_host, backend_user) else {
            return Err(ConfigError::IncompleteBackendDb(backend.to_owned()));
        };

        let backend_port = url.port().unwrap_or(DEFAULT_MYSQL_PORT);
        let backend_password = url.password().unwrap_or("").to_owned();
        let backend_db = url.path().trim_start_matches('/').to_owned();

        let sql_file = raw.get("sql_file").filter(|s| !s.is_empty()).unwrap_or(DEFAULT_SQL_FILE).to_owned();

        let mysql_conn_timeout =
            Duration::from_secs(parse_uint(raw.get("mysql_conn_timeout"), DEFAULT_CONN_TIMEOUT_SECS));

        let conn_pool_capacity =
            usize::try_from(parse_uint(raw.get("conn_pool_capacity"), DEFAULT_POOL_CAPACITY as u64))
                .unwrap_or(DEFAULT_POOL_CAPACITY);

        let txn_idle_timeout_secs =
            parse_uint(raw.get("txn_idle_timeout"), DEFAULT_IDLE_TIMEOUT_SECS).min(MAX_IDLE_TIMEOUT_SECS);

        Ok(Self {
            listen_address,
            backend_host,
            backend_port,
            backend_user,
            backend_password,
            backend_db,
            sql_file,
            mysql_conn_timeout,
            conn_pool_capacity,
            txn_idle_timeout: Duration::from_secs(txn_idle_timeout_secs),
        })
    }
}

fn parse_uint(value: Option<&str>, default: u64) -> u64 {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

/// `host:port`, with a `tcp://` scheme prefixed for `zmq::Socket::bind`.
fn parse_listen_address(value: &str) -> Result<String, ConfigError> {
    let value = value.trim();
    if value.is_empty() || !value.contains(':') {
        return Err(ConfigError::BadListenAddress(value.to_owned()));
    }
    Ok(format!("tcp://{value}"))
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn parses_key_value_with_equals_and_colon() {
        let raw = RawConfig::parse("a = 1\nb: 2\n# comment\n\nc=3 # trailing\n");
        assert_eq!(raw.get("a"), Some("1"));
        assert_eq!(raw.get("b"), Some("2"));
        assert_eq!(raw.get("c"), Some("3"));
    }

    #[rstest]
    fn find_db_reads_var_suffixed_key() {
        let raw = RawConfig::parse("main_var = prod_db\n");
        assert_eq!(raw.find_db("main"), Some("prod_db".to_owned()));
        assert_eq!(raw.find_db("other"), None);
    }

    #[rstest]
    fn resolves_backend_db_url() {
        let raw = RawConfig::parse("backend_db = root:secret@db.example:3307/app\n");
        let cfg = AppConfig::from_raw(&raw).expect("resolve");
        assert_eq!(cfg.backend_host, "db.example");
        assert_eq!(cfg.backend_port, 3307);
        assert_eq!(cfg.backend_user, "root");
        assert_eq!(cfg.backend_password, "secret");
        assert_eq!(cfg.backend_db, "app");
    }

    #[rstest]
    fn defaults_apply_when_optional_keys_absent() {
        let raw = RawConfig::parse("backend_db = root@db.example/app\n");
        let cfg = AppConfig::from_raw(&raw).expect("resolve");
        assert_eq!(cfg.listen_address, "tcp://0.0.0.0:3406");
        assert_eq!(cfg.sql_file, "sqls");
        assert_eq!(cfg.conn_pool_capacity, 100);
        assert_eq!(cfg.txn_idle_timeout, Duration::from_secs(600));
        assert_eq!(cfg.backend_port, 3306);
    }

    #[rstest]
    fn idle_timeout_is_clamped_to_1800_seconds() {
        let raw = RawConfig::parse("backend_db = root@db.example/app\ntxn_idle_timeout = 99999\n");
        let cfg = AppConfig::from_raw(&raw).expect("resolve");
        assert_eq!(cfg.txn_idle_timeout, Duration::from_secs(1800));
    }

    #[rstest]
    fn missing_backend_db_is_an_error() {
        let raw = RawConfig::parse("sql_file = sqls\n");
        let err = AppConfig::from_raw(&raw).expect_err("must fail");
        assert!(matches!(err, ConfigError::MissingBackendDb(_)));
    }

    #[rstest]
    fn backend_db_without_user_is_incomplete() {
        let raw = RawConfig::parse("backend_db = db.example/app\n");
        let err = AppConfig::from_raw(&raw).expect_err("must fail");
        assert!(matches!(err, ConfigError::IncompleteBackendDb(_)));
    }
}
