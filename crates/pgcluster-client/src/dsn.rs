//! Connection strings.
//!
//! DSNs use the libpq key/value form:
//!
//! ```text
//! host=db1,db2,db3 port=5432 dbname=orders user=app password='s3cr et'
//! ```
//!
//! A DSN may list several hosts; [`split_by_host`] turns it into one DSN per
//! host, which is how a cluster is described to the topology tracker.

use std::fmt;
use std::time::Duration;

use crate::error::{Error, Result};

/// Default PostgreSQL port.
pub const DEFAULT_PORT: u16 = 5432;

/// A parsed connection string.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Dsn {
    hosts: Vec<String>,
    ports: Vec<u16>,
    dbname: Option<String>,
    user: Option<String>,
    password: Option<String>,
    connect_timeout: Option<Duration>,
    application_name: Option<String>,
    /// Options this crate does not interpret, kept in order for the driver.
    extra: Vec<(String, String)>,
}

impl Dsn {
    /// Parse a key/value connection string.
    pub fn parse(dsn: &str) -> Result<Self> {
        let mut parsed = Self::default();

        for (key, value) in tokenize(dsn)? {
            match key.as_str() {
                "host" | "hostaddr" => {
                    parsed.hosts = value
                        .split(',')
                        .map(str::trim)
                        .filter(|h| !h.is_empty())
                        .map(str::to_string)
                        .collect();
                }
                "port" => {
                    parsed.ports = value
                        .split(',')
                        .map(|p| {
                            p.trim()
                                .parse()
                                .map_err(|_| Error::Config(format!("invalid port: {p}")))
                        })
                        .collect::<Result<_>>()?;
                }
                "dbname" => parsed.dbname = Some(value),
                "user" => parsed.user = Some(value),
                "password" => parsed.password = Some(value),
                "connect_timeout" => {
                    let secs: u64 = value
                        .parse()
                        .map_err(|_| Error::Config(format!("invalid timeout: {value}")))?;
                    parsed.connect_timeout = Some(Duration::from_secs(secs));
                }
                "application_name" => parsed.application_name = Some(value),
                _ => {
                    tracing::debug!(key = %key, "passing through unknown dsn option");
                    parsed.extra.push((key, value));
                }
            }
        }

        if parsed.ports.len() > 1 && parsed.ports.len() != parsed.hosts.len() {
            return Err(Error::Config(format!(
                "{} ports given for {} hosts",
                parsed.ports.len(),
                parsed.hosts.len()
            )));
        }

        Ok(parsed)
    }

    /// Hosts listed in the DSN. Empty means the driver default (local socket).
    #[must_use]
    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    /// Port of the first host.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.ports.first().copied().unwrap_or(DEFAULT_PORT)
    }

    /// Database name.
    #[must_use]
    pub fn dbname(&self) -> Option<&str> {
        self.dbname.as_deref()
    }

    /// User name.
    #[must_use]
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    /// Connect timeout from the DSN, if set.
    #[must_use]
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout
    }

    /// Application name reported to the server.
    #[must_use]
    pub fn application_name(&self) -> Option<&str> {
        self.application_name.as_deref()
    }

    /// `host:port` of the first host.
    ///
    /// Replication views identify standbys this way, so the topology uses it
    /// to match synchronous standbys reported by the master against its hosts.
    #[must_use]
    pub fn host_id(&self) -> String {
        let host = self.hosts.first().map_or("localhost", String::as_str);
        format!("{host}:{}", self.port())
    }

    /// Rendering with the password replaced, safe for logs and errors.
    #[must_use]
    pub fn masked(&self) -> String {
        self.render(true)
    }

    /// Set the host list.
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.hosts = vec![host.into()];
        self
    }

    /// Set a single port.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.ports = vec![port];
        self
    }

    /// Set the database name.
    #[must_use]
    pub fn with_dbname(mut self, dbname: impl Into<String>) -> Self {
        self.dbname = Some(dbname.into());
        self
    }

    fn render(&self, mask_password: bool) -> String {
        let mut parts = Vec::new();
        if !self.hosts.is_empty() {
            parts.push(format!("host={}", quote(&self.hosts.join(","))));
        }
        if !self.ports.is_empty() {
            let ports: Vec<String> = self.ports.iter().map(u16::to_string).collect();
            parts.push(format!("port={}", ports.join(",")));
        }
        if let Some(dbname) = &self.dbname {
            parts.push(format!("dbname={}", quote(dbname)));
        }
        if let Some(user) = &self.user {
            parts.push(format!("user={}", quote(user)));
        }
        if let Some(password) = &self.password {
            let shown = if mask_password { "***" } else { password.as_str() };
            parts.push(format!("password={}", quote(shown)));
        }
        if let Some(timeout) = self.connect_timeout {
            parts.push(format!("connect_timeout={}", timeout.as_secs()));
        }
        if let Some(name) = &self.application_name {
            parts.push(format!("application_name={}", quote(name)));
        }
        for (key, value) in &self.extra {
            parts.push(format!("{key}={}", quote(value)));
        }
        parts.join(" ")
    }
}

impl fmt::Display for Dsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(false))
    }
}

impl fmt::Debug for Dsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Dsn").field(&self.masked()).finish()
    }
}

impl std::str::FromStr for Dsn {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Split a multi-host DSN into one DSN per host, preserving host order.
///
/// A DSN without hosts is returned unchanged as a single element. A single
/// port applies to every host; otherwise ports pair up with hosts by position.
pub fn split_by_host(dsn: &Dsn) -> Vec<Dsn> {
    if dsn.hosts.len() <= 1 {
        return vec![dsn.clone()];
    }

    dsn.hosts
        .iter()
        .enumerate()
        .map(|(idx, host)| {
            let mut single = dsn.clone();
            single.hosts = vec![host.clone()];
            if let (true, Some(&port)) = (dsn.ports.len() > 1, dsn.ports.get(idx)) {
                single.ports = vec![port];
            }
            single
        })
        .collect()
}

fn quote(value: &str) -> String {
    if !value.is_empty() && !value.contains([' ', '\'', '\\', '\t']) {
        return value.to_string();
    }
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for c in value.chars() {
        if c == '\'' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('\'');
    quoted
}

fn tokenize(input: &str) -> Result<Vec<(String, String)>> {
    let mut pairs = Vec::new();
    let mut chars = input.chars().peekable();

    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        if chars.peek().is_none() {
            break;
        }

        let mut key = String::new();
        while let Some(&c) = chars.peek() {
            if c == '=' || c.is_whitespace() {
                break;
            }
            key.push(c);
            chars.next();
        }
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        if chars.next() != Some('=') {
            return Err(Error::Config(format!("missing '=' after key: {key}")));
        }
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }

        let mut value = String::new();
        if chars.peek() == Some(&'\'') {
            chars.next();
            let mut closed = false;
            while let Some(c) = chars.next() {
                match c {
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            value.push(escaped);
                        }
                    }
                    '\'' => {
                        closed = true;
                        break;
                    }
                    _ => value.push(c),
                }
            }
            if !closed {
                return Err(Error::Config(format!("unterminated quote in value of {key}")));
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                value.push(c);
                chars.next();
            }
        }

        pairs.push((key.to_lowercase(), value));
    }

    Ok(pairs)
}
