//! `KEY=value;` connection strings in the Db2 CLI grammar.

use std::fmt;

use crate::error::DbError;

const PASSWORD_KEY: &str = "PWD";

/// A driver connection string.
///
/// Built from instance settings as
/// `HOSTNAME=<h>;PORT=<p>;DATABASE=<d>;UID=<u>;PWD=<pw>` and passed to the
/// driver verbatim. `Debug` and `redacted()` mask the password so the value
/// can be logged.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ConnectionString {
    raw: String,
}

impl ConnectionString {
    /// Build the fixed-order Db2 connection string.
    pub fn from_parts(host: &str, port: &str, database: &str, user: &str, password: &str) -> Self {
        Self {
            raw: format!(
                "HOSTNAME={};PORT={};DATABASE={};UID={};PWD={}",
                host, port, database, user, password
            ),
        }
    }

    /// Wrap an existing connection string after checking every segment is `KEY=value`.
    pub fn parse(raw: impl Into<String>) -> Result<Self, DbError> {
        let raw = raw.into();
        for segment in segments(&raw) {
            match segment.split_once('=') {
                Some((key, _)) if !key.trim().is_empty() => {}
                _ => {
                    return Err(DbError::InvalidConnectionString(format!(
                        "segment '{}' is not KEY=value",
                        segment
                    )))
                }
            }
        }
        Ok(Self { raw })
    }

    /// The exact string handed to the driver.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Look up an attribute by key (case-insensitive).
    pub fn get(&self, key: &str) -> Option<&str> {
        segments(&self.raw)
            .filter_map(|segment| segment.split_once('='))
            .find(|(k, _)| k.trim().eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    }

    /// The connection string with the password replaced by `***`.
    pub fn redacted(&self) -> String {
        segments(&self.raw)
            .map(|segment| match segment.split_once('=') {
                Some((key, _)) if key.trim().eq_ignore_ascii_case(PASSWORD_KEY) => {
                    format!("{}=***", key)
                }
                _ => segment.to_string(),
            })
            .collect::<Vec<_>>()
            .join(";")
    }

    /// Short stable identifier for logs and metrics.
    pub fn fingerprint(&self) -> String {
        blake3::hash(self.raw.as_bytes()).to_hex()[..12].to_string()
    }
}

impl fmt::Debug for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ConnectionString")
            .field(&self.redacted())
            .finish()
    }
}

fn segments(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(';').filter(|segment| !segment.trim().is_empty())
}
