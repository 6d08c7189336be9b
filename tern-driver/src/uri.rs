//! Connection string parsing and option application.
//!
//! A connection string has the shape
//! `mongodb://[user[:pass]@]host1[:port1][,hostN[:portN]][/[db]][?opts]`.
//! Options from the query string and from an explicit options document are
//! applied by the same rules: pass-through options first, then read concern,
//! read preference and write concern, in that order.

use std::fmt;

use tern_bson::{Document, Value};

use crate::concern::{Acknowledgment, ReadConcern, ReadMode, ReadPreference, WriteConcern};
use crate::error::{Error, Result};

/// Port used when a host does not name one.
pub const DEFAULT_PORT: u16 = 27017;

const SCHEME: &str = "mongodb://";

/// Options that are resolved into concerns rather than passed through.
const DEFERRED_OPTIONS: &[&str] = &[
    "journal",
    "readpreference",
    "readpreferencetags",
    "safe",
    "slaveok",
    "w",
    "wtimeoutms",
];

const BOOL_OPTIONS: &[&str] = &[
    "canonicalizehostname",
    "directconnection",
    "journal",
    "retryreads",
    "retrywrites",
    "safe",
    "serverselectiontryonce",
    "slaveok",
    "ssl",
    "tls",
    "tlsallowinvalidcertificates",
    "tlsallowinvalidhostnames",
];

const INT32_OPTIONS: &[&str] = &[
    "connecttimeoutms",
    "heartbeatfrequencyms",
    "localthresholdms",
    "maxidletimems",
    "maxpoolsize",
    "maxstalenessseconds",
    "minpoolsize",
    "serverselectiontimeoutms",
    "sockettimeoutms",
    "waitqueuetimeoutms",
    "wtimeoutms",
    "zlibcompressionlevel",
];

const UTF8_OPTIONS: &[&str] = &[
    "appname",
    "authmechanism",
    "authsource",
    "compressors",
    "readconcernlevel",
    "replicaset",
    "tlscafile",
    "tlscertificatekeyfile",
];

/// A seed host.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Host {
    pub host: String,
    pub port: u16,
}

impl Host {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// A parsed connection string with its effective options and concerns.
#[derive(Clone, PartialEq)]
pub struct ConnectionString {
    hosts: Vec<Host>,
    username: Option<String>,
    password: Option<String>,
    database: Option<String>,
    auth_source: Option<String>,
    options: Document,
    read_concern: ReadConcern,
    read_preference: ReadPreference,
    write_concern: WriteConcern,
}

impl fmt::Debug for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionString")
            .field("hosts", &self.hosts)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("database", &self.database)
            .field("auth_source", &self.auth_source)
            .field("options", &self.options)
            .field("read_concern", &self.read_concern)
            .field("read_preference", &self.read_preference)
            .field("write_concern", &self.write_concern)
            .finish()
    }
}

fn parse_failure(uri: &str) -> Error {
    Error::invalid_argument(format!("Failed to parse MongoDB URI: '{}'", uri))
}

fn decode(uri: &str, raw: &str) -> Result<String> {
    urlencoding::decode(raw)
        .map(|s| s.into_owned())
        .map_err(|_| parse_failure(uri))
}

fn find_case<'a>(options: &'a Document, key: &str) -> Option<&'a Value> {
    options
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v)
}

impl ConnectionString {
    /// Parse a `mongodb://` connection string, applying its query options.
    pub fn parse(uri: &str) -> Result<Self> {
        let rest = uri.strip_prefix(SCHEME).ok_or_else(|| parse_failure(uri))?;
        let (main, query) = match rest.split_once('?') {
            Some((main, query)) => (main, Some(query)),
            None => (rest, None),
        };

        let (userinfo, location) = match main.rfind('@') {
            Some(at) => (Some(&main[..at]), &main[at + 1..]),
            None => (None, main),
        };
        let (host_list, path) = match location.split_once('/') {
            Some((hosts, path)) => (hosts, Some(path)),
            None => (location, None),
        };

        let (username, password) = match userinfo {
            Some(info) => {
                let (user, pass) = match info.split_once(':') {
                    Some((user, pass)) => (user, Some(pass)),
                    None => (info, None),
                };
                if user.is_empty() {
                    return Err(parse_failure(uri));
                }
                (
                    Some(decode(uri, user)?),
                    pass.map(|p| decode(uri, p)).transpose()?,
                )
            }
            None => (None, None),
        };

        let hosts = host_list
            .split(',')
            .map(|h| parse_host(h).ok_or_else(|| parse_failure(uri)))
            .collect::<Result<Vec<_>>>()?;

        let database = match path {
            Some(p) if !p.is_empty() => {
                let db = decode(uri, p)?;
                if db.contains(['/', '\\', ' ', '"', '$']) {
                    return Err(parse_failure(uri));
                }
                Some(db)
            }
            _ => None,
        };

        let mut parsed = Self {
            hosts,
            username,
            password,
            database,
            auth_source: None,
            options: Document::new(),
            read_concern: ReadConcern::default(),
            read_preference: ReadPreference::default(),
            write_concern: WriteConcern::default(),
        };

        if let Some(query) = query {
            let options = parse_query(uri, query)?;
            parsed.apply_options(&options)?;
        }
        Ok(parsed)
    }

    /// Apply an options document.
    ///
    /// Keys are matched case-insensitively. Either every option is applied or,
    /// on error, nothing changes.
    pub fn apply_options(&mut self, options: &Document) -> Result<()> {
        if options.is_empty() {
            return Ok(());
        }
        let mut next = self.clone();
        next.apply_passthrough(options);
        next.apply_read_concern(options);
        next.apply_read_preference(options)?;
        next.apply_write_concern(options)?;
        *self = next;
        Ok(())
    }

    fn apply_passthrough(&mut self, options: &Document) {
        for (key, value) in options {
            let lower = key.to_ascii_lowercase();
            if DEFERRED_OPTIONS.contains(&lower.as_str()) {
                continue;
            }
            if BOOL_OPTIONS.contains(&lower.as_str()) {
                self.options.insert(lower, value.is_truthy());
            } else if INT32_OPTIONS.contains(&lower.as_str()) && value.as_i32().is_some() {
                self.options.insert(lower, value.clone());
            } else if UTF8_OPTIONS.contains(&lower.as_str()) && value.as_str().is_some() {
                if lower == "authsource" {
                    self.auth_source = value.as_str().map(str::to_string);
                }
                self.options.insert(lower, value.clone());
            } else if let Some(s) = value.as_str() {
                match lower.as_str() {
                    "username" => self.username = Some(s.to_string()),
                    "password" => self.password = Some(s.to_string()),
                    "database" => self.database = Some(s.to_string()),
                    _ => {}
                }
            }
        }
    }

    fn apply_read_concern(&mut self, options: &Document) {
        if let Some(level) = find_case(options, "readconcernlevel").and_then(Value::as_str) {
            self.read_concern = ReadConcern::with_level(level);
        }
    }

    fn apply_read_preference(&mut self, options: &Document) -> Result<()> {
        let slave_ok = find_case(options, "slaveok");
        let mode = find_case(options, "readpreference");
        let tags = find_case(options, "readpreferencetags");
        let staleness = find_case(options, "maxstalenessseconds");
        if slave_ok.is_none() && mode.is_none() && tags.is_none() && staleness.is_none() {
            return Ok(());
        }

        let mut new_mode = self.read_preference.mode();
        let mut new_tags = self.read_preference.tags().to_vec();
        let mut new_staleness = self.read_preference.max_staleness_seconds();

        if slave_ok.and_then(Value::as_bool) == Some(true) {
            new_mode = ReadMode::SecondaryPreferred;
        }
        if let Some(name) = mode.and_then(Value::as_str) {
            new_mode = name.parse()?;
        }
        if let Some(items) = tags.and_then(Value::as_array) {
            new_tags = items
                .iter()
                .map(|item| {
                    item.as_document().cloned().ok_or_else(|| {
                        Error::invalid_argument(
                            "Read preference tags must be an array of zero or more documents",
                        )
                    })
                })
                .collect::<Result<Vec<_>>>()?;
        }
        if let Some(seconds) = staleness.and_then(Value::to_i64) {
            new_staleness = (seconds > 0).then_some(seconds);
        }

        let mut read_preference = ReadPreference::new(new_mode, new_tags)?;
        if let Some(seconds) = new_staleness {
            read_preference = read_preference.with_max_staleness(seconds)?;
        }
        self.read_preference = read_preference;
        Ok(())
    }

    fn apply_write_concern(&mut self, options: &Document) -> Result<()> {
        let safe = find_case(options, "safe");
        let wtimeout = find_case(options, "wtimeoutms");
        let journal = find_case(options, "journal");
        let w = find_case(options, "w");
        if safe.is_none() && wtimeout.is_none() && journal.is_none() && w.is_none() {
            return Ok(());
        }

        let mut new_w = self.write_concern.w().clone();
        let mut new_wtimeout = self.write_concern.wtimeout_ms();
        let mut new_journal = self.write_concern.journal();

        if let Some(safe) = safe.and_then(Value::as_bool) {
            new_w = if safe {
                Acknowledgment::Nodes(1)
            } else {
                Acknowledgment::Unacknowledged
            };
        }
        if let Some(ms) = wtimeout.and_then(Value::as_i32) {
            new_wtimeout = ms;
        }
        if let Some(j) = journal.and_then(Value::as_bool) {
            new_journal = Some(j);
        }
        match w {
            Some(Value::Int32(n)) => new_w = Acknowledgment::from_i32(*n)?,
            Some(Value::String(tag)) => new_w = Acknowledgment::from_tag(tag),
            _ => {}
        }

        self.write_concern = WriteConcern::new(new_w, new_wtimeout, new_journal)?;
        Ok(())
    }

    pub fn hosts(&self) -> &[Host] {
        &self.hosts
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    /// Database credentials are checked against: `authSource`, else the
    /// connection string database, else `admin`.
    pub fn auth_source(&self) -> &str {
        self.auth_source
            .as_deref()
            .or(self.database.as_deref())
            .unwrap_or("admin")
    }

    /// Pass-through options with lower-case keys.
    pub fn options(&self) -> &Document {
        &self.options
    }

    pub fn option(&self, key: &str) -> Option<&Value> {
        self.options.get(&key.to_ascii_lowercase())
    }

    pub fn app_name(&self) -> Option<&str> {
        self.option("appname").and_then(Value::as_str)
    }

    pub fn read_concern(&self) -> &ReadConcern {
        &self.read_concern
    }

    pub fn read_preference(&self) -> &ReadPreference {
        &self.read_preference
    }

    pub fn write_concern(&self) -> &WriteConcern {
        &self.write_concern
    }
}

fn parse_host(raw: &str) -> Option<Host> {
    if raw.is_empty() {
        return None;
    }
    let (host, port) = if let Some(bracketed) = raw.strip_prefix('[') {
        let (host, after) = bracketed.split_once(']')?;
        let port = match after {
            "" => None,
            p => Some(p.strip_prefix(':')?),
        };
        (host, port)
    } else {
        match raw.split_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (raw, None),
        }
    };
    if host.is_empty() {
        return None;
    }
    let port = match port {
        Some(p) => p.parse::<u16>().ok().filter(|p| *p != 0)?,
        None => DEFAULT_PORT,
    };
    Some(Host::new(host.to_ascii_lowercase(), port))
}

fn parse_query(uri: &str, query: &str) -> Result<Document> {
    let mut options = Document::new();
    let mut tag_sets: Option<Vec<Value>> = None;

    for pair in query.split(['&', ';']).filter(|p| !p.is_empty()) {
        let (key, raw) = pair.split_once('=').ok_or_else(|| parse_failure(uri))?;
        let key = key.to_ascii_lowercase();
        let value = decode(uri, raw)?;

        if key == "readpreferencetags" {
            tag_sets
                .get_or_insert_with(Vec::new)
                .push(Value::Document(parse_tag_set(uri, &value)?));
            continue;
        }

        let typed = if BOOL_OPTIONS.contains(&key.as_str()) {
            match value.to_ascii_lowercase().as_str() {
                "true" => Value::Boolean(true),
                "false" => Value::Boolean(false),
                _ => return Err(parse_failure(uri)),
            }
        } else if INT32_OPTIONS.contains(&key.as_str()) {
            Value::Int32(value.parse().map_err(|_| parse_failure(uri))?)
        } else if key == "w" {
            match value.parse::<i32>() {
                Ok(n) => Value::Int32(n),
                Err(_) => Value::String(value),
            }
        } else {
            Value::String(value)
        };
        options.insert(key, typed);
    }

    if let Some(sets) = tag_sets {
        options.insert("readpreferencetags", sets);
    }
    Ok(options)
}

fn parse_tag_set(uri: &str, raw: &str) -> Result<Document> {
    let mut tags = Document::new();
    for pair in raw.split(',').filter(|p| !p.is_empty()) {
        let (k, v) = pair.split_once(':').ok_or_else(|| parse_failure(uri))?;
        tags.append(k, v);
    }
    Ok(tags)
}
