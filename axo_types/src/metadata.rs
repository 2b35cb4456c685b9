//! Identity record for active object instances
//!
//! A [`MetadataX`] addresses one version of one active object: which bucket
//! and key it lives under, which endpoint hosts it, and which type it is.
//! The `uri` field is derived from the other fields and rebuilt on every
//! change; it cannot be set directly.

use crate::error::{AxoError, AxoResult};
use crate::ids::new_id;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// URI scheme for active object addresses.
pub const URI_SCHEME: &str = "axo";

const URI_DELIMITERS: [char; 6] = [':', '/', '?', '&', '=', '#'];

/// Strips all whitespace from an identity value.
pub fn normalize(value: &str) -> String {
    value.chars().filter(|c| !c.is_whitespace()).collect()
}

fn normalize_field(field: &str, value: &str) -> AxoResult<String> {
    let normalized = normalize(value);
    if let Some(c) = normalized.chars().find(|c| URI_DELIMITERS.contains(c)) {
        return Err(AxoError::validation(format!(
            "{} '{}' contains reserved character '{}'",
            field, normalized, c
        )));
    }
    Ok(normalized)
}

fn normalize_or_generate(field: &str, value: Option<&str>) -> AxoResult<String> {
    let normalized = match value {
        Some(value) => normalize_field(field, value)?,
        None => String::new(),
    };
    if normalized.is_empty() {
        Ok(new_id())
    } else {
        Ok(normalized)
    }
}

/// Partial field set accepted by [`MetadataX::new`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataInit {
    pub key: Option<String>,
    pub bucket_id: Option<String>,
    pub source_bucket_id: Option<String>,
    pub sink_bucket_id: Option<String>,
    pub endpoint_id: Option<String>,
    pub class_name: Option<String>,
    pub module: Option<String>,
    pub version: Option<u64>,
    pub alias: Option<String>,
    pub dependencies: Vec<String>,
}

impl MetadataInit {
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn bucket_id(mut self, bucket_id: impl Into<String>) -> Self {
        self.bucket_id = Some(bucket_id.into());
        self
    }

    pub fn endpoint_id(mut self, endpoint_id: impl Into<String>) -> Self {
        self.endpoint_id = Some(endpoint_id.into());
        self
    }

    pub fn class_name(mut self, class_name: impl Into<String>) -> Self {
        self.class_name = Some(class_name.into());
        self
    }

    pub fn module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    pub fn version(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn dependency(mut self, dependency: impl Into<String>) -> Self {
        self.dependencies.push(dependency.into());
        self
    }
}

/// How [`MetadataX::bump_version`] changes the version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionBump {
    /// Set the version to an absolute value
    To(u64),
    /// Add a (possibly negative) delta
    Delta(i64),
}

/// Canonical identity of an active object instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "MetadataInit", into = "MetadataRecord")]
pub struct MetadataX {
    key: String,
    bucket_id: String,
    source_bucket_id: String,
    sink_bucket_id: String,
    endpoint_id: String,
    class_name: String,
    module: String,
    version: u64,
    alias: String,
    dependencies: Vec<String>,
    uri: String,
}

/// Serialized form of [`MetadataX`], including the derived `uri`.
#[derive(Debug, Clone, Serialize)]
struct MetadataRecord {
    key: String,
    bucket_id: String,
    source_bucket_id: String,
    sink_bucket_id: String,
    endpoint_id: String,
    class_name: String,
    module: String,
    version: u64,
    alias: String,
    dependencies: Vec<String>,
    uri: String,
}

impl From<MetadataX> for MetadataRecord {
    fn from(m: MetadataX) -> Self {
        Self {
            key: m.key,
            bucket_id: m.bucket_id,
            source_bucket_id: m.source_bucket_id,
            sink_bucket_id: m.sink_bucket_id,
            endpoint_id: m.endpoint_id,
            class_name: m.class_name,
            module: m.module,
            version: m.version,
            alias: m.alias,
            dependencies: m.dependencies,
            uri: m.uri,
        }
    }
}

impl TryFrom<MetadataInit> for MetadataX {
    type Error = AxoError;

    fn try_from(init: MetadataInit) -> AxoResult<Self> {
        Self::new(init)
    }
}

impl MetadataX {
    /// Builds a record from a partial field set, generating missing
    /// identifiers and validating the rest.
    pub fn new(init: MetadataInit) -> AxoResult<Self> {
        let mut metadata = Self {
            key: normalize_or_generate("key", init.key.as_deref())?,
            bucket_id: normalize_or_generate("bucket_id", init.bucket_id.as_deref())?,
            source_bucket_id: normalize_or_generate(
                "source_bucket_id",
                init.source_bucket_id.as_deref(),
            )?,
            sink_bucket_id: normalize_or_generate(
                "sink_bucket_id",
                init.sink_bucket_id.as_deref(),
            )?,
            endpoint_id: normalize_or_generate("endpoint_id", init.endpoint_id.as_deref())?,
            class_name: normalize_field("class_name", init.class_name.as_deref().unwrap_or(""))?,
            module: normalize_field("module", init.module.as_deref().unwrap_or(""))?,
            version: init.version.unwrap_or(0),
            alias: normalize_field("alias", init.alias.as_deref().unwrap_or(""))?,
            dependencies: Vec::new(),
            uri: String::new(),
        };
        for dependency in &init.dependencies {
            metadata.push_dependency(dependency)?;
        }
        metadata.rebuild_uri();
        Ok(metadata)
    }

    /// Builds a record with every identifier generated.
    pub fn generated() -> Self {
        let mut metadata = Self {
            key: new_id(),
            bucket_id: new_id(),
            source_bucket_id: new_id(),
            sink_bucket_id: new_id(),
            endpoint_id: new_id(),
            class_name: String::new(),
            module: String::new(),
            version: 0,
            alias: String::new(),
            dependencies: Vec::new(),
            uri: String::new(),
        };
        metadata.rebuild_uri();
        metadata
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn bucket_id(&self) -> &str {
        &self.bucket_id
    }

    pub fn source_bucket_id(&self) -> &str {
        &self.source_bucket_id
    }

    pub fn sink_bucket_id(&self) -> &str {
        &self.sink_bucket_id
    }

    pub fn endpoint_id(&self) -> &str {
        &self.endpoint_id
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    /// Derived address of this version.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Address of a method call on this version.
    pub fn uri_for_method(&self, method: &str) -> String {
        let mut uri = self.address();
        uri.method = Some(normalize(method)).filter(|m| !m.is_empty());
        uri.to_string()
    }

    /// Structured form of [`MetadataX::uri`].
    pub fn address(&self) -> AxoUri {
        AxoUri {
            bucket_id: self.bucket_id.clone(),
            key: self.key.clone(),
            version: self.version,
            class_name: Some(self.class_name.clone()).filter(|c| !c.is_empty()),
            method: None,
        }
    }

    pub fn set_key(&mut self, key: &str) -> AxoResult<()> {
        self.key = normalize_or_generate("key", Some(key))?;
        self.rebuild_uri();
        Ok(())
    }

    pub fn set_bucket_id(&mut self, bucket_id: &str) -> AxoResult<()> {
        self.bucket_id = normalize_or_generate("bucket_id", Some(bucket_id))?;
        self.rebuild_uri();
        Ok(())
    }

    pub fn set_class_name(&mut self, class_name: &str) -> AxoResult<()> {
        self.class_name = normalize_field("class_name", class_name)?;
        self.rebuild_uri();
        Ok(())
    }

    pub fn set_module(&mut self, module: &str) -> AxoResult<()> {
        self.module = normalize_field("module", module)?;
        Ok(())
    }

    pub fn set_alias(&mut self, alias: &str) -> AxoResult<()> {
        self.alias = normalize_field("alias", alias)?;
        Ok(())
    }

    /// Adds a dependency unless it is already listed.
    pub fn add_dependency(&mut self, dependency: &str) -> AxoResult<()> {
        self.push_dependency(dependency)
    }

    fn push_dependency(&mut self, dependency: &str) -> AxoResult<()> {
        let normalized = normalize(dependency);
        if normalized.is_empty() {
            return Err(AxoError::validation("dependency cannot be empty"));
        }
        if !self.dependencies.contains(&normalized) {
            self.dependencies.push(normalized);
        }
        Ok(())
    }

    /// Returns a copy with the version changed and the uri rebuilt.
    pub fn bump_version(&self, bump: VersionBump) -> AxoResult<Self> {
        let version = match bump {
            VersionBump::To(version) => version,
            VersionBump::Delta(delta) => {
                let next = self.version as i128 + delta as i128;
                if next < 0 || next > u64::MAX as i128 {
                    return Err(AxoError::validation(format!(
                        "version {} + {} is out of range",
                        self.version, delta
                    )));
                }
                next as u64
            }
        };
        let mut next = self.clone();
        next.version = version;
        next.rebuild_uri();
        Ok(next)
    }

    /// Returns a copy hosted by another endpoint.
    pub fn with_endpoint(&self, endpoint_id: &str) -> AxoResult<Self> {
        let mut next = self.clone();
        next.endpoint_id = normalize_or_generate("endpoint_id", Some(endpoint_id))?;
        next.rebuild_uri();
        Ok(next)
    }

    fn rebuild_uri(&mut self) {
        self.uri = self.address().to_string();
    }
}

impl fmt::Display for MetadataX {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri)
    }
}

/// Parsed form of an active object URI:
/// `axo://bucket:key/version[?class=..&method=..]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AxoUri {
    pub bucket_id: String,
    pub key: String,
    pub version: u64,
    pub class_name: Option<String>,
    pub method: Option<String>,
}

impl AxoUri {
    /// Parses a URI produced by [`MetadataX::uri`] or
    /// [`MetadataX::uri_for_method`].
    pub fn parse(uri: &str) -> AxoResult<Self> {
        let invalid = |reason: &str| AxoError::validation(format!("invalid uri '{}': {}", uri, reason));

        let rest = uri
            .strip_prefix(URI_SCHEME)
            .and_then(|rest| rest.strip_prefix("://"))
            .ok_or_else(|| invalid("expected axo:// scheme"))?;

        let (path, query) = match rest.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (rest, None),
        };

        let (location, version) = path
            .split_once('/')
            .ok_or_else(|| invalid("missing version"))?;
        let (bucket_id, key) = location
            .split_once(':')
            .ok_or_else(|| invalid("expected bucket:key"))?;
        if bucket_id.is_empty() || key.is_empty() || key.contains(':') {
            return Err(invalid("expected bucket:key"));
        }
        let version = version
            .parse::<u64>()
            .map_err(|_| invalid("version is not a non-negative integer"))?;

        let mut parsed = AxoUri {
            bucket_id: bucket_id.to_string(),
            key: key.to_string(),
            version,
            class_name: None,
            method: None,
        };

        if let Some(query) = query {
            for pair in query.split('&') {
                let (name, value) = pair
                    .split_once('=')
                    .ok_or_else(|| invalid("malformed query"))?;
                if value.is_empty() {
                    return Err(invalid("empty query value"));
                }
                match name {
                    "class" => parsed.class_name = Some(value.to_string()),
                    "method" => parsed.method = Some(value.to_string()),
                    other => return Err(invalid(&format!("unknown query field '{}'", other))),
                }
            }
        }

        Ok(parsed)
    }
}

impl FromStr for AxoUri {
    type Err = AxoError;

    fn from_str(s: &str) -> AxoResult<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for AxoUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://{}:{}/{}",
            URI_SCHEME, self.bucket_id, self.key, self.version
        )?;
        match (&self.class_name, &self.method) {
            (Some(class), Some(method)) => write!(f, "?class={}&method={}", class, method),
            (Some(class), None) => write!(f, "?class={}", class),
            (None, Some(method)) => write!(f, "?method={}", method),
            (None, None) => Ok(()),
        }
    }
}
