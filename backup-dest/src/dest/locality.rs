//! Locality-aware backup URIs.
//!
//! A partitioned backup is given as several URIs, each tagged with
//! `COCKROACH_LOCALITY=<key>=<value>`, plus exactly one tagged `default`.
//! The tag is stripped before a URI is handed back to callers.

use crate::layout::{join_url_path, DEFAULT_LOCALITY_VALUE, LOCALITY_URL_PARAM};
use crate::utils::errors::{DestError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use url::Url;

/// One `key=value` locality tier, e.g. `region=us-east1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalityTier {
    pub key: String,
    pub value: String,
}

impl FromStr for LocalityTier {
    type Err = DestError;

    fn from_str(tier: &str) -> Result<Self> {
        let invalid = || DestError::InvalidLocality {
            tier: tier.to_string(),
            reason: "tier must be in the form \"key=value\"".to_string(),
        };
        let (key, value) = tier.split_once('=').ok_or_else(invalid)?;
        if key.is_empty() || value.is_empty() || value.contains('=') {
            return Err(invalid());
        }
        Ok(Self {
            key: key.to_string(),
            value: value.to_string(),
        })
    }
}

/// A URI with its locality tag extracted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalityUri {
    /// `None` when the URI carried no (or an empty) tag.
    pub tag: Option<String>,
    pub base_uri: String,
}

impl LocalityUri {
    /// Strip the locality parameter from `uri` and append `append_path` to its path.
    pub fn parse(uri: &str, append_path: &str) -> Result<Self> {
        let mut parsed = parse_uri(uri)?;

        let mut tag = None;
        if parsed.query().is_some() {
            let mut kept: Vec<(String, String)> = Vec::new();
            for (k, v) in parsed.query_pairs() {
                if k == LOCALITY_URL_PARAM {
                    if tag.is_none() {
                        tag = Some(v.into_owned());
                    }
                } else {
                    kept.push((k.into_owned(), v.into_owned()));
                }
            }
            kept.sort_by(|a, b| a.0.cmp(&b.0));
            if kept.is_empty() {
                parsed.set_query(None);
            } else {
                parsed.query_pairs_mut().clear().extend_pairs(kept);
            }
        }

        set_joined_path(&mut parsed, &[append_path]);
        Ok(Self {
            tag: tag.filter(|t| !t.is_empty()),
            base_uri: parsed.to_string(),
        })
    }

    pub fn is_default(&self) -> bool {
        self.tag.as_deref() == Some(DEFAULT_LOCALITY_VALUE)
    }
}

/// The URIs of one (possibly partitioned) backup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalityUriSet {
    pub default_uri: String,
    /// Non-default URIs keyed by their locality tag.
    pub by_locality: BTreeMap<String, String>,
}

/// Split `uris` into the default URI and the per-locality URIs, appending
/// `append_path` to every path.
pub fn uris_by_locality<S: AsRef<str>>(uris: &[S], append_path: &str) -> Result<LocalityUriSet> {
    if let [only] = uris {
        let parsed = LocalityUri::parse(only.as_ref(), append_path)?;
        if let Some(tag) = parsed.tag.as_deref() {
            if tag != DEFAULT_LOCALITY_VALUE {
                return Err(DestError::InvalidSingleLocality(tag.to_string()));
            }
        }
        return Ok(LocalityUriSet {
            default_uri: parsed.base_uri,
            by_locality: BTreeMap::new(),
        });
    }

    let mut default_uri = None;
    let mut by_locality = BTreeMap::new();
    for uri in uris {
        let uri = uri.as_ref();
        let parsed = LocalityUri::parse(uri, append_path)?;
        let tag = parsed
            .tag
            .clone()
            .ok_or_else(|| DestError::MissingLocality(uri.to_string()))?;

        if parsed.is_default() {
            if default_uri.is_some() {
                return Err(DestError::MultipleDefaults);
            }
            default_uri = Some(parsed.base_uri);
            continue;
        }

        tag.parse::<LocalityTier>()?;
        if by_locality.contains_key(&tag) {
            return Err(DestError::DuplicateLocality(tag));
        }
        by_locality.insert(tag, parsed.base_uri);
    }

    Ok(LocalityUriSet {
        default_uri: default_uri.ok_or(DestError::NoDefault)?,
        by_locality,
    })
}

/// Append path segments to every URI, keeping queries (and locality tags) intact.
pub fn append_paths<S: AsRef<str>>(uris: &[S], segments: &[&str]) -> Result<Vec<String>> {
    uris.iter()
        .map(|uri| {
            let mut parsed = parse_uri(uri.as_ref())?;
            set_joined_path(&mut parsed, segments);
            Ok(parsed.to_string())
        })
        .collect()
}

/// Join `segments` onto the path of `uri`.
pub fn join_uri_path(uri: &str, segments: &[&str]) -> Result<String> {
    let mut parsed = parse_uri(uri)?;
    set_joined_path(&mut parsed, segments);
    Ok(parsed.to_string())
}

pub(crate) fn parse_uri(uri: &str) -> Result<Url> {
    Url::parse(uri).map_err(|source| DestError::InvalidUri {
        uri: uri.to_string(),
        source,
    })
}

fn set_joined_path(parsed: &mut Url, segments: &[&str]) {
    if segments.iter().all(|s| s.is_empty()) {
        return;
    }
    let mut parts = Vec::with_capacity(segments.len() + 1);
    parts.push(parsed.path());
    parts.extend_from_slice(segments);
    let mut joined = join_url_path(&parts);
    if parsed.has_host() && !joined.is_empty() && !joined.starts_with('/') {
        joined.insert(0, '/');
    }
    parsed.set_path(&joined);
}
