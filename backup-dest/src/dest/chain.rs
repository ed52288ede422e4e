//! Backup chain discovery.
//!
//! A chain is one full backup followed by its incremental layers. Layers sit
//! in `YYYYMMDD/HHMMSS.cc` folders below the incrementals location, so sorting
//! their names sorts them by end time.

use super::cancellable;
use super::locality::{join_uri_path, parse_uri};
use crate::layout::{BACKUP_MANIFEST_NAME, LISTING_DELIM_DATA_SLASH};
use crate::storage::ExternalStorage;
use crate::utils::errors::{DestError, Result};
use regex::Regex;
use std::ops::ControlFlow;
use std::sync::OnceLock;
use tokio_util::sync::CancellationToken;

/// Whether discovered layer paths keep their trailing `/BACKUP_MANIFEST`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestMode {
    Include,
    Omit,
}

/// `<day>/<time>.<cc>/BACKUP_MANIFEST`
fn incremental_layer_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(
            r"^/?[0-9][^/]*/[0-9][^/]*\.[0-9][0-9]/{}$",
            regex::escape(BACKUP_MANIFEST_NAME)
        ))
        .expect("incremental layer pattern is valid")
    })
}

/// `<a>/<b>/<c>/BACKUP_MANIFEST`, with an optional leading slash.
fn full_backup_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(
            r"^/?[^/]+/[^/]+/[^/]+/{}$",
            regex::escape(BACKUP_MANIFEST_NAME)
        ))
        .expect("full backup pattern is valid")
    })
}

/// List `store` once (stopping at `data/` directories) and keep names matching `re`.
async fn list_manifests(
    store: &dyn ExternalStorage,
    re: &Regex,
    context: &str,
    cancel: &CancellationToken,
) -> Result<Vec<String>> {
    let mut matches = Vec::new();
    cancellable(
        cancel,
        store.list("", LISTING_DELIM_DATA_SLASH, &mut |name| {
            if re.is_match(name) {
                matches.push(name.to_string());
            }
            ControlFlow::Continue(())
        }),
    )
    .await?
    .map_err(|e| DestError::storage(context, e))?;
    Ok(matches)
}

fn strip_manifest_name(path: &str) -> &str {
    path.strip_suffix(BACKUP_MANIFEST_NAME)
        .and_then(|p| p.strip_suffix('/'))
        .unwrap_or(path)
}

/// Incremental layers already present in an incrementals location, oldest first.
pub async fn find_prior_backups(
    store: &dyn ExternalStorage,
    mode: ManifestMode,
    cancel: &CancellationToken,
) -> Result<Vec<String>> {
    let found = list_manifests(
        store,
        incremental_layer_re(),
        "reading previous backup layers",
        cancel,
    )
    .await?;

    let mut layers: Vec<String> = found
        .iter()
        .map(|p| {
            let p = p.trim_start_matches('/');
            match mode {
                ManifestMode::Include => p.to_string(),
                ManifestMode::Omit => strip_manifest_name(p).to_string(),
            }
        })
        .collect();
    layers.sort();
    Ok(layers)
}

/// The chain handed to the backup job: `base_uri`, then each prior layer
/// joined onto `priors_default_uri`, in the order given.
pub fn assemble_chain<S: AsRef<str>>(
    base_uri: &str,
    priors_default_uri: &str,
    priors: &[S],
) -> Result<Vec<String>> {
    parse_uri(priors_default_uri)?;
    let mut chain = Vec::with_capacity(priors.len() + 1);
    chain.push(base_uri.to_string());
    for prior in priors {
        chain.push(join_uri_path(priors_default_uri, &[prior.as_ref()])?);
    }
    Ok(chain)
}

/// Subdirectories of a collection that hold a full backup.
pub async fn list_full_backups_in_collection(
    store: &dyn ExternalStorage,
    cancel: &CancellationToken,
) -> Result<Vec<String>> {
    let paths = list_manifests(
        store,
        full_backup_re(),
        "listing full backups in collection",
        cancel,
    )
    .await?;
    Ok(paths
        .iter()
        .map(|p| strip_manifest_name(p).to_string())
        .collect())
}
