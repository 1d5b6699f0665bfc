//! Best-effort lookup of the user's storage location from their webid
//! profile document.
//!
//! This is a single-predicate scan, not an RDF parser: it finds the object of
//! `pim:storage` in the serialized document. Callers treat every failure as
//! "no storage advertised".

use http::{Method, Request, StatusCode};
use miette::Diagnostic;
use thiserror::Error;
use url::Url;

use crate::http_client::{BoxError, HttpClient};

/// The predicate linking a webid to its storage root.
pub const STORAGE_PREDICATE: &str = "http://www.w3.org/ns/pim/space#storage";

/// Errors from the profile fetch.
#[derive(Debug, Error, Diagnostic)]
pub enum StorageError {
    /// Network-level failure
    #[error("transport error fetching profile document")]
    #[diagnostic(code(solid_oidc::storage::transport))]
    Transport(#[source] BoxError),
    /// Request construction failed
    #[error(transparent)]
    #[diagnostic(code(solid_oidc::storage::http_build))]
    HttpBuild(#[from] http::Error),
    /// Non-success HTTP status
    #[error("profile document returned http status: {0}")]
    #[diagnostic(code(solid_oidc::storage::http_status))]
    BadStatus(StatusCode),
}

pub type Result<T> = core::result::Result<T, StorageError>;

/// Fetch the profile document behind `webid` and extract the storage IRI.
/// `Ok(None)` when the document has no storage triple.
#[tracing::instrument(level = "debug", skip_all, fields(webid = %webid))]
pub async fn fetch_storage_iri<T: HttpClient>(client: &T, webid: &Url) -> Result<Option<Url>> {
    let mut document_url = webid.clone();
    document_url.set_fragment(None);
    let request = Request::builder()
        .method(Method::GET)
        .uri(document_url.as_str())
        .header("Accept", "text/turtle")
        .body(Vec::new())?;
    let response = client
        .send_http(request)
        .await
        .map_err(|e| StorageError::Transport(Box::new(e)))?;
    if !response.status().is_success() {
        return Err(StorageError::BadStatus(response.status()));
    }
    let body = String::from_utf8_lossy(response.body());
    Ok(extract_storage_iri(&body, &document_url))
}

/// Scan the serialized profile for the storage predicate and resolve its
/// object against the document URL. Handles the full IRI and the common
/// `space:`/`pim:` prefixed spellings; a relative object like `/` resolves
/// to the webid's host root.
pub fn extract_storage_iri(document: &str, base: &Url) -> Option<Url> {
    let full = format!("<{STORAGE_PREDICATE}>");
    for predicate in [full.as_str(), "space:storage", "pim:storage"] {
        let mut search = 0;
        while let Some(found) = document[search..].find(predicate) {
            let after = search + found + predicate.len();
            if let Some(object) = next_iri(&document[after..]) {
                if let Ok(url) = base.join(object) {
                    return Some(url);
                }
            }
            search = after;
        }
    }
    None
}

/// The next `<...>` token, if it appears before any statement terminator.
fn next_iri(rest: &str) -> Option<&str> {
    let open = rest.find('<')?;
    if rest[..open].contains(['.', ';']) {
        return None;
    }
    let close = rest[open..].find('>')?;
    Some(&rest[open + 1..open + close])
}
