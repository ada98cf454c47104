//! Request classification.

use exin_net::{Request, RequestMode};
use url::Url;

/// How an intercepted request is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// HTML page: network-first, offline document as fallback.
    Document,
    /// Anything else: cache-first, refreshed in the background.
    Asset,
}

/// Classify a request. Navigations and requests accepting HTML are documents.
pub fn classify(request: &Request) -> RequestKind {
    if request.mode == RequestMode::Navigate || request.accepts_html() {
        RequestKind::Document
    } else {
        RequestKind::Asset
    }
}

/// Whether `url` shares scheme, host and port with `scope`.
pub fn is_same_origin(scope: &Url, url: &Url) -> bool {
    scope.origin() == url.origin()
}
