//! Bearer authentication for the Xcatcher service
//!
//! Every call (MCP, REST and the final file download) carries the same
//! `Authorization: Bearer <key>` header.

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use xcat_core::{Result, XcatError};

/// Build the headers shared by every request
///
/// The authorization value is marked sensitive so it never shows up in
/// debug output.
pub fn bearer_headers(api_key: &str) -> Result<HeaderMap> {
    let api_key = api_key.trim();
    if api_key.is_empty() {
        return Err(XcatError::MissingApiKey);
    }

    let mut auth = HeaderValue::from_str(&format!("Bearer {}", api_key))
        .map_err(|_| XcatError::Config("API key contains invalid header characters".to_string()))?;
    auth.set_sensitive(true);

    let mut headers = HeaderMap::new();
    headers.insert(AUTHORIZATION, auth);
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    Ok(headers)
}
