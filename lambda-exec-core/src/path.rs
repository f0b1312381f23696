// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Source locator parsing.
//!
//! `s3://<bucket>/<key>` is the only accepted form. The key is passed
//! through as-is; path safety is enforced at extraction time.

use percent_encoding::percent_decode_str;
use url::Url;

use crate::error::ParseError;
use crate::types::ObjectLocation;

/// Scheme identifying the storage backend.
pub const S3_SCHEME: &str = "s3";

/// Split a source locator into bucket and key.
pub fn resolve(locator: &str) -> Result<ObjectLocation, ParseError> {
    // `Url::parse` strips these while `raw_path` keeps them
    if locator.trim() != locator || locator.chars().any(|c| c.is_ascii_control()) {
        return Err(ParseError::InvalidUri {
            locator: locator.to_string(),
            reason: "contains whitespace padding or control characters".to_string(),
        });
    }

    let url = Url::parse(locator).map_err(|e| {
        tracing::debug!(locator = %locator, error = %e, "Failed to parse locator as URL");
        ParseError::InvalidUri {
            locator: locator.to_string(),
            reason: e.to_string(),
        }
    })?;

    if url.scheme() != S3_SCHEME {
        return Err(ParseError::NotSupportedScheme {
            scheme: url.scheme().to_string(),
            expected: S3_SCHEME,
        });
    }

    if url.cannot_be_a_base() {
        return Err(ParseError::InvalidUri {
            locator: locator.to_string(),
            reason: "expected s3://<bucket>/<key>".to_string(),
        });
    }

    let container = url.host_str().unwrap_or_default().to_string();

    let path = raw_path(locator);
    let path = path.strip_prefix('/').unwrap_or(path);
    let object = percent_decode_str(path)
        .decode_utf8()
        .map_err(|e| ParseError::InvalidUri {
            locator: locator.to_string(),
            reason: format!("key is not valid UTF-8: {}", e),
        })?
        .into_owned();

    Ok(ObjectLocation::new(container, object))
}

/// Path component exactly as written.
///
/// `Url::path` has dot segments already collapsed; the key has to
/// reach the extraction stage unmodified.
fn raw_path(locator: &str) -> &str {
    let rest = locator.split_once(':').map(|(_, r)| r).unwrap_or_default();
    let rest = rest.split(['?', '#']).next().unwrap_or_default();
    match rest.strip_prefix("//") {
        Some(authority_and_path) => authority_and_path
            .find('/')
            .map(|i| &authority_and_path[i..])
            .unwrap_or_default(),
        None => rest,
    }
}
