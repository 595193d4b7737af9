//! Mapping of protected URL paths to permission groups.
//!
//! A path `/<prefix>/<group>/<asset...>` names the group that guards the
//! asset. The mapping is pure; it never touches the filesystem.
use crate::PathError;
use percent_encoding::percent_decode_str;

/// Group and asset derived from a protected URL path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRequest {
    pub group: String,
    pub asset_path: String,
}

/// Strips a fixed prefix and splits off the group segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMapper {
    prefix: String,
}

impl PathMapper {
    /// `prefix` is normalized to a leading `/` with no trailing `/`, so
    /// `secure/`, `/secure/` and `/secure` are equivalent.
    pub fn new(prefix: &str) -> Self {
        let trimmed = prefix.trim().trim_matches('/');
        let prefix = if trimmed.is_empty() {
            String::new()
        } else {
            format!("/{trimmed}")
        };
        Self { prefix }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Map a request path (query and fragment allowed) to a resource.
    ///
    /// Percent-encoding is decoded once before any check, so `%2e%2e` counts
    /// as a traversal segment.
    pub fn map(&self, url_path: &str) -> Result<ResourceRequest, PathError> {
        let path = url_path
            .split(['?', '#'])
            .next()
            .unwrap_or_default();
        let decoded = percent_decode_str(path)
            .decode_utf8()
            .map_err(|_| PathError::InvalidEncoding)?;
        if decoded.contains('\0') {
            return Err(PathError::NulByte);
        }

        let rest = decoded
            .strip_prefix(self.prefix.as_str())
            .ok_or(PathError::OutsidePrefix)?;
        if rest.is_empty() || rest == "/" {
            return Err(PathError::EmptyGroup);
        }
        // Segment boundary: `/securely/...` is not under `/secure`.
        let rest = rest.strip_prefix('/').ok_or(PathError::OutsidePrefix)?;

        let Some((group, asset_path)) = rest.split_once('/') else {
            if rest.is_empty() {
                return Err(PathError::EmptyGroup);
            }
            return Err(PathError::MissingAssetPath);
        };
        if group.is_empty() {
            return Err(PathError::EmptyGroup);
        }
        if rest.split('/').any(|segment| segment == "." || segment == "..") {
            return Err(PathError::Traversal);
        }
        if asset_path.is_empty() {
            return Err(PathError::MissingAssetPath);
        }

        Ok(ResourceRequest {
            group: group.to_string(),
            asset_path: asset_path.to_string(),
        })
    }
}

/// One-shot form of [`PathMapper::map`].
pub fn map_to_group(prefix: &str, url_path: &str) -> Result<ResourceRequest, PathError> {
    PathMapper::new(prefix).map(url_path)
}
