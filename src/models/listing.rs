//! ListObjects parameters, results, and the paging logic shared by the
//! local stores.

use crate::models::object::ObjectInfo;

/// Upper bound S3 applies to a single listing page.
pub const MAX_KEYS_LIMIT: usize = 1000;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListObjectsParams {
    pub prefix: Option<String>,
    pub delimiter: Option<String>,
    /// Exclusive lower bound: a continuation token (decoded) or `start-after`.
    pub marker: Option<String>,
    pub max_keys: usize,
}

impl Default for ListObjectsParams {
    fn default() -> Self {
        Self {
            prefix: None,
            delimiter: None,
            marker: None,
            max_keys: MAX_KEYS_LIMIT,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListObjectsResult {
    pub objects: Vec<ObjectInfo>,
    pub common_prefixes: Vec<String>,
    pub is_truncated: bool,
    /// Marker to resume from when `is_truncated` is set.
    pub next_marker: Option<String>,
}

impl ListObjectsResult {
    pub fn key_count(&self) -> usize {
        self.objects.len() + self.common_prefixes.len()
    }
}

/// Accumulates keys (fed in ascending order) into one listing page.
///
/// Handles prefix filtering, delimiter grouping, marker skipping and
/// truncation; stores only need to produce sorted candidates.
pub struct ListingBuilder<'a> {
    params: &'a ListObjectsParams,
    max_keys: usize,
    result: ListObjectsResult,
    last_entry: Option<String>,
}

impl<'a> ListingBuilder<'a> {
    pub fn new(params: &'a ListObjectsParams) -> Self {
        Self {
            params,
            max_keys: params.max_keys.clamp(1, MAX_KEYS_LIMIT),
            result: ListObjectsResult::default(),
            last_entry: None,
        }
    }

    /// Offer the next key. Returns `false` once the page is full and no more
    /// candidates are needed.
    pub fn push(&mut self, object: ObjectInfo) -> bool {
        if self.result.is_truncated {
            return false;
        }
        if let Some(prefix) = self.params.prefix.as_deref() {
            if !object.key.starts_with(prefix) {
                return true;
            }
        }
        if let Some(marker) = self.params.marker.as_deref() {
            if object.key.as_str() <= marker {
                return true;
            }
        }

        let common_prefix = self.params.delimiter.as_deref().and_then(|delim| {
            compute_common_prefix(&object.key, self.params.prefix.as_deref(), delim)
        });

        if let Some(prefix) = &common_prefix {
            // Keys rolled up into a prefix that was already emitted, either on
            // this page or as the marker of the previous one.
            if self.last_entry.as_deref() == Some(prefix.as_str())
                || self.params.marker.as_deref() == Some(prefix.as_str())
            {
                return true;
            }
        }

        if self.result.key_count() == self.max_keys {
            self.result.is_truncated = true;
            self.result.next_marker = self.last_entry.clone();
            return false;
        }

        match common_prefix {
            Some(prefix) => {
                self.last_entry = Some(prefix.clone());
                self.result.common_prefixes.push(prefix);
            }
            None => {
                self.last_entry = Some(object.key.clone());
                self.result.objects.push(object);
            }
        }
        true
    }

    pub fn finish(self) -> ListObjectsResult {
        self.result
    }
}

/// Compute a synthetic "common prefix" for S3 list semantics.
///
/// Used only when a delimiter is provided. Returns Some(prefix) if the key
/// belongs to a grouped prefix, otherwise None.
pub fn compute_common_prefix(
    key: &str,
    requested_prefix: Option<&str>,
    delimiter: &str,
) -> Option<String> {
    if delimiter.is_empty() {
        return None;
    }
    let after_prefix = match requested_prefix {
        Some(prefix) => key.strip_prefix(prefix)?,
        None => key,
    };

    let pos = after_prefix.find(delimiter)?;
    let mut combined = String::new();
    if let Some(prefix) = requested_prefix {
        combined.push_str(prefix);
    }
    combined.push_str(&after_prefix[..pos + delimiter.len()]);
    Some(combined)
}
