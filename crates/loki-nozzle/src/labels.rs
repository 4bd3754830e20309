// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Label sets attached to every log line pushed to Loki.
//!
//! A [`LabelSet`] keeps its keys sorted so that its fingerprint, the
//! `{key="value", ...}` rendering Loki uses to identify a stream, is the same
//! regardless of insertion order.

use crate::errors::LabelError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSet(BTreeMap<String, String>);

impl LabelSet {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns a new set holding the labels of `self` overlaid with `other`.
    /// On a key collision the value from `other` wins.
    pub fn merge(&self, other: &LabelSet) -> LabelSet {
        let mut merged = self.0.clone();
        merged.extend(other.0.iter().map(|(k, v)| (k.clone(), v.clone())));
        Self(merged)
    }

    /// Canonical serialization used as the stream grouping key.
    pub fn fingerprint(&self) -> String {
        self.to_string()
    }

    /// Parses a comma-separated list of `key:value` pairs, such as
    /// `"env:prod, team:core"`. Empty segments are skipped.
    ///
    /// # Examples
    ///
    /// ```
    /// use loki_nozzle::labels::LabelSet;
    ///
    /// let labels = LabelSet::parse_base_labels("env:prod, team:core").unwrap();
    /// assert_eq!(labels.get("env"), Some("prod"));
    /// assert!(LabelSet::parse_base_labels("env=prod").is_err());
    /// ```
    pub fn parse_base_labels(base_labels: &str) -> Result<Self, LabelError> {
        let mut labels = Self::new();
        for kv_pair in base_labels.split(',') {
            let cleaned = kv_pair.trim();
            if cleaned.is_empty() {
                continue;
            }
            let parts = cleaned.split(':').collect::<Vec<&str>>();
            if parts.len() != 2 {
                return Err(LabelError::InvalidPair(cleaned.to_string()));
            }
            labels.insert(parts[0].trim(), parts[1].trim());
        }
        Ok(labels)
    }
}

impl fmt::Display for LabelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (key, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{key}=\"")?;
            for c in value.chars() {
                match c {
                    '\\' => f.write_str("\\\\")?,
                    '"' => f.write_str("\\\"")?,
                    '\n' => f.write_str("\\n")?,
                    '\r' => f.write_str("\\r")?,
                    '\t' => f.write_str("\\t")?,
                    c => write!(f, "{c}")?,
                }
            }
            f.write_str("\"")?;
        }
        f.write_str("}")
    }
}

impl<K, V> FromIterator<(K, V)> for LabelSet
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}
