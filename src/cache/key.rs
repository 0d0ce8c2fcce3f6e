//! Request fingerprints.
//!
//! A fingerprint is derived only from the deterministic inputs that decide a
//! response (endpoint, time-of-day bucket, rounded metrics, ...). Free-form
//! prompts whose output is expected to vary must never be part of one; callers
//! decide which operations are cacheable and build fingerprints only for those.

use crate::{Error, ErrorContext, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

static RAW_FINGERPRINT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9:_.\-]{1,200}$").expect("static regex"));

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Accept an externally computed fingerprint after checking its shape.
    pub fn from_raw(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        if !RAW_FINGERPRINT.is_match(&raw) {
            return Err(Error::validation_with_context(
                "fingerprint must be 1-200 characters of [A-Za-z0-9:_.-]",
                ErrorContext::new()
                    .with_field_path("request.fingerprint")
                    .with_source("fingerprint"),
            ));
        }
        Ok(Self(raw))
    }

    pub fn builder(scope: impl Into<String>) -> FingerprintBuilder {
        FingerprintBuilder::new(scope)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Coarse time-of-day bucket, the usual grain for greeting-style responses.
pub fn time_of_day(hour: u32) -> &'static str {
    match hour % 24 {
        5..=11 => "morning",
        12..=16 => "afternoon",
        17..=21 => "evening",
        _ => "night",
    }
}

/// Collects named, deterministic parts and hashes them in a canonical order.
pub struct FingerprintBuilder {
    parts: BTreeMap<String, String>,
}

impl FingerprintBuilder {
    pub fn new(scope: impl Into<String>) -> Self {
        let mut parts = BTreeMap::new();
        parts.insert("scope".to_string(), scope.into());
        Self { parts }
    }

    pub fn part(mut self, name: impl Into<String>, value: impl std::fmt::Display) -> Self {
        self.parts.insert(name.into(), value.to_string());
        self
    }

    /// Metric rounded to `decimals` places so near-identical inputs share a key.
    pub fn rounded(self, name: impl Into<String>, value: f64, decimals: usize) -> Self {
        let v = format!("{:.*}", decimals, value);
        self.part(name, v)
    }

    /// Integer metric rounded down to a multiple of `step`.
    pub fn bucketed(self, name: impl Into<String>, value: u64, step: u64) -> Self {
        let step = step.max(1);
        self.part(name, (value / step) * step)
    }

    pub fn time_of_day(self, hour: u32) -> Self {
        self.part("time_of_day", time_of_day(hour))
    }

    pub fn build(self) -> Fingerprint {
        let canonical = serde_json::to_string(&self.parts).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        let hash: String = hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect();
        Fingerprint(hash)
    }
}
