// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Semantic Task Signature
//!
//! Canonical, comparable description of a unit of work. Two signatures built
//! from the same purpose, interface, security level and performance tier
//! always carry the same `signature_hash`, regardless of how the caller
//! ordered its inputs or formatted its purpose text.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Identity and similarity of tasks for pattern retrieval

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Domain assigned when the caller does not name one.
pub const DEFAULT_DOMAIN: &str = "general";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityLevel {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl SecurityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityLevel::Low => "LOW",
            SecurityLevel::Medium => "MEDIUM",
            SecurityLevel::High => "HIGH",
            SecurityLevel::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PerformanceTier {
    Low,
    #[default]
    Medium,
    High,
}

impl PerformanceTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            PerformanceTier::Low => "LOW",
            PerformanceTier::Medium => "MEDIUM",
            PerformanceTier::High => "HIGH",
        }
    }
}

impl fmt::Display for PerformanceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Relative weight of each component in [`SemanticTaskSignature::similarity_with`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimilarityWeights {
    pub purpose: f64,
    pub interface: f64,
    pub domain: f64,
    pub constraints: f64,
}

impl Default for SimilarityWeights {
    fn default() -> Self {
        Self {
            purpose: 0.4,
            interface: 0.3,
            domain: 0.2,
            constraints: 0.1,
        }
    }
}

impl SimilarityWeights {
    fn total(&self) -> f64 {
        self.purpose + self.interface + self.domain + self.constraints
    }
}

/// Immutable task signature. Construct through [`SignatureBuilder`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemanticTaskSignature {
    purpose: String,
    inputs: BTreeMap<String, String>,
    outputs: BTreeMap<String, String>,
    domain: String,
    constraints: BTreeSet<String>,
    security_level: SecurityLevel,
    performance_tier: PerformanceTier,
    idempotent: bool,
    signature_hash: String,
}

impl SemanticTaskSignature {
    pub fn builder(purpose: impl Into<String>) -> SignatureBuilder {
        SignatureBuilder::new(purpose)
    }

    pub fn purpose(&self) -> &str {
        &self.purpose
    }

    pub fn inputs(&self) -> &BTreeMap<String, String> {
        &self.inputs
    }

    pub fn outputs(&self) -> &BTreeMap<String, String> {
        &self.outputs
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn constraints(&self) -> &BTreeSet<String> {
        &self.constraints
    }

    pub fn security_level(&self) -> SecurityLevel {
        self.security_level
    }

    pub fn performance_tier(&self) -> PerformanceTier {
        self.performance_tier
    }

    pub fn idempotent(&self) -> bool {
        self.idempotent
    }

    /// Hex SHA-256 over purpose, interface, security level and performance tier.
    pub fn signature_hash(&self) -> &str {
        &self.signature_hash
    }

    /// Similarity in `[0, 1]` using the default weights.
    pub fn similarity(&self, other: &Self) -> f64 {
        self.similarity_with(other, &SimilarityWeights::default())
    }

    /// Weighted blend of purpose token overlap, interface name overlap,
    /// domain equality and constraint overlap.
    ///
    /// Symmetric, reflexive (`s.similarity(&s) == 1.0`) and bounded to `[0, 1]`.
    pub fn similarity_with(&self, other: &Self, weights: &SimilarityWeights) -> f64 {
        if self == other {
            return 1.0;
        }

        let total = weights.total();
        if total <= 0.0 {
            return 0.0;
        }

        let purpose = jaccard(&purpose_tokens(&self.purpose), &purpose_tokens(&other.purpose));
        let interface = jaccard(&self.interface_names(), &other.interface_names());
        let domain = if self.domain == other.domain { 1.0 } else { 0.0 };
        let constraints = jaccard(&self.constraints, &other.constraints);

        let weighted = purpose * weights.purpose
            + interface * weights.interface
            + domain * weights.domain
            + constraints * weights.constraints;

        (weighted / total).clamp(0.0, 1.0)
    }

    fn interface_names(&self) -> BTreeSet<String> {
        self.inputs
            .keys()
            .map(|name| format!("in:{name}"))
            .chain(self.outputs.keys().map(|name| format!("out:{name}")))
            .collect()
    }
}

impl fmt::Display for SemanticTaskSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = self.signature_hash.get(..12).unwrap_or(&self.signature_hash);
        write!(f, "{} [{}:{}]", self.purpose, self.domain, short)
    }
}

/// Builder collecting raw task attributes before normalization.
#[derive(Debug, Clone, Default)]
pub struct SignatureBuilder {
    purpose: String,
    inputs: BTreeMap<String, String>,
    outputs: BTreeMap<String, String>,
    domain: Option<String>,
    constraints: BTreeSet<String>,
    security_level: SecurityLevel,
    performance_tier: PerformanceTier,
    idempotent: bool,
}

impl SignatureBuilder {
    pub fn new(purpose: impl Into<String>) -> Self {
        Self {
            purpose: purpose.into(),
            ..Default::default()
        }
    }

    pub fn input(mut self, name: impl Into<String>, type_name: impl Into<String>) -> Self {
        self.inputs.insert(name.into(), type_name.into());
        self
    }

    pub fn inputs<I, K, V>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.inputs
            .extend(inputs.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn output(mut self, name: impl Into<String>, type_name: impl Into<String>) -> Self {
        self.outputs.insert(name.into(), type_name.into());
        self
    }

    pub fn outputs<I, K, V>(mut self, outputs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.outputs
            .extend(outputs.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn constraint(mut self, constraint: impl Into<String>) -> Self {
        self.constraints.insert(constraint.into());
        self
    }

    pub fn constraints<I, S>(mut self, constraints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.constraints
            .extend(constraints.into_iter().map(Into::into));
        self
    }

    pub fn security_level(mut self, level: SecurityLevel) -> Self {
        self.security_level = level;
        self
    }

    pub fn performance_tier(mut self, tier: PerformanceTier) -> Self {
        self.performance_tier = tier;
        self
    }

    pub fn idempotent(mut self, idempotent: bool) -> Self {
        self.idempotent = idempotent;
        self
    }

    /// Normalize every field and compute the signature hash.
    pub fn build(self) -> SemanticTaskSignature {
        let purpose = normalize_text(&self.purpose);
        let inputs = normalize_interface(self.inputs);
        let outputs = normalize_interface(self.outputs);
        let domain = self
            .domain
            .map(|d| normalize_text(&d))
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| DEFAULT_DOMAIN.to_string());
        let constraints = self
            .constraints
            .iter()
            .map(|c| normalize_text(c))
            .filter(|c| !c.is_empty())
            .collect();

        let signature_hash = compute_hash(
            &purpose,
            &inputs,
            &outputs,
            self.security_level,
            self.performance_tier,
        );

        SemanticTaskSignature {
            purpose,
            inputs,
            outputs,
            domain,
            constraints,
            security_level: self.security_level,
            performance_tier: self.performance_tier,
            idempotent: self.idempotent,
            signature_hash,
        }
    }
}

/// Lowercase and collapse runs of whitespace.
fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

// Type names keep their case; only whitespace is stripped ("Vec< u8 >" == "Vec<u8>").
fn normalize_interface(raw: BTreeMap<String, String>) -> BTreeMap<String, String> {
    raw.into_iter()
        .filter_map(|(name, type_name)| {
            let name = name.trim().to_string();
            if name.is_empty() {
                return None;
            }
            let type_name: String = type_name.chars().filter(|c| !c.is_whitespace()).collect();
            Some((name, type_name))
        })
        .collect()
}

fn compute_hash(
    purpose: &str,
    inputs: &BTreeMap<String, String>,
    outputs: &BTreeMap<String, String>,
    security_level: SecurityLevel,
    performance_tier: PerformanceTier,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(purpose.as_bytes());
    hasher.update(b"\x1e");
    for (name, type_name) in inputs {
        hasher.update(name.as_bytes());
        hasher.update(b":");
        hasher.update(type_name.as_bytes());
        hasher.update(b"\x1f");
    }
    hasher.update(b"\x1e");
    for (name, type_name) in outputs {
        hasher.update(name.as_bytes());
        hasher.update(b":");
        hasher.update(type_name.as_bytes());
        hasher.update(b"\x1f");
    }
    hasher.update(b"\x1e");
    hasher.update(security_level.as_str().as_bytes());
    hasher.update(b"\x1e");
    hasher.update(performance_tier.as_str().as_bytes());
    hex::encode(hasher.finalize())
}

fn purpose_tokens(purpose: &str) -> BTreeSet<String> {
    purpose
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

/// Jaccard index; two empty sets are identical.
fn jaccard<T: Ord>(a: &BTreeSet<T>, b: &BTreeSet<T>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    intersection / union
}
