// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Pattern
//!
//! Validated implementations kept for reuse, together with the usage
//! statistics that track how well they hold up when adapted.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Pattern aggregate and retrieval results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::signature::SemanticTaskSignature;

// Fixed namespace so the same (signature, code) pair always maps to the same id.
const PATTERN_NAMESPACE: Uuid = Uuid::from_u128(0x6c0f_3a52_9d1e_4b7a_8e55_1f2d_c3b4_a901);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PatternId(pub Uuid);

impl PatternId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Content-derived id: storing the same implementation for the same
    /// signature twice yields the same id.
    pub fn derive(signature_hash: &str, code: &str) -> Self {
        let mut name = Vec::with_capacity(signature_hash.len() + code.len() + 1);
        name.extend_from_slice(signature_hash.as_bytes());
        name.push(0);
        name.extend_from_slice(code.as_bytes());
        Self(Uuid::new_v5(&PATTERN_NAMESPACE, &name))
    }
}

impl Default for PatternId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PatternId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Source text plus the dependencies it declares.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Implementation {
    pub code: String,
    #[serde(default)]
    pub declared_dependencies: Vec<String>,
    #[serde(default)]
    pub external_library_refs: Vec<String>,
}

impl Implementation {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            ..Default::default()
        }
    }

    pub fn with_dependencies(mut self, deps: Vec<String>) -> Self {
        self.declared_dependencies = deps;
        self
    }

    pub fn with_library_refs(mut self, refs: Vec<String>) -> Self {
        self.external_library_refs = refs;
        self
    }

    /// First `max_chars` characters of the code.
    pub fn preview(&self, max_chars: usize) -> &str {
        match self.code.char_indices().nth(max_chars) {
            Some((idx, _)) => &self.code[..idx],
            None => &self.code,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternMetadata {
    /// Validation score at the time the pattern was stored.
    pub quality_score: f64,
    pub uses: u64,
    pub successes: u64,
    /// `successes / uses`, or 0.0 before the first use.
    pub success_rate: f64,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl PatternMetadata {
    pub fn new(quality_score: f64) -> Self {
        Self {
            quality_score,
            uses: 0,
            successes: 0,
            success_rate: 0.0,
            created_at: Utc::now(),
            last_used_at: None,
        }
    }

    pub fn record_usage(&mut self, succeeded: bool) {
        self.uses += 1;
        if succeeded {
            self.successes += 1;
        }
        self.success_rate = self.successes as f64 / self.uses as f64;
        self.last_used_at = Some(Utc::now());
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredPattern {
    pub id: PatternId,
    pub signature: SemanticTaskSignature,
    pub implementation: Implementation,
    pub metadata: PatternMetadata,
}

impl StoredPattern {
    pub fn new(
        signature: SemanticTaskSignature,
        implementation: Implementation,
        quality_score: f64,
    ) -> Self {
        Self {
            id: PatternId::derive(signature.signature_hash(), &implementation.code),
            signature,
            implementation,
            metadata: PatternMetadata::new(quality_score),
        }
    }
}

/// A retrieval hit. `score` is the weighted blend of the two similarities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternMatch {
    pub pattern: StoredPattern,
    pub score: f64,
    pub vector_similarity: f64,
    pub structural_similarity: f64,
}
