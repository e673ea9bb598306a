// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Infrastructure layer: similarity index and embedding backends.

pub mod embedding_client;
pub mod memory_index;
pub mod repository;

pub use embedding_client::{HashingEmbedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use memory_index::InMemoryVectorIndex;
pub use repository::{EmbeddingProvider, IndexCandidate, IndexFilter, VectorIndex};
