// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain
//!
//! Task signatures and stored patterns.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer

pub mod pattern;
pub mod signature;

pub use pattern::*;
pub use signature::*;
