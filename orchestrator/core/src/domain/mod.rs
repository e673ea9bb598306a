// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain
//!
//! Tasks, the task graph, execution records and the capability interfaces
//! the application services depend on.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer

pub mod config;
pub mod dag;
pub mod events;
pub mod execution;
pub mod generation;
pub mod llm;
pub mod repository;
pub mod task;
pub mod validation;
