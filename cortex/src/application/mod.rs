// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Application services for the pattern bank.

pub mod pattern_bank;

pub use pattern_bank::{
    PatternBank, PatternBankConfig, PatternBankError, PatternBankStats, StandardPatternBank,
};
