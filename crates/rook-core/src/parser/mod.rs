// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod thinking;
mod toolblock;

pub use thinking::{ClassifiedText, ThinkingParser};
pub use toolblock::{ToolBlockEvent, ToolBlockParser};
