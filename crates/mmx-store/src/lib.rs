// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod store;

pub use store::{
    derive_title, HistoryStore, SessionRecord, StoreError, StoredMessage, DEFAULT_SESSION_NAME,
};

pub type Result<T> = std::result::Result<T, StoreError>;
