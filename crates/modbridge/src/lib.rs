// Copyright 2026 Modbridge Contributors
// SPDX-License-Identifier: Apache-2.0

//! Modbridge library: mirrors MediaWiki account requests and phpBB
//! approval queues into a chat review surface and replays the decisions.
//!
//! This library crate exposes the core modules for the binary and for
//! integration testing.

pub mod auth;
pub mod automod;
pub mod chat;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod forum;
pub mod geo;
pub mod html;
pub mod http;
pub mod interaction;
pub mod ledger;
pub mod pending;
pub mod platform;
pub mod reconcile;
pub mod review;
pub mod scheduler;
pub mod stats;
pub mod wiki;

pub use error::{BridgeError, BridgeResult};
