// Copyright 2026 Deedhound Contributors
// SPDX-License-Identifier: Apache-2.0

//! Deedhound — recorded-deed retrieval pipeline.
//!
//! Starting from a street address, deedhound drives a headless browser
//! through an assessor site and the corresponding county recorder site,
//! mines a recording reference (instrument number or book/page pair), and
//! captures the underlying recorded document as validated binary content.
//!
//! The crate is the retrieval core only. Per-jurisdiction site adapters
//! implement [`adapter::SiteAdapter`] on top of the building blocks here;
//! storage, CRM delivery, and CAPTCHA solving are the caller's problem.

pub mod adapter;
pub mod capture;
pub mod config;
pub mod error;
pub mod events;
pub mod extract;
pub mod locator;
pub mod model;
pub mod pacing;
pub mod pipeline;
pub mod renderer;
pub mod session;

pub use adapter::{IdentifierResolver, ResolveOutcome, SiteAdapter, StageOutcome};
pub use capture::{CaptureFailure, CaptureHint, CaptureStrategy, HttpClient};
pub use config::RetrieverConfig;
pub use error::{ErrorInfo, ErrorKind};
pub use locator::{CandidateSelector, LocateOutcome, ResolvedElement};
pub use pacing::{cancel_pair, CancelHandle, CancelToken};
pub use model::{
    CapturedDocument, DocumentKind, KnownIdentifiers, RecordingReference, RetrievalRequest,
    RetrievalResult, Stage, StageResult,
};
pub use pipeline::{Pipeline, PipelineContext};
