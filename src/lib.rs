#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # studyforge
//!
//! Credit-metered generation of learning plans and quizzes.
//!
//! A generation request runs as a small saga:
//!
//! - **Validate** the request (topic shape, enum fields)
//! - **Rate limit** per user and request kind over a trailing window (fail-open)
//! - **Debit** the tier/difficulty cost from the credit ledger atomically
//! - **Generate** through an external LLM provider under a timeout
//! - **Validate** the returned document's structure
//! - **Persist** it in a per-user store capped at 15 items (FIFO eviction)
//!
//! Any failure after the debit issues a compensating refund before the error is
//! returned to the caller.
//!
//! ## Quick Start
//!
//! ```rust
//! use studyforge::{
//!     CreditLedger, GenerationOrchestrator, InMemoryArtifactStore, InMemoryLedger,
//!     InMemoryRequestLog, SlidingWindowLimiter, StaticProvider, UserId,
//! };
//! use studyforge::request::{Difficulty, Language, QuizRequest};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let ledger = InMemoryLedger::new(400);
//! let user = UserId::new();
//! ledger.ensure_account(user, chrono::Utc::now()).await.unwrap();
//!
//! let reply = r#"{"title":"Rust","questions":[{"prompt":"Is Rust memory safe?",
//!     "options":["yes","no"],"answerIndex":0,"explanation":"Ownership."}]}"#;
//!
//! let orchestrator = GenerationOrchestrator::builder()
//!     .ledger(ledger.clone())
//!     .limiter(SlidingWindowLimiter::new(InMemoryRequestLog::new()))
//!     .store(InMemoryArtifactStore::new())
//!     .provider(StaticProvider::new(reply))
//!     .build()
//!     .unwrap();
//!
//! let request = QuizRequest {
//!     topic: "Rust ownership".into(),
//!     difficulty: Difficulty::Easy,
//!     language: Language::En,
//! };
//! let outcome = orchestrator.generate_quiz(user, request).await.unwrap();
//! assert_eq!(outcome.new_credits, 390);
//! # });
//! ```

pub mod adaptive;
pub mod artifact;
pub mod clock;
pub mod consent;
pub mod credits;
pub mod error;
pub mod ledger;
pub mod orchestrator;
pub mod pricing;
pub mod prompt;
pub mod provider;
pub mod rate_limit;
pub mod request;
pub mod settings;
pub mod store;
pub mod telemetry;
pub mod timeout;
pub mod prelude;

// Re-exports
pub use adaptive::DynamicConfig;
pub use artifact::{ArtifactDocument, LearningPlan, Quiz, StoredArtifact};
pub use clock::{Clock, ManualClock, SystemClock};
pub use consent::{ConsentService, ConsentState, InMemoryConsentStore};
pub use credits::{CreditService, ResetReport};
pub use error::GenerationError;
pub use ledger::{CreditLedger, DebitOutcome, InMemoryLedger};
pub use orchestrator::{GenerationOrchestrator, GenerationOutcome, Stage};
pub use pricing::PricingTable;
pub use provider::{GenerationProvider, OpenAiProvider, StaticProvider};
pub use telemetry::{GenerationEvent, TelemetrySink};
pub use rate_limit::store::InMemoryRequestLog;
pub use rate_limit::strategies::SlidingWindowLimiter;
pub use rate_limit::{Decision, RateLimiter};
pub use request::{RequestKind, UserId};
pub use settings::Settings;
pub use store::{ArtifactStore, InMemoryArtifactStore};
pub use timeout::TimeoutPolicy;
