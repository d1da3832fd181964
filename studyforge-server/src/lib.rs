//! HTTP service for `studyforge`.
//!
//! Routes (all but `/healthz` and `/metrics` need `Authorization: Bearer <jwt>`):
//!
//! | method | path | |
//! |---|---|---|
//! | POST | `/generate-learning-plan` | `200 {plan, newCredits}` |
//! | POST | `/generate-quiz` | `200 {quiz, newCredits}` |
//! | POST | `/manage-marketing-consent` | `200`/`207`/`500` consent report |
//! | POST | `/reset-credits` | monthly reset |
//! | GET | `/profile` | `{credits, lastCreditReset}` |
//! | GET, DELETE | `/learning-plans`, `/learning-plans/:id` | stored plans |
//! | GET, DELETE | `/quizzes`, `/quizzes/:id` | stored quizzes |
//! | POST | `/quizzes/:id/score` | attach a score |

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use auth::{AuthUser, Authenticator, Claims};
pub use error::ApiError;
pub use routes::router;
pub use state::{AppState, Backends};
