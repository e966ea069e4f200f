//! Services layer - Business logic
//!
//! This module contains the business logic of the tutoring platform.
//! Services are responsible for:
//! - Implementing business rules and role checks
//! - Coordinating between repositories
//! - Handling validation and error cases

pub mod ai;
pub mod analytics;
pub mod course;
pub mod graph;
pub mod password;
pub mod progress;
pub mod progress_tracking;
pub mod rate_limiter;
pub mod session;
pub mod token;
pub mod tutor;
pub mod user;

pub use ai::{AiClient, AiService, OpenAiClient};
pub use analytics::{AnalyticsError, AnalyticsService};
pub use course::{CourseService, CourseServiceError};
pub use graph::{GraphAnalysis, GraphMetrics, GraphValidation};
pub use password::{hash_password, verify_password};
pub use progress::{AdvanceInput, AdvanceOutcome, ProgressError, ProgressService};
pub use progress_tracking::{ProgressTrackingError, ProgressTrackingService};
pub use rate_limiter::LoginRateLimiter;
pub use session::{SessionService, SessionServiceError};
pub use token::TokenService;
pub use tutor::{TutorError, TutorService};
pub use user::{LoginInput, LoginOutcome, RegisterInput, UserService, UserServiceError};
