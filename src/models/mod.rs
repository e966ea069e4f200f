//! Data models
//!
//! Database entities of the tutoring platform plus the input and filter
//! types the services accept.

mod analytics;
mod auth_token;
mod bubble_node;
mod course;
mod enrollment;
mod pagination;
mod session;
mod student_state;
mod user;

pub use analytics::{
    CoinFilter, CoinTransaction, EventFilter, EventLog, EventType, NewCoinTransaction, NewEvent,
    TransactionType,
};
pub use auth_token::AuthToken;
pub use bubble_node::{BubbleContentInput, BubbleNode};
pub use course::{Course, CourseFilter, CourseWithStats, CreateCourseInput, UpdateCourseInput};
pub use enrollment::{Enrollment, EnrollmentDetails, EnrollmentStatus};
pub use pagination::{ListParams, PagedResult};
pub use session::{
    BubbleGraph, BubbleType, CreateSessionInput, GraphEdge, GraphNode, Session, SessionDetails,
    SessionFilter, SessionStatus, UpdateSessionInput,
};
pub use student_state::StudentState;
pub use user::{CreateUserInput, UpdateUserInput, User, UserFilter, UserRole, UserStats};
