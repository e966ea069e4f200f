//! Course model
//!
//! A course groups learning sessions and is owned by one instructor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::User;

/// Course entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Course {
    /// Unique identifier
    pub id: i64,
    /// Display name (1-200 chars)
    pub name: String,
    pub description: Option<String>,
    pub subject: Option<String>,
    /// Free-form level, "beginner" unless set
    pub difficulty_level: String,
    /// Estimated duration in minutes
    pub estimated_duration: Option<i64>,
    pub is_active: bool,
    pub is_public: bool,
    pub requires_approval: bool,
    pub learning_objectives: Vec<String>,
    pub prerequisites: Vec<String>,
    /// Arbitrary JSON object
    pub tags: serde_json::Value,
    /// Owning instructor
    pub instructor_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Course {
    /// Whether `user` may open this course.
    ///
    /// `enrolled` tells whether the user holds an enrollment for it.
    pub fn can_be_accessed_by(&self, user: &User, enrolled: bool) -> bool {
        if !self.is_active {
            return false;
        }
        if user.is_admin() || self.instructor_id == user.id {
            return true;
        }
        self.is_public || (user.is_student() && enrolled)
    }

    /// Owner or admin
    pub fn can_be_managed_by(&self, user: &User) -> bool {
        user.is_admin() || self.instructor_id == user.id
    }
}

/// Input for creating a course
#[derive(Debug, Clone)]
pub struct CreateCourseInput {
    pub name: String,
    pub description: Option<String>,
    pub subject: Option<String>,
    pub difficulty_level: String,
    pub estimated_duration: Option<i64>,
    pub is_public: bool,
    pub requires_approval: bool,
    pub learning_objectives: Vec<String>,
    pub prerequisites: Vec<String>,
    pub tags: serde_json::Value,
}

impl Default for CreateCourseInput {
    fn default() -> Self {
        Self {
            name: String::new(),
            description: None,
            subject: None,
            difficulty_level: "beginner".to_string(),
            estimated_duration: None,
            is_public: false,
            requires_approval: false,
            learning_objectives: Vec::new(),
            prerequisites: Vec::new(),
            tags: serde_json::json!({}),
        }
    }
}

/// Input for updating a course; `None` leaves a field unchanged
#[derive(Debug, Clone, Default)]
pub struct UpdateCourseInput {
    pub name: Option<String>,
    pub description: Option<String>,
    pub subject: Option<String>,
    pub difficulty_level: Option<String>,
    pub estimated_duration: Option<i64>,
    pub is_active: Option<bool>,
    pub is_public: Option<bool>,
    pub requires_approval: Option<bool>,
    pub learning_objectives: Option<Vec<String>>,
    pub prerequisites: Option<Vec<String>>,
    pub tags: Option<serde_json::Value>,
}

/// Filters for listing courses
#[derive(Debug, Clone, Default)]
pub struct CourseFilter {
    pub subject: Option<String>,
    pub difficulty_level: Option<String>,
    pub is_public: Option<bool>,
    /// Student view: active courses that are public or that this student is enrolled in
    pub visible_to_student: Option<i64>,
    /// Courses owned by this instructor, or public ones
    pub owned_by_or_public: Option<i64>,
}

/// Course with derived counters
#[derive(Debug, Clone, Serialize)]
pub struct CourseWithStats {
    #[serde(flatten)]
    pub course: Course,
    pub total_sessions: i64,
    /// Distinct students with progress in any of the course's sessions
    pub student_count: i64,
}
