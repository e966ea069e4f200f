//! Course service
//!
//! Course CRUD with role-based visibility, bulk enrollment by email and
//! per-course session listing.

use crate::db::repositories::{
    CourseRepository, EnrollmentRepository, SessionRepository, UserRepository,
};
use crate::models::{
    Course, CourseFilter, CourseWithStats, CreateCourseInput, EnrollmentDetails,
    EnrollmentStatus, ListParams, PagedResult, Session, SessionFilter, SessionStatus,
    UpdateCourseInput, User, UserRole,
};
use anyhow::Context;
use futures::future::try_join_all;
use serde::Serialize;
use std::sync::Arc;

/// Error types for course service operations
#[derive(Debug, thiserror::Error)]
pub enum CourseServiceError {
    #[error("Course not found")]
    NotFound,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    ValidationError(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// Outcome of one email in a bulk enrollment
#[derive(Debug, Clone, Serialize)]
pub struct FailedEnrollment {
    pub email: String,
    pub error: String,
}

/// Result of enrolling a list of emails
#[derive(Debug, Clone, Serialize)]
pub struct BulkEnrollmentReport {
    pub successful_enrollments: Vec<EnrollmentDetails>,
    pub failed_enrollments: Vec<FailedEnrollment>,
    pub total_processed: usize,
    pub successful_count: usize,
    pub failed_count: usize,
}

/// Course service
pub struct CourseService {
    course_repo: Arc<dyn CourseRepository>,
    enrollment_repo: Arc<dyn EnrollmentRepository>,
    session_repo: Arc<dyn SessionRepository>,
    user_repo: Arc<dyn UserRepository>,
}

impl CourseService {
    pub fn new(
        course_repo: Arc<dyn CourseRepository>,
        enrollment_repo: Arc<dyn EnrollmentRepository>,
        session_repo: Arc<dyn SessionRepository>,
        user_repo: Arc<dyn UserRepository>,
    ) -> Self {
        Self {
            course_repo,
            enrollment_repo,
            session_repo,
            user_repo,
        }
    }

    /// Create a course owned by `actor`
    pub async fn create(&self, actor: &User, input: CreateCourseInput) -> Result<Course, CourseServiceError> {
        require_author(actor)?;
        validate_course_fields(
            Some(&input.name),
            input.description.as_deref(),
            input.subject.as_deref(),
            Some(&input.difficulty_level),
        )?;

        let course = self
            .course_repo
            .create(actor.id, &input)
            .await
            .context("Failed to create course")?;

        tracing::info!(course_id = course.id, instructor_id = actor.id, "Course created");
        Ok(course)
    }

    /// List courses visible to `actor`
    pub async fn list(
        &self,
        actor: &User,
        mut filter: CourseFilter,
        params: &ListParams,
    ) -> Result<PagedResult<CourseWithStats>, CourseServiceError> {
        match actor.role {
            UserRole::Admin => {}
            UserRole::Instructor => filter.owned_by_or_public = Some(actor.id),
            UserRole::Student => filter.visible_to_student = Some(actor.id),
        }

        let (courses, total) = self
            .course_repo
            .list(&filter, params)
            .await
            .context("Failed to list courses")?;

        let items = try_join_all(courses.into_iter().map(|course| self.with_stats(course))).await?;
        Ok(PagedResult::new(items, total, params))
    }

    /// A course as seen by `actor`; invisible courses read as missing
    pub async fn get(&self, actor: &User, id: i64) -> Result<CourseWithStats, CourseServiceError> {
        let course = self.visible_course(actor, id).await?;
        self.with_stats(course).await
    }

    pub async fn update(
        &self,
        actor: &User,
        id: i64,
        input: UpdateCourseInput,
    ) -> Result<Course, CourseServiceError> {
        let mut course = self.managed_course(actor, id).await?;

        validate_course_fields(
            input.name.as_deref(),
            input.description.as_deref(),
            input.subject.as_deref(),
            input.difficulty_level.as_deref(),
        )?;

        if let Some(name) = input.name {
            course.name = name;
        }
        if input.description.is_some() {
            course.description = input.description;
        }
        if input.subject.is_some() {
            course.subject = input.subject;
        }
        if let Some(level) = input.difficulty_level {
            course.difficulty_level = level;
        }
        if input.estimated_duration.is_some() {
            course.estimated_duration = input.estimated_duration;
        }
        if let Some(v) = input.is_active {
            course.is_active = v;
        }
        if let Some(v) = input.is_public {
            course.is_public = v;
        }
        if let Some(v) = input.requires_approval {
            course.requires_approval = v;
        }
        if let Some(v) = input.learning_objectives {
            course.learning_objectives = v;
        }
        if let Some(v) = input.prerequisites {
            course.prerequisites = v;
        }
        if let Some(v) = input.tags {
            course.tags = v;
        }

        Ok(self
            .course_repo
            .update(&course)
            .await
            .context("Failed to update course")?)
    }

    /// Delete a course without sessions
    pub async fn delete(&self, actor: &User, id: i64) -> Result<(), CourseServiceError> {
        let course = self.managed_course(actor, id).await?;

        let sessions = self
            .course_repo
            .session_count(course.id)
            .await
            .context("Failed to count sessions")?;
        if sessions > 0 {
            return Err(CourseServiceError::ValidationError(
                "Cannot delete course with sessions".to_string(),
            ));
        }

        self.course_repo
            .delete(course.id)
            .await
            .context("Failed to delete course")?;
        tracing::info!(course_id = id, deleted_by = actor.id, "Course deleted");
        Ok(())
    }

    /// Enroll students by email; each email succeeds or fails on its own
    pub async fn enroll(
        &self,
        actor: &User,
        course_id: i64,
        emails: &[String],
    ) -> Result<BulkEnrollmentReport, CourseServiceError> {
        let course = self.managed_course(actor, course_id).await?;

        let mut successful = Vec::new();
        let mut failed = Vec::new();

        for email in emails {
            let fail = |error: &str| FailedEnrollment {
                email: email.clone(),
                error: error.to_string(),
            };

            let student = self
                .user_repo
                .get_by_email(email)
                .await
                .context("Failed to look up student")?
                .filter(User::is_student);
            let Some(student) = student else {
                failed.push(fail("Student not found or user is not a student"));
                continue;
            };

            if self
                .enrollment_repo
                .get(student.id, course.id)
                .await
                .context("Failed to check enrollment")?
                .is_some()
            {
                failed.push(fail("Student already enrolled in this course"));
                continue;
            }

            match self.enrollment_repo.create(student.id, course.id).await {
                Ok(enrollment) => successful.push(EnrollmentDetails {
                    enrollment,
                    student_name: student.full_name(),
                    student_email: student.email.clone(),
                    course_name: course.name.clone(),
                }),
                Err(e) => {
                    tracing::warn!(course_id, email = %email, "Enrollment failed: {:#}", e);
                    failed.push(fail(&format!("Enrollment failed: {}", e)));
                }
            }
        }

        Ok(BulkEnrollmentReport {
            total_processed: emails.len(),
            successful_count: successful.len(),
            failed_count: failed.len(),
            successful_enrollments: successful,
            failed_enrollments: failed,
        })
    }

    pub async fn enrollments(
        &self,
        actor: &User,
        course_id: i64,
        status: Option<EnrollmentStatus>,
        params: &ListParams,
    ) -> Result<PagedResult<EnrollmentDetails>, CourseServiceError> {
        let course = self.managed_course(actor, course_id).await?;

        let (items, total) = self
            .enrollment_repo
            .list_by_course(course.id, status, params)
            .await
            .context("Failed to list enrollments")?;
        Ok(PagedResult::new(items, total, params))
    }

    /// Sessions of a course; students only see published ones
    pub async fn sessions(&self, actor: &User, course_id: i64) -> Result<Vec<Session>, CourseServiceError> {
        let course = self.visible_course(actor, course_id).await?;

        let filter = SessionFilter {
            course_id: Some(course.id),
            status: actor.is_student().then_some(SessionStatus::Published),
            ..Default::default()
        };
        Ok(self
            .session_repo
            .list_all(&filter)
            .await
            .context("Failed to list course sessions")?)
    }

    /// Load a course `actor` may open, else `NotFound`
    pub async fn visible_course(&self, actor: &User, id: i64) -> Result<Course, CourseServiceError> {
        let course = self.load(id).await?;

        let visible = match actor.role {
            UserRole::Admin => true,
            UserRole::Instructor => course.instructor_id == actor.id || course.is_public,
            UserRole::Student => {
                let enrolled = self
                    .enrollment_repo
                    .get(actor.id, course.id)
                    .await
                    .context("Failed to check enrollment")?
                    .is_some();
                course.can_be_accessed_by(actor, enrolled)
            }
        };

        if visible {
            Ok(course)
        } else {
            Err(CourseServiceError::NotFound)
        }
    }

    /// Load a course `actor` may change: its owner or an admin
    pub async fn managed_course(&self, actor: &User, id: i64) -> Result<Course, CourseServiceError> {
        require_author(actor)?;
        let course = self.load(id).await?;
        if !course.can_be_managed_by(actor) {
            return Err(CourseServiceError::Forbidden(
                "Not authorized to access this course".to_string(),
            ));
        }
        Ok(course)
    }

    async fn load(&self, id: i64) -> Result<Course, CourseServiceError> {
        self.course_repo
            .get_by_id(id)
            .await
            .context("Failed to get course")?
            .ok_or(CourseServiceError::NotFound)
    }

    async fn with_stats(&self, course: Course) -> Result<CourseWithStats, CourseServiceError> {
        let total_sessions = self
            .course_repo
            .session_count(course.id)
            .await
            .context("Failed to count sessions")?;
        let student_count = self
            .course_repo
            .student_count(course.id)
            .await
            .context("Failed to count students")?;

        Ok(CourseWithStats {
            course,
            total_sessions,
            student_count,
        })
    }
}

fn require_author(actor: &User) -> Result<(), CourseServiceError> {
    if !actor.is_instructor_or_admin() {
        return Err(CourseServiceError::Forbidden(
            "Only instructors and admins can perform this action".to_string(),
        ));
    }
    Ok(())
}

fn check_len(field: &str, value: Option<&str>, min: usize, max: usize) -> Result<(), CourseServiceError> {
    if let Some(value) = value {
        let len = value.chars().count();
        if len < min || len > max {
            return Err(CourseServiceError::ValidationError(if min > 0 {
                format!("{} must be between {} and {} characters", field, min, max)
            } else {
                format!("{} must be at most {} characters", field, max)
            }));
        }
    }
    Ok(())
}

fn validate_course_fields(
    name: Option<&str>,
    description: Option<&str>,
    subject: Option<&str>,
    difficulty: Option<&str>,
) -> Result<(), CourseServiceError> {
    check_len("Name", name.map(str::trim), 1, 200)?;
    check_len("Description", description, 0, 1000)?;
    check_len("Subject", subject, 0, 100)?;
    check_len("Difficulty level", difficulty, 0, 20)?;
    Ok(())
}
