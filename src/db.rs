//! Connection pool setup and the transactional seat-allocation rule.

use anyhow::{Context, Result};
use sqlx::{postgres::PgPoolOptions, PgPool};

use crate::config::DbConfig;
use crate::models::{AllocationOutcome, Course, QueuedRequest};

pub type DbPool = PgPool;

/// Initialize the database connection pool and run embedded migrations.
pub async fn init_db(config: DbConfig) -> Result<DbPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;

    Ok(pool)
}

pub async fn init_db_default() -> Result<DbPool> {
    init_db(DbConfig::default()).await
}

/// Liveness probe for `/health` and `/ready`: a single round-trip query.
pub async fn check_database(pool: &DbPool) -> bool {
    sqlx::query("SELECT 1").execute(pool).await.is_ok()
}

/// List all courses (backs `GET /courses`).
pub async fn list_courses(pool: &DbPool) -> Result<Vec<Course>> {
    let courses = sqlx::query_as::<_, Course>(
        "SELECT id, name, capacity, seats_taken FROM courses ORDER BY id",
    )
    .fetch_all(pool)
    .await
    .context("Failed to list courses")?;

    Ok(courses)
}

/// Fetch a single course, used by the `/metrics/json` snapshot.
pub async fn get_course(pool: &DbPool, course_id: i64) -> Result<Option<Course>> {
    let course = sqlx::query_as::<_, Course>(
        "SELECT id, name, capacity, seats_taken FROM courses WHERE id = $1",
    )
    .bind(course_id)
    .fetch_optional(pool)
    .await
    .context("Failed to fetch course")?;

    Ok(course)
}

/// All distinct course ids, used by the worker supervisor at startup to
/// decide which per-course allocator tasks to spawn.
pub async fn list_course_ids(pool: &DbPool) -> Result<Vec<i64>> {
    let ids: Vec<i64> = sqlx::query_scalar("SELECT id FROM courses ORDER BY id")
        .fetch_all(pool)
        .await
        .context("Failed to list course ids")?;

    Ok(ids)
}

const UNIQUE_VIOLATION: &str = "23505";

/// The allocation transaction: the sole writer of `seats_taken` and
/// `enrollments`. Runs entirely inside one transaction so the row lock on
/// `courses` serializes every allocation for that course id.
pub async fn allocate_seat(pool: &DbPool, req: &QueuedRequest) -> Result<AllocationOutcome> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    // Step 1: exclusive row lock on the course. Missing course -> not_found, no-op.
    let course = sqlx::query_as::<_, Course>(
        "SELECT id, name, capacity, seats_taken FROM courses WHERE id = $1 FOR UPDATE",
    )
    .bind(req.course_id)
    .fetch_optional(&mut *tx)
    .await
    .context("Failed to lock course row")?;

    let course = match course {
        Some(c) => c,
        None => {
            tx.commit().await.context("Failed to commit no-op transaction")?;
            return Ok(AllocationOutcome::NotFound);
        }
    };

    // Step 2: idempotency fast path - an enrollment with this key already exists.
    let existing: Option<i64> = sqlx::query_scalar(
        "SELECT id FROM enrollments WHERE idempotency_key = $1",
    )
    .bind(&req.idempotency_key)
    .fetch_optional(&mut *tx)
    .await
    .context("Failed to check idempotency key")?;

    if existing.is_some() {
        tx.commit().await.context("Failed to commit idempotent no-op")?;
        return Ok(AllocationOutcome::AlreadyProcessed);
    }

    // Step 3: course full -> waitlist.
    if course.seats_taken >= course.capacity {
        let insert = sqlx::query(
            "INSERT INTO waitlist (student_id, course_id) VALUES ($1, $2)
             ON CONFLICT (student_id, course_id) DO NOTHING",
        )
        .bind(req.student_id)
        .bind(req.course_id)
        .execute(&mut *tx)
        .await
        .context("Failed to insert waitlist entry")?;
        let _ = insert;

        tx.commit().await.context("Failed to commit waitlist transaction")?;
        return Ok(AllocationOutcome::Waitlisted);
    }

    // Step 4: increment seats_taken and insert the enrollment atomically.
    sqlx::query("UPDATE courses SET seats_taken = seats_taken + 1 WHERE id = $1")
        .bind(req.course_id)
        .execute(&mut *tx)
        .await
        .context("Failed to increment seats_taken")?;

    let insert_result = sqlx::query(
        "INSERT INTO enrollments (student_id, course_id, idempotency_key, booked_at)
         VALUES ($1, $2, $3, NOW())",
    )
    .bind(req.student_id)
    .bind(req.course_id)
    .bind(&req.idempotency_key)
    .execute(&mut *tx)
    .await;

    match insert_result {
        Ok(_) => {
            tx.commit().await.context("Failed to commit allocation transaction")?;
            Ok(AllocationOutcome::Success)
        }
        Err(e) => {
            tx.rollback().await.ok();

            if let Some(db_err) = e.as_database_error() {
                if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) {
                    // Lost race on the idempotency key: another allocation for
                    // the same request committed first. Treat as success from
                    // the client's perspective.
                    return Ok(AllocationOutcome::AlreadyProcessed);
                }
            }

            Err(e).context("Failed to insert enrollment")
        }
    }
}
