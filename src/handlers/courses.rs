//! `GET /courses` - read-only course listing.

use axum::{extract::State, Json};

use crate::db::{self, DbPool};
use crate::error::Error;
use crate::models::Course;

pub async fn get_courses(State(pool): State<DbPool>) -> Result<Json<Vec<Course>>, Error> {
    let courses = db::list_courses(&pool).await.map_err(|e| Error::Database(e.to_string()))?;
    Ok(Json(courses))
}
