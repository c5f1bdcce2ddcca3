//! HTTP handlers.

mod courses;
mod enroll;

pub use courses::get_courses;
pub use enroll::enroll;
