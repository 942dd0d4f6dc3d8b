//! Redis utilities: entity caching layer

mod cache;

pub use cache::{authorized_user_key, sensor_key, EntityCache};
