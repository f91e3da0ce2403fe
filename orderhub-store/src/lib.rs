pub mod app_config;
pub mod database;
pub mod events;
pub mod order_repo;
pub mod redis_repo;

pub use database::DbClient;
pub use events::EventProducer;
pub use order_repo::PgOrderStore;
pub use redis_repo::RedisClient;
