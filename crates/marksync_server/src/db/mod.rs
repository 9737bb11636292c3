mod repo;
mod schema;

pub use repo::SyncRepo;
pub use schema::init_database;
