pub mod models;
pub mod mongodb;

pub use models::*;
pub use mongodb::MongoRepo;
