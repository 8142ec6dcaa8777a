pub mod audit;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod ops;
pub mod routes;
pub mod votes;
pub mod wallet;

pub use routes::create_router;
