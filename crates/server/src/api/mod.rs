pub mod coordinators;
pub mod handlers;
pub mod middleware;
pub mod notifications;
pub mod orchestrations;
pub mod routes;

pub use routes::create_router;
