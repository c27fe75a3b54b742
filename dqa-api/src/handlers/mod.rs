mod app;
mod dqa;

pub use app::add_routes;
