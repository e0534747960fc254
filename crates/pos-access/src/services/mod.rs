//! Resource services built on the access layer.

mod dashboard;
mod products;

pub use dashboard::DashboardService;
pub use products::ProductService;
