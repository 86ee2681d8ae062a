pub mod aggregate;
pub mod api;
pub mod metrics;
pub mod procview;
pub mod store;
pub mod tracer;
pub mod tui;

pub use metrics::Metrics;
pub use procview::ProcView;
pub use store::SampleStore;
pub use tracer::Tracer;
