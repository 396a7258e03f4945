pub mod fetcher;
pub mod host;
pub mod loader;
pub mod registry;
pub mod runtime;
pub mod store;
pub mod version;

pub use loader::LayerLoader;
