mod store;

pub use store::ContextStore;
