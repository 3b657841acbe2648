pub mod handles;
pub mod library_manager;
pub mod library_store;
