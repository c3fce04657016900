pub mod store;
pub mod memstore;
pub mod dbsession;
