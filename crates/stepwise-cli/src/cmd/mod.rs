pub mod apply;
pub mod config;
pub mod init;
pub mod rollback;
pub mod status;
pub mod store;
