pub mod config;
pub mod credential_store;
pub mod csv_codec;
pub mod error;
pub mod kv_store;
pub mod local_store;
pub mod record_store;
pub mod rest_store;
pub mod retry;
pub mod row_mapper;
pub mod storage;
pub mod timer_state_repository;
