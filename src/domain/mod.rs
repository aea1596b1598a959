pub mod ids;
pub mod models;
pub mod timekeeping;
