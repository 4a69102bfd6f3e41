pub mod ask;
pub mod check;
pub mod config_cmd;
