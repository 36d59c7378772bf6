pub mod check_token;
pub mod download;
pub mod setup_token;
pub mod version;
