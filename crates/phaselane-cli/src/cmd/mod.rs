pub mod checkpoints;
pub mod init;
pub mod mcp;
pub mod smoke;
