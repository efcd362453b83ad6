//! One module per `ciphersafe` subcommand.

pub mod add;
pub mod audit_cmd;
pub mod completions;
pub mod delete;
pub mod edit;
pub mod export;
pub mod get;
pub mod import_cmd;
pub mod init;
pub mod list;
pub mod passwd;
pub mod purge;
pub mod restore;
pub mod status;
pub mod sync;
pub mod wipe;
