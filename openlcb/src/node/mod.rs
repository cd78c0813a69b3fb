//! Hosted node state: identity, login, and the alias mapping cache (§4.2).

pub mod alias;
mod login;
mod table;

pub use alias::{AliasMapping, AliasMappingCache};
pub use login::{Login, LoginAction, LoginState};
pub use table::{NodeEntry, NodeParameters, NodeTable, TableError};
