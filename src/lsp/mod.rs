//! LSP protocol layer
//! - server.rs: stdio and TCP serving
//! - backend.rs: LanguageServer trait implementation
//! - publisher.rs: diagnostic publishing and retraction
//! - hover.rs: hover and definition answers
//! - completion.rs: global completion list and signature help

pub mod backend;
pub mod completion;
pub mod hover;
pub mod publisher;
pub mod server;
