pub mod compiler;
pub mod executor;
pub mod host;
pub mod library;
pub mod settings;
pub mod store;
pub mod table;
pub mod validator;
