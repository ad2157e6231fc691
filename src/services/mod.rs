pub mod backend;
pub mod resolver;
pub mod script;
pub mod studio;
pub mod workflow;
