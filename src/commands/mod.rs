pub mod apply;
pub mod convert;
pub mod derive;
pub mod prompts;
pub mod resolve;
pub mod status;
pub mod validate;
