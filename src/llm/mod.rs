pub mod oracle;
pub mod prompts;
pub mod provider;
pub mod providers;
pub mod registry;
pub mod types;
