pub mod command;
pub mod engine;
pub mod event_bus;
pub mod history;
pub mod loop_control;
pub mod state;

#[cfg(test)]
pub(crate) mod test_support;
