pub mod agent;
pub mod command;
pub mod dispatch;
pub mod interrupt;
pub mod ralph;

#[cfg(test)]
pub(crate) mod testing;
