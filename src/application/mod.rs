pub mod bootstrap;
pub mod calendar;
pub mod commands;
pub mod day_details;
pub mod event_board;
pub mod projects;
pub mod reconciler;
pub mod recovery;
pub mod regular_events;
pub mod stopwatch;
pub mod transfer;

#[cfg(test)]
pub(crate) mod test_support;
