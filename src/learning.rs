pub mod answer;
pub mod progress;
pub mod report;
pub mod test_runner;
pub mod viewer;
