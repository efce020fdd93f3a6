pub mod bridge;
pub mod locator;
pub mod runner;
