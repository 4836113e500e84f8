pub mod discovery;
pub mod review;
pub mod rules;
