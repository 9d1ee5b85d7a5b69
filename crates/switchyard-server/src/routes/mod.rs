// HTTP routes

pub mod health;
pub mod records;
pub mod tasks;
