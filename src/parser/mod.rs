pub mod age;
pub mod diff;
pub mod links;
pub mod record;
pub mod rows;
