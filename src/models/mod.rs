pub mod actor;
pub mod delivery;
pub mod order;
pub mod route;
