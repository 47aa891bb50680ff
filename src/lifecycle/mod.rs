pub mod machine;
pub mod phase;
