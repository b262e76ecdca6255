pub mod coordinator;
pub mod ctl;
pub mod worker;
