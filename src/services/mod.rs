pub mod email;
pub mod inference;
pub mod mock;
pub mod queue;
pub mod storage;
