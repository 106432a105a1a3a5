pub mod channel;
pub mod pipe;
pub mod signal;
pub mod slot_table;
pub mod socket;
