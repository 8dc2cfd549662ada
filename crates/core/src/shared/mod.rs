pub mod constants;
pub mod foreground_mask;
pub mod frame;
pub mod region;
