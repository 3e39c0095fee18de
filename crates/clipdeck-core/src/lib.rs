pub mod device;
pub mod session;
pub mod timecode;
