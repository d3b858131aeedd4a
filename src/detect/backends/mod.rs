pub mod motion;
pub mod stub;

pub use motion::MotionBackend;
pub use stub::StubBackend;
