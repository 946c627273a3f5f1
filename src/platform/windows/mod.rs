//! Win32 implementations of the platform capabilities.

mod capture;
mod input;
mod window;

pub use capture::GdiCapture;
pub use input::SendInputControl;
pub use window::TopLevelWindows;
