//! ZWO ASI camera support
//!
//! Layered the way the SDK wants to be used: [`driver`] is the typed call
//! surface (real library via [`native`], or [`sim`] for development and
//! tests), [`session`] owns the open/configure/close lifecycle, and
//! [`backend`] adapts a session to the generic capture contract.

pub mod backend;
pub mod driver;
pub mod native;
pub mod session;
pub mod sim;

pub use backend::AsiBackend;
pub use driver::{AsiCameraProperty, AsiControl, AsiDriver, AsiExposureStatus, AsiImgType};
pub use native::NativeAsiDriver;
pub use session::{ConnectTiming, SdkSession};
pub use sim::SimulatedAsiDriver;
