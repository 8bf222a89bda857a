#![doc = include_str!(concat!("../", env!("CARGO_PKG_README")))]

#[doc(inline)]
pub use kornia_image as image;

#[doc(inline)]
pub use kornia_tracking as tracking;
