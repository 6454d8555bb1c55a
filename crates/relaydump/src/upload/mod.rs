//! Pull-based streaming of file images into an object store.
//!
//! The store client owns the pace of the transfer: it repeatedly asks an
//! [`UploadCursor`] for up to N bytes until the cursor is drained, then
//! reports one terminal [`PutCompletion`]. [`StreamUploader`] turns that
//! completion into a receipt or a fatal [`ObjectStoreError`].
//!
//! [`ObjectStoreError`]: crate::error::ObjectStoreError

mod client;
mod cursor;
mod dir;
mod memory;
#[cfg(feature = "s3")]
mod s3;
mod uploader;

pub use client::*;
pub use cursor::*;
pub use dir::*;
pub use memory::*;
#[cfg(feature = "s3")]
pub use s3::*;
pub use uploader::*;
