pub mod buffer;
pub mod image;
pub mod texture;
pub mod upload;
