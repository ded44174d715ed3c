//! GeoTIFF containers, images and their caches.

mod base;
mod cache;
mod container;
mod image;
mod multi;
mod open;

pub use base::{select_best_image, GeoTiffSource};
pub use cache::SharedCache;
pub use container::GeoTiff;
pub use image::{GeoTiffImage, TiePoint};
pub use multi::MultiGeoTiff;
pub use open::{OpenOptions, DEFAULT_S3_REGION};
