//! TIFF/BigTIFF structure: header, directories, tags, GeoKeys, ghost area.

mod directory;
mod geokeys;
mod ghost;
mod parser;
mod tags;
mod values;

pub use directory::ImageFileDirectory;
pub use geokeys::{GeoKey, GeoKeyDirectory, GeoKeyValue};
pub use ghost::{parse_ghost_text, read_ghost_area, GhostValue, GhostValues};
pub use parser::{parse_directory_at, TiffHeader, BIGTIFF_HEADER_SIZE, TIFF_HEADER_SIZE};
pub use tags::{
    compression, FieldType, TiffTag, PLANAR_CHUNKY, PLANAR_SEPARATE, PREDICTOR_FLOATING_POINT,
    PREDICTOR_HORIZONTAL, PREDICTOR_NONE, SAMPLE_FORMAT_FLOAT, SAMPLE_FORMAT_INT,
    SAMPLE_FORMAT_UINT, SAMPLE_FORMAT_VOID,
};
pub use values::TagValue;
