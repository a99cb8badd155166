pub mod archive;
pub mod lifecycle;

pub use archive::ArchivePackager;
pub use lifecycle::{list_files, move_file, remove_path, ResourceLifecycle, OUTPUT_DIR_NAME};
