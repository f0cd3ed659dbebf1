pub mod filesystem;
pub mod folder;

pub use filesystem::{list_files, FileSystemStorage};
pub use folder::{derive_subfolders, sanitize_segment, FolderLayout};
