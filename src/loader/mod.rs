//! Built-in knowledge loaders and the repository decomposer.

pub mod decomposer;
pub mod repo;
pub mod text;
pub mod tree;

pub use decomposer::{RepoDecomposer, REFERENCE_URL_KEY};
pub use repo::{get_file_by_path, FileEncoding, RepoFile, RepoFileLoader, RepoLoader};
pub use text::TextLoader;
pub use tree::render_tree;
