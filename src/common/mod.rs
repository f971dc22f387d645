//! File formats shared by the CLI and library users.

pub mod scene;

pub use scene::{Scene, SceneLoadError, load_scene};
