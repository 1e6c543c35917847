use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Extensions (lowercase) of images the pipeline reconstructs from.
pub const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Debug, Error)]
pub enum ImageCatalogError {
    #[error("failed to list images in {}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("image file name is not valid UTF-8: {}", .0.display())]
    NonUtf8Name(PathBuf),
    #[error("image file name '{0}' contains whitespace; pair files cannot represent it")]
    WhitespaceInName(String),
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

/// List the images of `dir` by file name, sorted.
///
/// Only regular files with a `.jpg`, `.jpeg` or `.png` extension (any case)
/// are listed; sub-directories are not descended into. Names containing
/// whitespace are rejected: pair and ranking files separate names by it.
pub fn list_images(dir: &Path) -> Result<Vec<String>, ImageCatalogError> {
    let read_err = |source: std::io::Error| ImageCatalogError::Read {
        path: dir.to_path_buf(),
        source,
    };

    let mut names = Vec::new();
    for entry in fs::read_dir(dir).map_err(read_err)? {
        let entry = entry.map_err(read_err)?;
        let path = entry.path();
        if !path.is_file() || !is_image(&path) {
            continue;
        }
        let name = entry
            .file_name()
            .into_string()
            .map_err(|_| ImageCatalogError::NonUtf8Name(path.clone()))?;
        if name.contains(char::is_whitespace) {
            return Err(ImageCatalogError::WhitespaceInName(name));
        }
        names.push(name);
    }
    names.sort();
    Ok(names)
}
