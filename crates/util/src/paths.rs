//! Small filesystem path helpers shared by the engine crates

use std::{fs, io, path::Path};

/// Ensure the parent directory of a file path exists
pub fn create_parent(path: &Path) -> io::Result<()> {
    let parent = path.parent().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!(
                "Cannot create directory for path {path}; it has no parent",
                path = path.display()
            ),
        )
    })?;
    fs::create_dir_all(parent)
}

/// Does the file name carry the given multi-part suffix? Unlike
/// [Path::extension], this matches against the *full* suffix, so a name like
/// `LoggerA.meta.json` matches the suffix `.meta.json`.
pub fn has_suffix(path: &Path, suffix: &str) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.ends_with(suffix))
}

/// Get the trailing extension of a path as a lowercase string, if any
pub fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|extension| extension.to_str())
        .map(str::to_lowercase)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::simple("recipe.meta.json", true)]
    #[case::nested("dir/recipe.meta.json", true)]
    #[case::plain_json("recipe.json", false)]
    #[case::yaml("recipe.yaml", false)]
    #[case::suffix_only(".meta.json", true)]
    fn test_has_suffix(#[case] path: &str, #[case] expected: bool) {
        assert_eq!(has_suffix(Path::new(path), ".meta.json"), expected);
    }

    #[rstest]
    #[case::lowercase("recipe.yaml", Some("yaml"))]
    #[case::uppercase("recipe.YML", Some("yml"))]
    #[case::none("recipe", None)]
    fn test_extension(#[case] path: &str, #[case] expected: Option<&str>) {
        assert_eq!(extension(Path::new(path)).as_deref(), expected);
    }
}
