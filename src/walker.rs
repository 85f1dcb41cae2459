use std::path::{Path, PathBuf};

use crate::error::Result;

/// A text file found under an import root.
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Path relative to the import root.
    pub relative_path: PathBuf,
    pub absolute_path: PathBuf,
    pub size: u64,
}

const TEXT_EXTENSIONS: &[&str] = &["md", "markdown", "txt"];

/// Find importable text files below `root`, sorted by relative path.
///
/// Hidden entries (leading `.`) are skipped, as are symlinked
/// directories. Symlinked files are followed.
pub fn discover_sources(root: &Path) -> Result<Vec<SourceFile>> {
    let root = root.canonicalize()?;
    let mut found = Vec::new();
    let mut pending = vec![root.clone()];

    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            let path = entry.path();
            let file_type = entry.file_type()?;

            if file_type.is_dir() {
                pending.push(path);
                continue;
            }
            // Broken links are ignored.
            let Ok(metadata) = std::fs::metadata(&path) else {
                continue;
            };
            if !metadata.is_file() || !has_text_extension(&path) {
                continue;
            }
            found.push(SourceFile {
                relative_path: path
                    .strip_prefix(&root)
                    .unwrap_or(&path)
                    .to_path_buf(),
                absolute_path: path.canonicalize()?,
                size: metadata.len(),
            });
        }
    }

    found.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(found)
}

fn has_text_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            TEXT_EXTENSIONS.iter().any(|t| t.eq_ignore_ascii_case(ext))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(files: &[SourceFile]) -> Vec<String> {
        files
            .iter()
            .map(|f| f.relative_path.to_string_lossy().to_string())
            .collect()
    }

    #[test]
    fn finds_text_files_only() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("note.md"), "# Hello").unwrap();
        std::fs::write(tmp.path().join("readme.TXT"), "Hello").unwrap();
        std::fs::write(tmp.path().join("image.png"), "binary").unwrap();

        let files = discover_sources(tmp.path()).unwrap();
        assert_eq!(names(&files), vec!["note.md", "readme.TXT"]);
        assert_eq!(files[0].size, 7);
    }

    #[test]
    fn skips_hidden_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let git = tmp.path().join(".git");
        std::fs::create_dir(&git).unwrap();
        std::fs::write(git.join("config.md"), "x").unwrap();
        std::fs::write(tmp.path().join(".draft.md"), "x").unwrap();
        std::fs::write(tmp.path().join("visible.md"), "x").unwrap();

        let files = discover_sources(tmp.path()).unwrap();
        assert_eq!(names(&files), vec!["visible.md"]);
    }

    #[test]
    fn recurses_and_sorts() {
        let tmp = tempfile::tempdir().unwrap();
        let sub = tmp.path().join("b");
        std::fs::create_dir(&sub).unwrap();
        std::fs::write(sub.join("deep.md"), "deep").unwrap();
        std::fs::write(tmp.path().join("z.md"), "z").unwrap();
        std::fs::write(tmp.path().join("a.txt"), "a").unwrap();

        let files = discover_sources(tmp.path()).unwrap();
        assert_eq!(names(&files), vec!["a.txt", "b/deep.md", "z.md"]);
    }

    #[test]
    fn empty_directory() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(discover_sources(tmp.path()).unwrap().is_empty());
    }

    #[test]
    fn missing_root_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(discover_sources(&tmp.path().join("nope")).is_err());
    }
}
