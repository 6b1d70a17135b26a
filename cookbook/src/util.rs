use std::path::Path;

use larder::{err, error};
use larder::error::{Chainable, Result};
use larder::fstree::{EntryId, FsTree};

#[track_caller]
pub fn dircheck<P: AsRef<Path>>(
    tree: &FsTree,
    root: Option<EntryId>,
    path: P,
    must_exist: bool,
) -> Result<Option<EntryId>> {
    let path = path.as_ref();
    match (tree.get(root, path), must_exist) {
        (Some(e), _) if e.file_type.is_dir() => Ok(Some(e.id)),
        (Some(_) | None, false) => Ok(None),
        (Some(e), true) => err! {
            format!("{} path must point to a directory", e.file_stem()),
            "path is not a directory" => e.path.display(),
        },
        (None, true) => err! {
            format!("{} must point to an existing directory", path.display()),
            "path does not exist" => path.display(),
        },
    }
}

/// Writes `contents` to `path`, creating parent directories as needed.
pub fn write_file<C: AsRef<[u8]>>(path: &Path, contents: C) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).chain_with(|| error! {
            "failed to create output directory",
            "path" => parent.display(),
        })?;
    }

    std::fs::write(path, contents).chain_with(|| error! {
        "failed to write output file",
        "path" => path.display(),
    })
}
