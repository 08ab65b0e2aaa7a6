//! Discovery of git directories under a base path.

use std::fs;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::vec;

use tracing::debug;

use crate::metadata::MetadataStore;

/// `path` has an `objects/` directory and a `HEAD` file.
pub fn is_git_dir(path: &Path) -> bool {
    path.join("objects").is_dir() && path.join("HEAD").is_file()
}

/// A restartable walk: every call to [`iter`](Self::iter) starts over.
#[derive(Clone, Debug)]
pub struct RepositoryScan {
    root: PathBuf,
}

impl RepositoryScan {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn iter(&self) -> RepositoryIter {
        RepositoryIter {
            root: Some(self.root.clone()),
            stack: Vec::new(),
        }
    }
}

impl<'a> IntoIterator for &'a RepositoryScan {
    type Item = io::Result<PathBuf>;
    type IntoIter = RepositoryIter;

    fn into_iter(self) -> RepositoryIter {
        self.iter()
    }
}

/// Depth-first, one directory listing at a time.
#[derive(Debug)]
pub struct RepositoryIter {
    root: Option<PathBuf>,
    stack: Vec<vec::IntoIter<PathBuf>>,
}

/// Visible subdirectories of `dir` in name order. Symlinks to directories
/// are included; entries that cannot be stat'ed, such as dangling links,
/// are skipped.
fn subdirectories(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_name().as_bytes().starts_with(b".") {
            continue;
        }
        let path = entry.path();
        match fs::metadata(&path) {
            Ok(meta) if meta.is_dir() => out.push(path),
            Ok(_) => {}
            Err(e) => debug!(path = %path.display(), error = %e, "skipping unreadable entry"),
        }
    }
    out.sort();
    Ok(out)
}

impl RepositoryIter {
    fn descend(&mut self, dir: &Path) -> Option<io::Error> {
        match subdirectories(dir) {
            Ok(children) => {
                self.stack.push(children.into_iter());
                None
            }
            Err(e) => Some(e),
        }
    }
}

impl Iterator for RepositoryIter {
    type Item = io::Result<PathBuf>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(root) = self.root.take() {
            if let Some(e) = self.descend(&root) {
                return Some(Err(e));
            }
        }

        loop {
            let next = self.stack.last_mut()?.next();
            let candidate = match next {
                Some(path) => path,
                None => {
                    self.stack.pop();
                    continue;
                }
            };

            let dotgit = candidate.join(".git");
            if is_git_dir(&dotgit) {
                return Some(Ok(dotgit));
            }
            if is_git_dir(&candidate) {
                return Some(Ok(candidate));
            }

            // A symlinked directory is reported but not walked into.
            let is_link = fs::symlink_metadata(&candidate)
                .map(|m| m.file_type().is_symlink())
                .unwrap_or(false);
            if is_link {
                continue;
            }
            if let Some(e) = self.descend(&candidate) {
                return Some(Err(e));
            }
        }
    }
}

/// Repositories whose metadata names `owner`. Repositories without
/// readable metadata are skipped; walk errors pass through.
pub fn owned_by<'a, S: MetadataStore>(
    scan: &RepositoryScan,
    store: &'a S,
    owner: &'a str,
) -> impl Iterator<Item = io::Result<PathBuf>> + 'a {
    scan.iter().filter(move |item| match item {
        Ok(path) => match store.load(path) {
            Ok(record) => record.owner == owner,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "skipping repository without metadata");
                false
            }
        },
        Err(_) => true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{CgitrcStore, RepoKind, RepositoryRecord};

    fn make_git_dir(path: &Path) {
        fs::create_dir_all(path.join("objects")).unwrap();
        fs::write(path.join("HEAD"), "ref: refs/heads/master\n").unwrap();
    }

    fn relative(root: &Path, found: Vec<PathBuf>) -> Vec<String> {
        found
            .into_iter()
            .map(|p| p.strip_prefix(root).unwrap().display().to_string())
            .collect()
    }

    #[test]
    fn finds_bare_and_working_tree_repositories() {
        let root = tempfile::tempdir().unwrap();
        make_git_dir(&root.path().join("alice/project.git"));
        make_git_dir(&root.path().join("alice/checkout/.git"));
        make_git_dir(&root.path().join("bob/deep/er/tool.git"));
        make_git_dir(&root.path().join(".hidden/secret.git"));
        fs::create_dir_all(root.path().join("empty")).unwrap();
        fs::write(root.path().join("notes.txt"), "").unwrap();

        let found: Vec<_> = RepositoryScan::new(root.path()).iter().collect::<io::Result<_>>().unwrap();
        assert_eq!(
            relative(root.path(), found),
            ["alice/checkout/.git", "alice/project.git", "bob/deep/er/tool.git"]
        );
    }

    #[test]
    fn does_not_descend_into_a_repository() {
        let root = tempfile::tempdir().unwrap();
        make_git_dir(&root.path().join("outer.git"));
        make_git_dir(&root.path().join("outer.git/objects/inner.git"));

        let found: Vec<_> = RepositoryScan::new(root.path()).iter().collect::<io::Result<_>>().unwrap();
        assert_eq!(relative(root.path(), found), ["outer.git"]);
    }

    #[test]
    fn dangling_symlink_is_skipped() {
        let root = tempfile::tempdir().unwrap();
        make_git_dir(&root.path().join("alice/project.git"));
        std::os::unix::fs::symlink("/nonexistent/gj-target", root.path().join("alice/broken")).unwrap();

        let found: Vec<_> = RepositoryScan::new(root.path()).iter().collect::<io::Result<_>>().unwrap();
        assert_eq!(relative(root.path(), found), ["alice/project.git"]);
    }

    #[test]
    fn head_must_be_a_file() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join("odd/objects")).unwrap();
        fs::create_dir_all(root.path().join("odd/HEAD")).unwrap();
        assert!(!is_git_dir(&root.path().join("odd")));
    }

    #[test]
    fn scan_restarts() {
        let root = tempfile::tempdir().unwrap();
        make_git_dir(&root.path().join("a.git"));
        let scan = RepositoryScan::new(root.path());

        assert_eq!(scan.iter().count(), 1);
        make_git_dir(&root.path().join("b.git"));
        assert_eq!((&scan).into_iter().count(), 2);
    }

    #[test]
    fn missing_root_is_an_error() {
        let mut iter = RepositoryScan::new("/nonexistent/gj-root").iter();
        assert!(matches!(iter.next(), Some(Err(_))));
        assert!(iter.next().is_none());
    }

    #[test]
    fn filters_by_owner() {
        let root = tempfile::tempdir().unwrap();
        for (name, owner) in [("mine.git", "alice"), ("theirs.git", "bob")] {
            let repo = root.path().join(name);
            make_git_dir(&repo);
            CgitrcStore
                .save(&repo, &RepositoryRecord::new(owner, RepoKind::Shared))
                .unwrap();
        }
        make_git_dir(&root.path().join("orphan.git"));

        let scan = RepositoryScan::new(root.path());
        let found: Vec<_> = owned_by(&scan, &CgitrcStore, "alice").collect::<io::Result<_>>().unwrap();
        assert_eq!(relative(root.path(), found), ["mine.git"]);
    }
}
