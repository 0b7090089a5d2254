//! `git` executable as the history collaborator.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use pbisect_config::log_history_debug;
use tokio::process::Command;

use crate::{EntryKind, History, HistoryError, Result, TreeEntry};

/// History backed by a local git repository.
#[derive(Debug, Clone)]
pub struct GitHistory {
    repo: PathBuf,
    program: PathBuf,
}

impl GitHistory {
    pub fn new(repo: impl Into<PathBuf>) -> Self {
        Self {
            repo: repo.into(),
            program: PathBuf::from("git"),
        }
    }

    /// Use a specific git binary instead of the one on `PATH`.
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    pub fn repo(&self) -> &Path {
        &self.repo
    }

    async fn git(&self, args: &[&str]) -> Result<Vec<u8>> {
        log_history_debug!(
            "Running git",
            repo = tracing::field::display(self.repo.display()),
            args = tracing::field::debug(args),
        );
        let output = Command::new(&self.program)
            .arg("-C")
            .arg(&self.repo)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            return Err(HistoryError::Git {
                args: args.join(" "),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output.stdout)
    }

    /// Resolve a user-supplied revision to a full commit id.
    pub async fn resolve(&self, revision: &str) -> Result<String> {
        let spec = format!("{revision}^{{commit}}");
        let out = self
            .git(&["rev-parse", "--verify", "--end-of-options", &spec])
            .await
            .map_err(|e| match e {
                HistoryError::Git { .. } => HistoryError::UnknownRevision(revision.to_string()),
                other => other,
            })?;
        Ok(String::from_utf8_lossy(&out).trim().to_string())
    }
}

#[async_trait]
impl History for GitHistory {
    async fn revisions(&self, good: &str, bad: &str) -> Result<Vec<String>> {
        let good_id = self.resolve(good).await?;
        let bad_id = self.resolve(bad).await?;

        let range = format!("{good_id}..{bad_id}");
        let out = self
            .git(&["rev-list", "--reverse", "--ancestry-path", &range])
            .await?;

        let mut revisions = vec![good_id];
        revisions.extend(
            String::from_utf8_lossy(&out)
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string),
        );

        if revisions.len() < 2 {
            return Err(HistoryError::EmptyRange {
                good: good.to_string(),
                bad: bad.to_string(),
            });
        }
        Ok(revisions)
    }

    async fn list_tree(&self, revision: &str) -> Result<Vec<TreeEntry>> {
        let out = self
            .git(&["ls-tree", "-r", "-t", "-z", "--full-tree", revision])
            .await?;
        parse_ls_tree(revision, &out)
    }

    async fn read_blob(&self, entry: &TreeEntry) -> Result<Vec<u8>> {
        self.git(&["cat-file", "blob", &entry.hash]).await
    }
}

/// Parse `git ls-tree -z` output: `<mode> SP <type> SP <hash> TAB <path> NUL`.
pub fn parse_ls_tree(revision: &str, out: &[u8]) -> Result<Vec<TreeEntry>> {
    let mut entries = Vec::new();
    for record in out.split(|b| *b == 0).filter(|r| !r.is_empty()) {
        let malformed = |reason: &str| HistoryError::Parse {
            record: String::from_utf8_lossy(record).into_owned(),
            reason: reason.to_string(),
        };

        let tab = record
            .iter()
            .position(|b| *b == b'\t')
            .ok_or_else(|| malformed("missing tab separator"))?;
        let (meta, path) = (&record[..tab], &record[tab + 1..]);

        let meta = std::str::from_utf8(meta).map_err(|_| malformed("non-utf8 header"))?;
        let mut fields = meta.split_ascii_whitespace();
        let (Some(mode), Some(_kind), Some(hash), None) =
            (fields.next(), fields.next(), fields.next(), fields.next())
        else {
            return Err(malformed("expected <mode> <type> <hash>"));
        };

        let kind = EntryKind::from_git_mode(mode).ok_or_else(|| malformed("unknown mode"))?;
        entries.push(TreeEntry::new(path_from_bytes(path), hash, kind, revision)?);
    }
    Ok(entries)
}

#[cfg(unix)]
fn path_from_bytes(bytes: &[u8]) -> PathBuf {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;
    PathBuf::from(OsStr::from_bytes(bytes))
}

#[cfg(not(unix))]
fn path_from_bytes(bytes: &[u8]) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &[u8] = b"040000 tree 4b825dc642cb6eb9a060e54bf8d69288fbee4904\tsrc\0\
100644 blob e69de29bb2d1d6434b8b29ae775ad8c2e48c5391\tsrc/lib.rs\0\
100755 blob 3b18e512dba79e4c8300dd08aeb37f8e728b8dad\tscripts/run tests.sh\0\
120000 blob 1f7391f92b6a3792204e07e99f71f643cc35e7e1\tlink\0\
160000 commit 0123456789abcdef0123456789abcdef01234567\tvendor/sub\0";

    #[test]
    fn test_parse_ls_tree() {
        let entries = parse_ls_tree("rev1", SAMPLE).unwrap();
        assert_eq!(entries.len(), 5);

        assert_eq!(entries[0].kind, EntryKind::Directory);
        assert_eq!(entries[0].path, PathBuf::from("src"));

        assert_eq!(entries[1].kind, EntryKind::File);
        assert_eq!(entries[1].hash, "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391");
        assert_eq!(entries[1].revision, "rev1");

        // Spaces survive because -z output is not quoted
        assert_eq!(entries[2].path, PathBuf::from("scripts/run tests.sh"));
        assert_eq!(entries[2].kind, EntryKind::Executable);

        assert_eq!(entries[3].kind, EntryKind::Symlink);
        assert_eq!(entries[4].kind, EntryKind::Submodule);
    }

    #[test]
    fn test_parse_empty_tree() {
        assert!(parse_ls_tree("rev", b"").unwrap().is_empty());
    }

    #[test]
    fn test_parse_rejects_malformed_records() {
        assert!(matches!(
            parse_ls_tree("rev", b"100644 blob abcd no-tab\0"),
            Err(HistoryError::Parse { .. })
        ));
        assert!(matches!(
            parse_ls_tree("rev", b"100600 blob abcd\tfile\0"),
            Err(HistoryError::Parse { .. })
        ));
        assert!(matches!(
            parse_ls_tree("rev", b"100644 blob\tfile\0"),
            Err(HistoryError::Parse { .. })
        ));
        assert!(matches!(
            parse_ls_tree("rev", b"100644 blob abcd\t../escape\0"),
            Err(HistoryError::Parse { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_git_binary_is_an_io_error() {
        let temp = tempfile::tempdir().unwrap();
        let history = GitHistory::new(temp.path()).with_program("/nonexistent/git-binary");
        let err = history.list_tree("HEAD").await.unwrap_err();
        assert!(matches!(err, HistoryError::Io(_)));
    }
}
