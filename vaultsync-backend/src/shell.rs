//! Desktop backend: drives the system `git` binary inside the vault.
//!
//! Every call spawns one subprocess through a bounded [`ProcessPool`] with the
//! vault as working directory. Prompts are disabled and the locale is pinned to
//! `C` so stderr can be classified into the failure taxonomy.

use std::path::{Path, PathBuf};
use std::time::Duration;

use vaultsync_core::{
    config::{DEFAULT_MAX_CONCURRENT_PROCESSES, DEFAULT_NETWORK_TIMEOUT_SECS},
    BackendKind, CommitId, ConflictReport, PullOutcome, RemoteRef, RepositoryState,
};

use crate::backend::{Backend, REMOTE_NAME};
use crate::error::{unavailable, BackendError};
use crate::process::{ProcessOutput, ProcessPool};

/// `git` subprocess backend.
#[derive(Debug)]
pub struct ShellBackend {
    git: PathBuf,
    root: PathBuf,
    branch: String,
    timeout: Duration,
    identity: Option<(String, String)>,
    pool: ProcessPool,
}

impl ShellBackend {
    pub fn new(git: impl Into<PathBuf>, root: impl Into<PathBuf>, branch: impl Into<String>) -> Self {
        Self {
            git: git.into(),
            root: root.into(),
            branch: branch.into(),
            timeout: Duration::from_secs(DEFAULT_NETWORK_TIMEOUT_SECS),
            identity: None,
            pool: ProcessPool::new(DEFAULT_MAX_CONCURRENT_PROCESSES),
        }
    }

    /// Deadline applied to every subprocess.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_processes(mut self, max: usize) -> Self {
        self.pool = ProcessPool::new(max);
        self
    }

    /// Author and committer used for commits, overriding git's own config.
    pub fn with_identity(mut self, name: impl Into<String>, email: impl Into<String>) -> Self {
        self.identity = Some((name.into(), email.into()));
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn envs(&self) -> Vec<(&'static str, String)> {
        let mut envs = vec![
            ("GIT_TERMINAL_PROMPT", "0".to_string()),
            ("GIT_MERGE_AUTOEDIT", "no".to_string()),
            ("LC_ALL", "C".to_string()),
        ];
        if let Some((name, email)) = &self.identity {
            envs.push(("GIT_AUTHOR_NAME", name.clone()));
            envs.push(("GIT_AUTHOR_EMAIL", email.clone()));
            envs.push(("GIT_COMMITTER_NAME", name.clone()));
            envs.push(("GIT_COMMITTER_EMAIL", email.clone()));
        }
        envs
    }

    fn git(&self, operation: &'static str, args: &[&str]) -> Result<ProcessOutput, BackendError> {
        self.pool.run(
            &self.git,
            args,
            &self.root,
            &self.envs(),
            operation,
            self.timeout,
        )
    }

    /// Run and require success; failures are classified from stderr.
    fn git_ok(&self, operation: &'static str, args: &[&str]) -> Result<String, BackendError> {
        let output = self.git(operation, args)?;
        if output.success() {
            Ok(output.stdout)
        } else {
            Err(classify_failure(&self.root, args, &output))
        }
    }

    fn remote_tracking_ref(&self) -> String {
        format!("refs/remotes/{REMOTE_NAME}/{}", self.branch)
    }

    fn resolve(&self, rev: &str) -> Result<Option<CommitId>, BackendError> {
        let output = self.git("rev-parse", &["rev-parse", "--verify", "--quiet", rev])?;
        let id = output.stdout.trim();
        Ok((output.success() && !id.is_empty()).then(|| CommitId::from(id)))
    }

    /// Ahead/behind against `origin/<branch>` when no upstream is configured.
    fn divergence_from_remote(&self) -> Result<(usize, usize), BackendError> {
        let tracking = self.remote_tracking_ref();
        if self.head()?.is_none() {
            let output = self.git("rev-list", &["rev-list", "--count", &tracking])?;
            let behind = output.stdout.trim().parse().ok().filter(|_| output.success());
            return Ok((0, behind.unwrap_or(0)));
        }
        let range = format!("HEAD...{tracking}");
        let output = self.git("rev-list", &["rev-list", "--left-right", "--count", &range])?;
        if !output.success() {
            return Ok((0, 0));
        }
        Ok(parse_left_right(&output.stdout).unwrap_or((0, 0)))
    }

    fn count_changed_since(&self, before: Option<&CommitId>) -> Result<usize, BackendError> {
        let listing = match before {
            Some(id) => self.git_ok("diff", &["diff", "--name-only", &id.0, "HEAD"])?,
            None => self.git_ok("ls-files", &["ls-files"])?,
        };
        Ok(listing.lines().filter(|l| !l.trim().is_empty()).count())
    }
}

impl Backend for ShellBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Desktop
    }

    fn is_repository(&self) -> Result<bool, BackendError> {
        if !self.root.is_dir() {
            return Ok(false);
        }
        let output = self.git("rev-parse", &["rev-parse", "--is-inside-work-tree"])?;
        Ok(output.success() && output.stdout.trim() == "true")
    }

    fn initialize(&self, _remote_url: &str) -> Result<(), BackendError> {
        Err(unavailable(
            &self.root,
            "vault is not a git repository; run `git init` in it first",
        ))
    }

    fn status(&self) -> Result<RepositoryState, BackendError> {
        let raw = self.git_ok("status", &["status", "--porcelain=v2", "--branch", "-z"])?;
        let parsed = parse_porcelain_v2(&raw);
        let mut state = parsed.state;
        if !parsed.has_upstream {
            let (ahead, behind) = self.divergence_from_remote()?;
            state.ahead_count = ahead;
            state.behind_count = behind;
        }
        Ok(state)
    }

    fn stage_all(&self) -> Result<(), BackendError> {
        self.git_ok("add", &["add", "-A"]).map(|_| ())
    }

    fn commit(&self, message: &str) -> Result<CommitId, BackendError> {
        let output = self.git("commit", &["commit", "-m", message])?;
        if !output.success() {
            if output.stdout.contains("nothing to commit") || output.stdout.contains("no changes added")
            {
                return Err(BackendError::NothingToCommit);
            }
            return Err(classify_failure(&self.root, &["commit"], &output));
        }
        self.head()?
            .ok_or_else(|| unavailable(&self.root, "HEAD missing after commit"))
    }

    fn set_remote(&self, name: &str, url: &str) -> Result<(), BackendError> {
        let removed = self.git("remote", &["remote", "remove", name])?;
        if !removed.success() {
            let stderr = removed.stderr.to_ascii_lowercase();
            if !stderr.contains("no such remote") {
                return Err(classify_failure(&self.root, &["remote", "remove", name], &removed));
            }
            tracing::debug!(remote = name, "no existing remote to remove");
        }
        self.git_ok("remote", &["remote", "add", name, url]).map(|_| ())
    }

    fn fetch(&self) -> Result<RemoteRef, BackendError> {
        self.git_ok("fetch", &["fetch", REMOTE_NAME])?;
        Ok(RemoteRef {
            name: format!("{REMOTE_NAME}/{}", self.branch),
            head: self.resolve(&self.remote_tracking_ref())?,
        })
    }

    fn pull(&self, branch: &str) -> Result<PullOutcome, BackendError> {
        let before = self.head()?;
        let args = ["pull", "--no-rebase", "--no-edit", REMOTE_NAME, branch];
        let output = self.git("pull", &args)?;
        if output.success() {
            let changed = self.count_changed_since(before.as_ref())?;
            return Ok(PullOutcome::Merged { changed });
        }

        if output
            .stderr
            .to_ascii_lowercase()
            .contains("couldn't find remote ref")
        {
            tracing::debug!(branch, "remote branch absent; nothing to pull");
            return Ok(PullOutcome::Merged { changed: 0 });
        }

        // The CLI only reports conflicts as prose; the index is authoritative.
        let state = self.status()?;
        if state.has_conflicts() {
            return Ok(PullOutcome::Conflicted(ConflictReport::new(
                state.conflicted_paths,
            )));
        }
        Err(classify_failure(&self.root, &args, &output))
    }

    fn push(&self, branch: &str, set_upstream: bool) -> Result<(), BackendError> {
        let mut args = vec!["push"];
        if set_upstream {
            args.push("-u");
        }
        args.extend([REMOTE_NAME, branch]);
        self.git_ok("push", &args).map(|_| ())
    }

    fn set_upstream(&self, branch: &str) -> Result<(), BackendError> {
        let upstream = format!("--set-upstream-to={REMOTE_NAME}/{branch}");
        self.git_ok("branch", &["branch", &upstream, branch])
            .map(|_| ())
    }

    fn head(&self) -> Result<Option<CommitId>, BackendError> {
        self.resolve("HEAD")
    }
}

// ---------------------------------------------------------------------------
// Output parsing
// ---------------------------------------------------------------------------

/// Parsed `git status --porcelain=v2 --branch -z`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PorcelainStatus {
    pub state: RepositoryState,
    /// `None` when detached.
    pub branch: Option<String>,
    /// Whether `# branch.ab` was present (an upstream is configured).
    pub has_upstream: bool,
}

/// Parse NUL-separated porcelain v2 records.
pub fn parse_porcelain_v2(raw: &str) -> PorcelainStatus {
    let mut parsed = PorcelainStatus {
        state: RepositoryState::clean(),
        ..PorcelainStatus::default()
    };

    let mut records = raw.split('\0').filter(|r| !r.is_empty());
    while let Some(record) = records.next() {
        if let Some(header) = record.strip_prefix("# ") {
            if let Some(ab) = header.strip_prefix("branch.ab ") {
                if let Some((ahead, behind)) = parse_ab(ab) {
                    parsed.state.ahead_count = ahead;
                    parsed.state.behind_count = behind;
                    parsed.has_upstream = true;
                }
            } else if let Some(head) = header.strip_prefix("branch.head ") {
                if head != "(detached)" {
                    parsed.branch = Some(head.to_string());
                }
            }
            continue;
        }

        let Some((tag, rest)) = record.split_once(' ') else {
            continue;
        };
        match tag {
            "1" | "?" => parsed.state.is_clean = false,
            "2" => {
                parsed.state.is_clean = false;
                // Renames carry the original path as the next record.
                records.next();
            }
            "u" => {
                parsed.state.is_clean = false;
                if let Some(path) = rest.splitn(10, ' ').nth(9) {
                    parsed.state.conflicted_paths.push(PathBuf::from(path));
                }
            }
            _ => {}
        }
    }
    parsed
}

fn parse_ab(ab: &str) -> Option<(usize, usize)> {
    let (ahead, behind) = ab.split_once(' ')?;
    let ahead = ahead.strip_prefix('+')?.parse().ok()?;
    let behind = behind.strip_prefix('-')?.parse().ok()?;
    Some((ahead, behind))
}

fn parse_left_right(output: &str) -> Option<(usize, usize)> {
    let mut parts = output.split_whitespace();
    let left = parts.next()?.parse().ok()?;
    let right = parts.next()?.parse().ok()?;
    Some((left, right))
}

/// Map a failed subprocess onto the failure taxonomy.
pub(crate) fn classify_failure(root: &Path, args: &[&str], output: &ProcessOutput) -> BackendError {
    let stderr = output.stderr.trim().to_string();
    let lower = stderr.to_ascii_lowercase();
    let matches_any = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if matches_any(&["not a git repository"]) {
        return unavailable(root, stderr);
    }
    if matches_any(&[
        "authentication failed",
        "could not read username",
        "could not read password",
        "invalid username or password",
        "permission denied (publickey",
        "terminal prompts disabled",
        "the requested url returned error: 401",
        "the requested url returned error: 403",
    ]) {
        return BackendError::AuthFailed(stderr);
    }
    if matches_any(&["[rejected]", "non-fast-forward", "fetch first", "failed to push some refs"]) {
        return BackendError::PushRejected(stderr);
    }
    if matches_any(&[
        "could not resolve host",
        "unable to access",
        "does not appear to be a git repository",
        "repository not found",
        "could not read from remote repository",
        "connection refused",
        "connection timed out",
        "no such remote",
        "unable to look up",
    ]) {
        return BackendError::RemoteUnreachable(stderr);
    }
    BackendError::Command {
        command: format!("git {}", args.join(" ")),
        status: output.status,
        stderr,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(stderr: &str) -> ProcessOutput {
        ProcessOutput {
            status: Some(1),
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }

    #[test]
    fn clean_tree_with_upstream() {
        let raw = "# branch.oid 1234\0# branch.head main\0# branch.upstream origin/main\0# branch.ab +0 -3\0";
        let parsed = parse_porcelain_v2(raw);
        assert!(parsed.state.is_clean);
        assert_eq!(parsed.state.behind_count, 3);
        assert_eq!(parsed.state.ahead_count, 0);
        assert!(parsed.has_upstream);
        assert_eq!(parsed.branch.as_deref(), Some("main"));
    }

    #[test]
    fn modified_untracked_and_renamed_entries_mark_dirty() {
        let raw = "# branch.head main\0\
                   1 .M N... 100644 100644 100644 abc abc notes/today.md\0\
                   2 R. N... 100644 100644 100644 abc abc R100 new name.md\0old name.md\0\
                   ? scratch.md\0";
        let parsed = parse_porcelain_v2(raw);
        assert!(!parsed.state.is_clean);
        assert!(parsed.state.conflicted_paths.is_empty());
        assert!(!parsed.has_upstream);
    }

    #[test]
    fn unmerged_entries_are_conflicts_with_spaces_preserved() {
        let raw = "# branch.head main\0# branch.ab +1 -1\0\
                   u UU N... 100644 100644 100644 100644 a1 b2 c3 daily notes/2024-01-01.md\0\
                   u AA N... 000000 100644 100644 100644 000 b2 c3 todo.md\0";
        let parsed = parse_porcelain_v2(raw);
        assert_eq!(
            parsed.state.conflicted_paths,
            vec![
                PathBuf::from("daily notes/2024-01-01.md"),
                PathBuf::from("todo.md")
            ]
        );
        assert!(!parsed.state.is_clean);
    }

    #[test]
    fn ignored_entries_keep_tree_clean() {
        let parsed = parse_porcelain_v2("# branch.head main\0! .obsidian/cache\0");
        assert!(parsed.state.is_clean);
    }

    #[test]
    fn detached_head_has_no_branch() {
        let parsed = parse_porcelain_v2("# branch.oid abc\0# branch.head (detached)\0");
        assert_eq!(parsed.branch, None);
    }

    #[test]
    fn left_right_counts_parse() {
        assert_eq!(parse_left_right("2\t5\n"), Some((2, 5)));
        assert_eq!(parse_left_right("garbage"), None);
    }

    #[test]
    fn classifies_auth_before_unreachable() {
        let err = classify_failure(
            Path::new("/v"),
            &["fetch", "origin"],
            &failed("git@github.com: Permission denied (publickey).\nfatal: Could not read from remote repository."),
        );
        assert!(matches!(err, BackendError::AuthFailed(_)), "got {err}");
    }

    #[test]
    fn classifies_push_rejection() {
        let err = classify_failure(
            Path::new("/v"),
            &["push"],
            &failed(" ! [rejected]        main -> main (fetch first)\nerror: failed to push some refs"),
        );
        assert!(matches!(err, BackendError::PushRejected(_)), "got {err}");
    }

    #[test]
    fn classifies_bad_url_as_unreachable() {
        let err = classify_failure(
            Path::new("/v"),
            &["fetch", "origin"],
            &failed("fatal: unable to access 'https://nope.invalid/x.git/': Could not resolve host: nope.invalid"),
        );
        assert!(matches!(err, BackendError::RemoteUnreachable(_)), "got {err}");
    }

    #[test]
    fn classifies_missing_repo() {
        let err = classify_failure(
            Path::new("/v"),
            &["status"],
            &failed("fatal: not a git repository (or any of the parent directories): .git"),
        );
        assert!(matches!(err, BackendError::RepoUnavailable { .. }), "got {err}");
    }

    #[test]
    fn unknown_failure_keeps_command_context() {
        let err = classify_failure(Path::new("/v"), &["add", "-A"], &failed("fatal: index.lock exists"));
        match err {
            BackendError::Command { command, status, .. } => {
                assert_eq!(command, "git add -A");
                assert_eq!(status, Some(1));
            }
            other => panic!("expected command error, got {other}"),
        }
    }
}
