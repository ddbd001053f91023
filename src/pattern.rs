//! Include/ignore file selection for repository decomposition.
//!
//! Every pattern list uses `.gitignore` syntax and is compiled into an
//! [`ignore::gitignore::Gitignore`] matcher rooted at the checkout.  Paths
//! handed to [`FilePatternManager::should_include_file`] are relative to
//! that root.

use std::path::{Path, PathBuf};

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use tracing::debug;

use crate::model::RepoParseConfig;

/// Patterns excluded when `use_default_ignore` is set.
pub const DEFAULT_IGNORE_PATTERNS: &[&str] = &[
    ".git/",
    ".svn/",
    ".hg/",
    "node_modules/",
    "bower_components/",
    "__pycache__/",
    "*.pyc",
    "*.pyo",
    ".venv/",
    "venv/",
    ".tox/",
    ".idea/",
    ".vscode/",
    ".DS_Store",
    "Thumbs.db",
    "*.log",
    "*.tmp",
    "*.swp",
    "dist/",
    "build/",
    "target/",
    "coverage/",
    ".cache/",
    "*.min.js",
    "*.min.css",
    "*.map",
    "*.lock",
    "package-lock.json",
    "*.so",
    "*.dll",
    "*.dylib",
    "*.exe",
    "*.o",
    "*.a",
    "*.class",
    "*.jar",
];

/// Decides which repository files become knowledge items.
#[derive(Debug)]
pub struct FilePatternManager {
    root: PathBuf,
    config: RepoParseConfig,
    include: Option<Gitignore>,
    ignore: Gitignore,
    defaults: Option<Gitignore>,
    gitignore: Option<Gitignore>,
    /// Problems found while compiling the patterns.
    build_warnings: Vec<String>,
}

impl FilePatternManager {
    /// Compile the pattern lists of `config` against the checkout at
    /// `repo_root`.  Invalid patterns are dropped and reported by
    /// [`validate_patterns`](Self::validate_patterns).
    pub fn new(config: &RepoParseConfig, repo_root: &Path) -> Self {
        let mut build_warnings = Vec::new();

        let include = if config.include_patterns.is_empty() {
            None
        } else {
            Some(compile(
                repo_root,
                config.include_patterns.iter().map(String::as_str),
                &mut build_warnings,
            ))
        };

        let ignore = compile(
            repo_root,
            config.ignore_patterns.iter().map(String::as_str),
            &mut build_warnings,
        );

        let defaults = config.use_default_ignore.then(|| {
            compile(
                repo_root,
                DEFAULT_IGNORE_PATTERNS.iter().copied(),
                &mut build_warnings,
            )
        });

        let gitignore = if config.use_gitignore {
            load_gitignore(repo_root, &mut build_warnings)
        } else {
            None
        };

        Self {
            root: repo_root.to_path_buf(),
            config: config.clone(),
            include,
            ignore,
            defaults,
            gitignore,
            build_warnings,
        }
    }

    /// Return `true` when the file at `relative_path` should be decomposed.
    ///
    /// Ignore rules win over include rules: explicit ignores, then the
    /// default list, then `.gitignore`; only then are include patterns
    /// consulted (an empty include list admits everything).
    pub fn should_include_file(&self, relative_path: &str) -> bool {
        let normalized = relative_path.replace('\\', "/");
        let path = Path::new(&normalized);

        if path
            .components()
            .any(|c| c.as_os_str() == std::ffi::OsStr::new(".git"))
        {
            return false;
        }

        if matches(&self.ignore, path) {
            debug!(path = %normalized, "excluded by ignore pattern");
            return false;
        }
        if let Some(defaults) = &self.defaults {
            if matches(defaults, path) {
                debug!(path = %normalized, "excluded by default ignore pattern");
                return false;
            }
        }
        if let Some(gitignore) = &self.gitignore {
            if matches(gitignore, path) {
                debug!(path = %normalized, "excluded by .gitignore");
                return false;
            }
        }

        match &self.include {
            Some(include) => matches(include, path),
            None => true,
        }
    }

    /// Return human-readable warnings about the configured patterns.
    pub fn validate_patterns(&self) -> Vec<String> {
        let mut warnings = self.build_warnings.clone();

        if self.config.include_patterns.is_empty() {
            warnings.push(
                "No include patterns specified: every file that is not ignored will be included"
                    .to_string(),
            );
        }

        for pattern in &self.config.include_patterns {
            if self.config.ignore_patterns.contains(pattern) {
                warnings.push(format!(
                    "Pattern '{pattern}' is both included and ignored: ignore takes precedence"
                ));
            }
        }

        if self.config.use_gitignore && !self.root.join(".gitignore").is_file() {
            warnings.push(format!(
                "use_gitignore is set but no .gitignore exists in {}",
                self.root.display()
            ));
        }

        warnings
    }
}

/// Whether `path` (a file) or any of its parent directories matches.
fn matches(matcher: &Gitignore, path: &Path) -> bool {
    if matcher.is_empty() {
        return false;
    }
    matcher.matched_path_or_any_parents(path, false).is_ignore()
}

fn compile<'a>(
    root: &Path,
    patterns: impl Iterator<Item = &'a str>,
    warnings: &mut Vec<String>,
) -> Gitignore {
    let mut builder = GitignoreBuilder::new(root);
    for pattern in patterns {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            continue;
        }
        if let Err(e) = builder.add_line(None, pattern) {
            warnings.push(format!("Invalid pattern '{pattern}': {e}"));
        }
    }
    match builder.build() {
        Ok(matcher) => matcher,
        Err(e) => {
            warnings.push(format!("Failed to compile patterns: {e}"));
            Gitignore::empty()
        }
    }
}

fn load_gitignore(root: &Path, warnings: &mut Vec<String>) -> Option<Gitignore> {
    let path = root.join(".gitignore");
    if !path.is_file() {
        return None;
    }
    let mut builder = GitignoreBuilder::new(root);
    if let Some(e) = builder.add(&path) {
        warnings.push(format!("Problem reading {}: {e}", path.display()));
    }
    match builder.build() {
        Ok(matcher) => Some(matcher),
        Err(e) => {
            warnings.push(format!("Failed to compile {}: {e}", path.display()));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(include: &[&str], ignore: &[&str], gitignore: bool, defaults: bool) -> RepoParseConfig {
        RepoParseConfig {
            include_patterns: include.iter().map(|s| s.to_string()).collect(),
            ignore_patterns: ignore.iter().map(|s| s.to_string()).collect(),
            use_gitignore: gitignore,
            use_default_ignore: defaults,
        }
    }

    #[test]
    fn include_and_ignore_priority() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = FilePatternManager::new(
            &config(&["*.md"], &["*ignore.md"], true, true),
            tmp.path(),
        );
        assert!(mgr.should_include_file("docs/test.md"));
        assert!(mgr.should_include_file("docs/keep.md"));
        assert!(!mgr.should_include_file("docs/ignore.md"));
        assert!(!mgr.should_include_file("docs/test2.txt"));
    }

    #[test]
    fn gitignore_and_default_ignore_toggles() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(".gitignore"), "*.log\n").unwrap();

        let neither = FilePatternManager::new(&config(&["*.log"], &[], false, false), tmp.path());
        assert!(neither.should_include_file("docs/should.log"));
        assert!(neither.should_include_file("docs/should_keep.log"));

        let both = FilePatternManager::new(&config(&["*.log"], &[], true, true), tmp.path());
        assert!(!both.should_include_file("docs/should.log"));

        let gitignore_only = FilePatternManager::new(&config(&["*.log"], &[], true, false), tmp.path());
        assert!(!gitignore_only.should_include_file("docs/should_keep.log"));

        let defaults_only = FilePatternManager::new(&config(&["*.log"], &[], false, true), tmp.path());
        assert!(!defaults_only.should_include_file("docs/should.log"));
    }

    #[test]
    fn empty_include_admits_everything_not_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = FilePatternManager::new(&config(&[], &[], false, true), tmp.path());
        assert!(mgr.should_include_file("src/main.rs"));
        assert!(mgr.should_include_file("README"));
        assert!(!mgr.should_include_file("node_modules/left-pad/index.js"));
        assert!(!mgr.should_include_file("app.min.js"));
    }

    #[test]
    fn git_directory_is_never_included() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = FilePatternManager::new(&config(&[], &[], false, false), tmp.path());
        assert!(!mgr.should_include_file(".git/config"));
        assert!(!mgr.should_include_file("vendor/.git/HEAD"));
    }

    #[test]
    fn directory_patterns_match_nested_files() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = FilePatternManager::new(&config(&["docs/"], &["docs/internal/"], false, false), tmp.path());
        assert!(mgr.should_include_file("docs/guide/intro.md"));
        assert!(!mgr.should_include_file("docs/internal/secret.md"));
        assert!(!mgr.should_include_file("src/lib.rs"));
    }

    #[test]
    fn windows_separators_are_normalised() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = FilePatternManager::new(&config(&["*.md"], &["drafts/"], false, false), tmp.path());
        assert!(!mgr.should_include_file("drafts\\todo.md"));
        assert!(mgr.should_include_file("docs\\todo.md"));
    }

    #[test]
    fn validate_reports_conflicts_and_missing_gitignore() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = FilePatternManager::new(&config(&["*.md"], &["*.md"], true, false), tmp.path());
        let warnings = mgr.validate_patterns();
        assert!(warnings.iter().any(|w| w.contains("both included and ignored")));
        assert!(warnings.iter().any(|w| w.contains("no .gitignore")));
    }

    #[test]
    fn validate_reports_empty_include() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = FilePatternManager::new(&config(&[], &[], false, true), tmp.path());
        assert!(mgr
            .validate_patterns()
            .iter()
            .any(|w| w.contains("No include patterns")));
    }

    #[test]
    fn default_parse_config_selects_markdown() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = FilePatternManager::new(&RepoParseConfig::default(), tmp.path());
        assert!(mgr.should_include_file("README.md"));
        assert!(mgr.should_include_file("docs/page.mdx"));
        assert!(!mgr.should_include_file("src/lib.rs"));
        assert!(mgr.validate_patterns().is_empty());
    }
}
