//! Wildcard search with result-count contracts.
//!
//! A glob that "should" match exactly one file is a latent bug when it
//! matches zero or five; the bounds here turn that into a structured,
//! catchable failure instead of a mystery downstream.

use std::path::PathBuf;

use glob::Paths;
use tracing::{debug, info};

use crate::env::resolve_env;
use crate::error::{FileMatchError, Result, ShellError};

fn validate_bounds(min_results: usize, max_results: Option<usize>) -> Result<()> {
    if let Some(max) = max_results {
        if max < min_results {
            return Err(ShellError::Usage(
                "max_results must be greater or equal to min_results".to_string(),
            ));
        }
    }
    Ok(())
}

fn expand(pattern: &str) -> Result<Paths> {
    let resolved = resolve_env(pattern)?;
    glob::glob(&resolved)
        .map_err(|err| ShellError::Usage(format!("invalid glob pattern '{resolved}': {err}")))
}

/// Expand a wildcard pattern (env vars and `**` supported), enforcing an
/// expected result count.
///
/// Fails with [`ShellError::FileMatch`] when fewer than `min_results` or
/// more than `max_results` paths match; entries that cannot be read are
/// skipped, matching what a shell glob would show.
pub fn glob(pattern: &str, min_results: usize, max_results: Option<usize>) -> Result<Vec<PathBuf>> {
    validate_bounds(min_results, max_results)?;

    let mut results = Vec::new();
    for entry in expand(pattern)? {
        match entry {
            Ok(path) => results.push(path),
            Err(err) => debug!("Skipping unreadable match: {err}"),
        }
    }

    if results.len() < min_results || max_results.is_some_and(|max| results.len() > max) {
        return Err(FileMatchError {
            pattern: pattern.to_string(),
            min_results,
            max_results,
            got_results: results.len(),
            maybe_extra_results: false,
        }
        .into());
    }

    info!("File match {pattern} produced {} results", results.len());
    Ok(results)
}

/// Lazy variant of [`glob`].
///
/// Results stream out as the filesystem is walked, and exceeding
/// `max_results` aborts iteration the moment the bound is crossed — the
/// paths already yielded have been seen (and possibly acted on) by the
/// caller; nothing is rolled back. An under-count only becomes known at
/// exhaustion.
pub fn iglob(pattern: &str, min_results: usize, max_results: Option<usize>) -> Result<IGlob> {
    validate_bounds(min_results, max_results)?;
    let paths = expand(pattern)?;
    Ok(IGlob {
        pattern: pattern.to_string(),
        paths,
        min_results,
        max_results,
        count: 0,
        done: false,
    })
}

/// Streaming glob iterator returned by [`iglob`].
pub struct IGlob {
    pattern: String,
    paths: Paths,
    min_results: usize,
    max_results: Option<usize>,
    count: usize,
    done: bool,
}

impl IGlob {
    fn contract_violation(&self, maybe_extra_results: bool) -> ShellError {
        FileMatchError {
            pattern: self.pattern.clone(),
            min_results: self.min_results,
            max_results: self.max_results,
            got_results: self.count,
            maybe_extra_results,
        }
        .into()
    }
}

impl Iterator for IGlob {
    type Item = Result<PathBuf>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            match self.paths.next() {
                Some(Ok(path)) => {
                    self.count += 1;
                    if let Some(max) = self.max_results {
                        if self.count > max {
                            self.done = true;
                            return Some(Err(self.contract_violation(true)));
                        }
                    }
                    return Some(Ok(path));
                }
                Some(Err(err)) => debug!("Skipping unreadable match: {err}"),
                None => {
                    self.done = true;
                    if self.count < self.min_results {
                        return Some(Err(self.contract_violation(false)));
                    }
                    info!(
                        "File match {} produced {} results",
                        self.pattern, self.count
                    );
                    return None;
                }
            }
        }
    }
}
