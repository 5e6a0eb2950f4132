use std::path::{Component, Path};

use crate::glob::{GlobError, GlobMatcher};

/// Selects paths inside a fetched tree using pick and exclude globs.
///
/// A pick or exclude that matches a directory applies to everything below it.
/// Without picks every path is picked.
#[derive(Debug, Clone, Default)]
pub struct PathFilter {
    picks: Vec<GlobMatcher>,
    excludes: Vec<GlobMatcher>,
}

impl PathFilter {
    pub fn new<P, E>(picks: P, excludes: E) -> Result<Self, GlobError>
    where
        P: IntoIterator,
        P::Item: AsRef<str>,
        E: IntoIterator,
        E::Item: AsRef<str>,
    {
        Ok(PathFilter {
            picks: compile_all(picks)?,
            excludes: compile_all(excludes)?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.picks.is_empty() && self.excludes.is_empty()
    }

    /// `path` is relative to the root of the tree being filtered.
    pub fn allows(&self, path: &Path) -> bool {
        let ancestors = match slash_ancestors(path) {
            Some(ancestors) => ancestors,
            None => return false,
        };
        let picked = self.picks.is_empty()
            || self
                .picks
                .iter()
                .any(|pick| ancestors.iter().any(|p| pick.is_match(p)));
        let excluded = self
            .excludes
            .iter()
            .any(|exclude| ancestors.iter().any(|p| exclude.is_match(p)));
        picked && !excluded
    }
}

fn compile_all<I>(globs: I) -> Result<Vec<GlobMatcher>, GlobError>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    globs
        .into_iter()
        .map(|glob| GlobMatcher::compile(glob.as_ref()))
        .collect()
}

/// `a/b/c` becomes `["a", "a/b", "a/b/c"]`. Non UTF-8 and non-normal components yield `None`.
fn slash_ancestors(path: &Path) -> Option<Vec<String>> {
    let mut ancestors: Vec<String> = Vec::new();
    for component in path.components() {
        let Component::Normal(name) = component else {
            return None;
        };
        let name = name.to_str()?;
        let joined = match ancestors.last() {
            Some(parent) => format!("{parent}/{name}"),
            None => name.to_owned(),
        };
        ancestors.push(joined);
    }
    Some(ancestors)
}
