use log::trace;
use regex_lite::Regex;
use thiserror::Error;

/// Matches one whole path component followed by its slash.
const ANY_COMPONENTS: &str = "(?:[^/]+/)*";
const NON_EMPTY_COMPONENT: &str = "[^/]+";
const ANY_CHARS_IN_COMPONENT: &str = "[^/]*";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid glob `{pattern}`: {reason}")]
pub struct GlobError {
    pub pattern: String,
    pub reason: String,
}

impl GlobError {
    fn new(pattern: &str, reason: &str) -> Self {
        GlobError {
            pattern: pattern.to_owned(),
            reason: reason.to_owned(),
        }
    }
}

/// A compiled glob, anchored at both ends of the path it is tested against.
///
/// Paths are expected in `/`-separated form, without duplicate or trailing slashes.
#[derive(Debug, Clone)]
pub struct GlobMatcher {
    pattern: String,
    regex: Regex,
}

impl GlobMatcher {
    pub fn compile(pattern: &str) -> Result<Self, GlobError> {
        let source = glob_to_path_regex(pattern)?;
        trace!("Compiled glob {} to {}", pattern, source);
        let regex = Regex::new(&source)
            .map_err(|e| GlobError::new(pattern, &format!("generated bad expression: {e}")))?;
        Ok(GlobMatcher {
            pattern: pattern.to_owned(),
            regex,
        })
    }

    pub fn is_match(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

/// Splits a glob on every unescaped `*`, resolving `\*` and `\\` in the fragments.
///
/// A backslash in front of any other character, or at the very end, is kept as is.
pub fn split_on_stars_interpreting_backslashes(glob: &str) -> Vec<String> {
    let mut fragments = Vec::new();
    let mut current = String::new();
    let mut chars = glob.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.peek() {
                Some(&next @ ('*' | '\\')) => {
                    current.push(next);
                    chars.next();
                }
                _ => current.push('\\'),
            },
            '*' => fragments.push(std::mem::take(&mut current)),
            c => current.push(c),
        }
    }
    fragments.push(current);
    fragments
}

pub fn contains_unescaped_stars(glob: &str) -> bool {
    split_on_stars_interpreting_backslashes(glob).len() > 1
}

/// Leading path components of `glob` up to the first one that contains a wildcard.
///
/// `a/b/c*/d` gives `a/b`; a glob without wildcards is returned whole.
pub fn unglobbed_prefix(glob: &str) -> String {
    let components: Vec<&str> = glob.split('/').collect();
    match components
        .iter()
        .position(|component| contains_unescaped_stars(component))
    {
        Some(index) => components[..index].join("/"),
        None => glob.to_owned(),
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Token {
    Literal(String),
    Stars(usize),
}

/// Groups the fragments between stars into literal runs and star runs.
fn tokenize(glob: &str) -> Vec<Token> {
    let fragments = split_on_stars_interpreting_backslashes(glob);
    let last = fragments.len() - 1;
    let mut tokens = Vec::new();
    for (index, fragment) in fragments.into_iter().enumerate() {
        if !fragment.is_empty() {
            tokens.push(Token::Literal(fragment));
        }
        if index == last {
            break;
        }
        match tokens.last_mut() {
            Some(Token::Stars(count)) => *count += 1,
            _ => tokens.push(Token::Stars(1)),
        }
    }
    tokens
}

/// Translates a glob into an anchored regular expression over `/`-separated paths.
///
/// `*` matches within one path component. When it makes up a whole component on its
/// own it has to match at least one character. `**` must be a whole component that is
/// not the last one, and matches any number of whole components.
pub fn glob_to_path_regex(glob: &str) -> Result<String, GlobError> {
    let tokens = tokenize(glob);
    let mut regex = String::from("^");
    // Set after `**`, which already emitted the slash that closes its component.
    let mut skip_slash = false;

    for (index, token) in tokens.iter().enumerate() {
        match token {
            Token::Literal(literal) => {
                let literal = if skip_slash {
                    &literal['/'.len_utf8()..]
                } else {
                    literal.as_str()
                };
                skip_slash = false;
                regex.push_str(&regex_lite::escape(literal));
            }
            Token::Stars(count) => {
                let before = match index.checked_sub(1).map(|i| &tokens[i]) {
                    Some(Token::Literal(literal)) => Some(literal.as_str()),
                    _ => None,
                };
                let after = match tokens.get(index + 1) {
                    Some(Token::Literal(literal)) => Some(literal.as_str()),
                    _ => None,
                };
                let starts_component = before.map_or(true, |literal| literal.ends_with('/'));
                let ends_component = after.map_or(true, |literal| literal.starts_with('/'));
                let whole_component = starts_component && ends_component;

                match count {
                    1 if whole_component => regex.push_str(NON_EMPTY_COMPONENT),
                    1 => regex.push_str(ANY_CHARS_IN_COMPONENT),
                    2 if whole_component => {
                        let has_following_component = match after {
                            Some(literal) => literal.len() > 1 || index + 2 < tokens.len(),
                            None => false,
                        };
                        if !has_following_component {
                            return Err(GlobError::new(
                                glob,
                                "** may not be the last component in a path",
                            ));
                        }
                        regex.push_str(ANY_COMPONENTS);
                        skip_slash = true;
                        continue;
                    }
                    _ => {
                        return Err(GlobError::new(
                            glob,
                            "** must be an entire path component",
                        ))
                    }
                }
                skip_slash = false;
            }
        }
    }

    regex.push('$');
    Ok(regex)
}
