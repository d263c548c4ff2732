use regex::Regex;
use serde::{Deserialize, Serialize};

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::WatchError;

fn repo_regex() -> &'static Regex {
    static REPO_REGEX: OnceLock<Regex> = OnceLock::new();
    REPO_REGEX.get_or_init(|| {
        Regex::new(r"^(?P<owner>[A-Za-z0-9-]{1,39})/(?P<name>[A-Za-z0-9_.-]{1,100})$")
            .expect("Failed to compile the repository name regex")
    })
}

/// A GitHub repository in `owner/name` form
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct RepoName {
    owner: String,
    name: String,
}

impl RepoName {
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl FromStr for RepoName {
    type Err = WatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || WatchError::Validation(format!("`{s}` is not an owner/name repository"));
        let captures = repo_regex().captures(s.trim()).ok_or_else(invalid)?;
        let name = &captures["name"];
        if name == "." || name == ".." {
            return Err(invalid());
        }
        Ok(Self {
            owner: captures["owner"].to_string(),
            name: name.to_string(),
        })
    }
}

impl TryFrom<String> for RepoName {
    type Error = WatchError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RepoName> for String {
    fn from(repo: RepoName) -> Self {
        repo.to_string()
    }
}

impl fmt::Display for RepoName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}
