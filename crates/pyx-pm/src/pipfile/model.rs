//! In-memory view of a Pipfile

use std::collections::BTreeMap;
use std::fmt;

use pyx_pep440::{MarkerEnvironment, MarkerTree, MultiConstraint, PackageName, Requirement};
use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_PYTHON_VERSION;

/// Category of `[packages]`
pub const DEFAULT_CATEGORY: &str = "default";
/// Category of `[dev-packages]`
pub const DEVELOP_CATEGORY: &str = "develop";

/// Pipfile section holding a category's packages
pub fn section_for_category(category: &str) -> &str {
    match category {
        DEFAULT_CATEGORY => "packages",
        DEVELOP_CATEGORY => "dev-packages",
        other => other,
    }
}

/// Category stored in a Pipfile section
pub fn category_for_section(section: &str) -> &str {
    match section {
        "packages" => DEFAULT_CATEGORY,
        "dev-packages" => DEVELOP_CATEGORY,
        other => other,
    }
}

/// A package index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub name: String,
    pub url: String,
    pub verify_ssl: bool,
}

impl Source {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Source {
            name: name.into(),
            url: url.into(),
            verify_ssl: true,
        }
    }

    /// The implicit index used when a Pipfile declares none
    pub fn pypi() -> Self {
        Source::new("pypi", "https://pypi.org/simple")
    }
}

/// The `[requires]` block
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requires {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub python_full_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub python_version: Option<String>,
}

impl Requires {
    pub fn is_empty(&self) -> bool {
        self.python_full_version.is_none() && self.python_version.is_none()
    }

    /// Most specific interpreter version declared
    pub fn python(&self) -> Option<&str> {
        self.python_full_version
            .as_deref()
            .or(self.python_version.as_deref())
    }
}

/// The `[pipenv]` table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    pub allow_prereleases: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum VcsKind {
    Git,
    Hg,
    Svn,
    Bzr,
}

impl VcsKind {
    pub const ALL: [VcsKind; 4] = [VcsKind::Git, VcsKind::Hg, VcsKind::Svn, VcsKind::Bzr];

    pub fn as_str(&self) -> &'static str {
        match self {
            VcsKind::Git => "git",
            VcsKind::Hg => "hg",
            VcsKind::Svn => "svn",
            VcsKind::Bzr => "bzr",
        }
    }
}

/// Where a package comes from when it is not resolved from an index
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Origin {
    Vcs {
        kind: VcsKind,
        url: String,
        rev: Option<String>,
    },
    Path(String),
    File(String),
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Vcs { kind, url, rev } => {
                write!(f, "{}+{}", kind.as_str(), url)?;
                if let Some(rev) = rev {
                    write!(f, "@{}", rev)?;
                }
                Ok(())
            }
            Origin::Path(path) => write!(f, "path:{}", path),
            Origin::File(url) => write!(f, "file:{}", url),
        }
    }
}

/// A user-declared requirement on one package within one category
#[derive(Debug, Clone, PartialEq)]
pub struct Specifier {
    pub name: PackageName,
    /// Key as written in the Pipfile
    pub display_name: String,
    pub category: String,
    pub constraint: MultiConstraint,
    pub marker: Option<MarkerTree>,
    pub index: Option<String>,
    pub extras: Vec<String>,
    pub origin: Option<Origin>,
    pub editable: bool,
}

impl Specifier {
    pub fn new(name: PackageName, category: impl Into<String>, constraint: MultiConstraint) -> Self {
        Specifier {
            display_name: name.to_string(),
            name,
            category: category.into(),
            constraint,
            marker: None,
            index: None,
            extras: Vec::new(),
            origin: None,
            editable: false,
        }
    }

    /// Whether the entry is satisfied from an index rather than an origin override
    pub fn is_resolvable(&self) -> bool {
        self.origin.is_none()
    }

    pub fn applies_to_any(&self, environments: &[MarkerEnvironment]) -> bool {
        self.marker
            .as_ref()
            .map(|m| m.evaluate_any(environments))
            .unwrap_or(true)
    }

    pub fn as_requirement(&self) -> Requirement {
        Requirement {
            name: self.name.clone(),
            extras: self.extras.clone(),
            constraint: self.constraint.clone(),
            url: None,
            marker: self.marker.clone(),
        }
    }
}

impl fmt::Display for Specifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name)?;
        match &self.origin {
            Some(origin) => write!(f, " @ {}", origin)?,
            None if !self.constraint.is_any() => write!(f, "{}", self.constraint)?,
            None => {}
        }
        if let Some(marker) = &self.marker {
            write!(f, " ; {}", marker)?;
        }
        Ok(())
    }
}

pub type Category = BTreeMap<PackageName, Specifier>;

/// Everything the Pipfile declares
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpecifierModel {
    /// Declared sources in Pipfile order, possibly empty
    pub sources: Vec<Source>,
    pub requires: Requires,
    pub settings: Settings,
    pub categories: BTreeMap<String, Category>,
}

impl SpecifierModel {
    /// Declared sources, or the implicit PyPI source when none are declared.
    /// The first entry is the default index.
    pub fn effective_sources(&self) -> Vec<Source> {
        if self.sources.is_empty() {
            vec![Source::pypi()]
        } else {
            self.sources.clone()
        }
    }

    pub fn default_source(&self) -> Source {
        self.sources.first().cloned().unwrap_or_else(Source::pypi)
    }

    pub fn source(&self, name: &str) -> Option<Source> {
        self.effective_sources().into_iter().find(|s| s.name == name)
    }

    pub fn category(&self, name: &str) -> Option<&Category> {
        self.categories.get(name)
    }

    pub fn get(&self, category: &str, name: &PackageName) -> Option<&Specifier> {
        self.categories.get(category).and_then(|c| c.get(name))
    }

    /// Category names, `default` first then the rest alphabetically
    pub fn category_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.categories.keys().cloned().collect();
        names.sort_by_key(|name| (name != DEFAULT_CATEGORY, name.clone()));
        names
    }

    /// Interpreter version targeted by this project
    pub fn python_version(&self) -> String {
        self.requires
            .python()
            .unwrap_or(DEFAULT_PYTHON_VERSION)
            .to_string()
    }
}
