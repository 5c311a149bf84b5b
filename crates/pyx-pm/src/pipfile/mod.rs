//! Pipfile reading and editing
//!
//! The document is kept as a `toml_edit` tree next to the parsed
//! [`SpecifierModel`], so edits touch only the entries they change and
//! comments or unknown keys elsewhere survive untouched.

mod model;

pub use model::{
    category_for_section, section_for_category, Category, Origin, Requires, Settings, Source,
    Specifier, SpecifierModel, VcsKind, DEFAULT_CATEGORY, DEVELOP_CATEGORY,
};

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::Path;

use pyx_pep440::{MarkerTree, MarkerVariable, MultiConstraint, PackageName};
use toml_edit::{Array, ArrayOfTables, DocumentMut, InlineTable, Item, Table, TableLike, Value};

use crate::error::{Error, Result};
use crate::util::write_atomic;

/// Top-level tables that are not package categories
const RESERVED_SECTIONS: &[&str] = &["source", "requires", "pipenv", "scripts"];

/// A Pipfile: lossless TOML document plus its validated model
#[derive(Debug, Clone)]
pub struct Pipfile {
    document: DocumentMut,
    model: SpecifierModel,
}

impl Pipfile {
    pub fn parse(content: &str) -> Result<Self> {
        let document = content
            .parse::<DocumentMut>()
            .map_err(|e| Error::malformed(format!("invalid TOML: {}", e)))?;
        let model = parse_model(&document)?;
        Ok(Pipfile { document, model })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_atomic(path, self.document.to_string().as_bytes())
    }

    /// Build a fresh document from a model.
    ///
    /// Sections come out in a fixed order (sources, requires, pipenv, then
    /// categories with `default` and `develop` first) and entries sorted by
    /// normalized name.
    pub fn from_model(model: &SpecifierModel) -> Self {
        let mut document = DocumentMut::new();

        if !model.sources.is_empty() {
            let mut sources = ArrayOfTables::new();
            for source in &model.sources {
                let mut table = Table::new();
                table.insert("name", toml_edit::value(source.name.as_str()));
                table.insert("url", toml_edit::value(source.url.as_str()));
                table.insert("verify_ssl", toml_edit::value(source.verify_ssl));
                sources.push(table);
            }
            document.insert("source", Item::ArrayOfTables(sources));
        }

        if !model.requires.is_empty() {
            let mut table = Table::new();
            if let Some(version) = &model.requires.python_version {
                table.insert("python_version", toml_edit::value(version.as_str()));
            }
            if let Some(version) = &model.requires.python_full_version {
                table.insert("python_full_version", toml_edit::value(version.as_str()));
            }
            document.insert("requires", Item::Table(table));
        }

        if let Some(allow) = model.settings.allow_prereleases {
            let mut table = Table::new();
            table.insert("allow_prereleases", toml_edit::value(allow));
            document.insert("pipenv", Item::Table(table));
        }

        for category in model.category_names() {
            let mut table = Table::new();
            if let Some(entries) = model.category(&category) {
                for specifier in entries.values() {
                    table.insert(&specifier.display_name, specifier_item(specifier));
                }
            }
            document.insert(section_for_category(&category), Item::Table(table));
        }

        Pipfile {
            document,
            model: model.clone(),
        }
    }

    pub fn model(&self) -> &SpecifierModel {
        &self.model
    }

    /// Insert or overwrite the entry for `name` in `category`
    pub fn add_or_update(
        &mut self,
        category: &str,
        name: &str,
        constraint: &str,
        source: Option<&str>,
        marker: Option<&str>,
    ) -> Result<&Specifier> {
        let package = PackageName::new(name).map_err(|e| Error::malformed(e.to_string()))?;
        let constraint = constraint.parse::<MultiConstraint>().map_err(|e| {
            Error::malformed(format!("invalid version constraint for {}: {}", name, e))
        })?;
        let marker = marker
            .map(|m| m.parse::<MarkerTree>())
            .transpose()
            .map_err(|e| Error::malformed(format!("invalid marker for {}: {}", name, e)))?;
        if let Some(index) = source {
            if self.model.source(index).is_none() {
                return Err(Error::malformed(format!(
                    "{} references unknown source \"{}\"",
                    name, index
                )));
            }
        }

        let mut specifier = Specifier::new(package.clone(), category, constraint);
        specifier.display_name = name.trim().to_string();
        specifier.marker = marker;
        specifier.index = source.map(str::to_string);

        self.set_entry(category, &specifier);
        self.reload()?;

        log::debug!("Set {} in [{}]", specifier, section_for_category(category));
        self.model
            .get(category, &package)
            .ok_or_else(|| Error::NotFound {
                category: category.to_string(),
                name: package.to_string(),
            })
    }

    /// Write a fully-specified entry, replacing any entry with the same
    /// normalized name
    pub fn set_specifier(&mut self, specifier: &Specifier) -> Result<()> {
        if let Some(index) = &specifier.index {
            if self.model.source(index).is_none() {
                return Err(Error::malformed(format!(
                    "{} references unknown source \"{}\"",
                    specifier.display_name, index
                )));
            }
        }
        self.set_entry(&specifier.category, specifier);
        self.reload()
    }

    /// Delete the entry for `name` from `category`
    pub fn remove(&mut self, category: &str, name: &str) -> Result<Specifier> {
        let not_found = || Error::NotFound {
            category: category.to_string(),
            name: name.to_string(),
        };
        let package = PackageName::new(name).map_err(|_| not_found())?;
        let removed = self.model.get(category, &package).cloned().ok_or_else(not_found)?;

        if let Some(table) = self
            .document
            .get_mut(section_for_category(category))
            .and_then(Item::as_table_like_mut)
        {
            for key in matching_keys(table, &package) {
                table.remove(&key);
            }
        }
        self.reload()?;

        log::debug!("Removed {} from [{}]", removed, section_for_category(category));
        Ok(removed)
    }

    fn set_entry(&mut self, category: &str, specifier: &Specifier) {
        let section = section_for_category(category);
        if !self.document.contains_key(section) {
            self.document.insert(section, Item::Table(Table::new()));
        }
        if let Some(table) = self
            .document
            .get_mut(section)
            .and_then(Item::as_table_like_mut)
        {
            for key in matching_keys(table, &specifier.name) {
                if key != specifier.display_name {
                    table.remove(&key);
                }
            }
            table.insert(&specifier.display_name, specifier_item(specifier));
        }
    }

    fn reload(&mut self) -> Result<()> {
        self.model = parse_model(&self.document)?;
        Ok(())
    }
}

impl fmt::Display for Pipfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.document)
    }
}

fn matching_keys(table: &dyn TableLike, name: &PackageName) -> Vec<String> {
    table
        .iter()
        .filter(|(key, _)| PackageName::new(key).map(|n| &n == name).unwrap_or(false))
        .map(|(key, _)| key.to_string())
        .collect()
}

/// Serialized form of an entry: a bare string when only a constraint is
/// set, otherwise an inline table
fn specifier_item(specifier: &Specifier) -> Item {
    let simple = specifier.marker.is_none()
        && specifier.index.is_none()
        && specifier.extras.is_empty()
        && specifier.origin.is_none()
        && !specifier.editable;
    if simple {
        return toml_edit::value(specifier.constraint.to_string());
    }

    let mut table = InlineTable::new();
    if specifier.origin.is_none() || !specifier.constraint.is_any() {
        table.insert("version", Value::from(specifier.constraint.to_string()));
    }
    if !specifier.extras.is_empty() {
        let mut extras = Array::new();
        for extra in &specifier.extras {
            extras.push(extra.as_str());
        }
        table.insert("extras", Value::Array(extras));
    }
    if let Some(marker) = &specifier.marker {
        table.insert("markers", Value::from(marker.to_string()));
    }
    if let Some(index) = &specifier.index {
        table.insert("index", Value::from(index.as_str()));
    }
    match &specifier.origin {
        Some(Origin::Vcs { kind, url, rev }) => {
            table.insert(kind.as_str(), Value::from(url.as_str()));
            if let Some(rev) = rev {
                table.insert("ref", Value::from(rev.as_str()));
            }
        }
        Some(Origin::Path(path)) => {
            table.insert("path", Value::from(path.as_str()));
        }
        Some(Origin::File(url)) => {
            table.insert("file", Value::from(url.as_str()));
        }
        None => {}
    }
    if specifier.editable {
        table.insert("editable", Value::from(true));
    }
    Item::Value(Value::InlineTable(table))
}

fn parse_model(document: &DocumentMut) -> Result<SpecifierModel> {
    let mut model = SpecifierModel::default();

    if let Some(item) = document.get("source") {
        model.sources = parse_sources(item)?;
    }
    let mut names = HashSet::new();
    for source in &model.sources {
        if !names.insert(source.name.clone()) {
            return Err(Error::malformed(format!("duplicate source name \"{}\"", source.name)));
        }
    }

    if let Some(table) = document.get("requires").and_then(Item::as_table_like) {
        model.requires.python_version = table
            .get("python_version")
            .and_then(Item::as_str)
            .map(str::to_string);
        model.requires.python_full_version = table
            .get("python_full_version")
            .and_then(Item::as_str)
            .map(str::to_string);
    }

    if let Some(table) = document.get("pipenv").and_then(Item::as_table_like) {
        model.settings.allow_prereleases = table.get("allow_prereleases").and_then(Item::as_bool);
    }

    for (section, item) in document.iter() {
        if RESERVED_SECTIONS.contains(&section) {
            continue;
        }
        let Some(table) = item.as_table_like() else {
            log::debug!("Ignoring top-level key {} in Pipfile", section);
            continue;
        };
        let category = category_for_section(section).to_string();
        let entries = model.categories.entry(category.clone()).or_default();

        for (key, value) in table.iter() {
            let specifier = parse_entry(&category, key, value)?;
            if let Some(existing) = entries.get(&specifier.name) {
                return Err(Error::malformed(format!(
                    "duplicate package {} in [{}] (also declared as {})",
                    key, section, existing.display_name
                )));
            }
            entries.insert(specifier.name.clone(), specifier);
        }
    }

    for specifier in model.categories.values().flat_map(|c| c.values()) {
        if let Some(index) = &specifier.index {
            if model.source(index).is_none() {
                return Err(Error::malformed(format!(
                    "{} references unknown source \"{}\"",
                    specifier.display_name, index
                )));
            }
        }
    }

    Ok(model)
}

fn parse_sources(item: &Item) -> Result<Vec<Source>> {
    let mut tables: Vec<&dyn TableLike> = Vec::new();
    if let Some(array) = item.as_array_of_tables() {
        tables.extend(array.iter().map(|t| t as &dyn TableLike));
    } else if let Some(array) = item.as_array() {
        for value in array.iter() {
            let table = value
                .as_inline_table()
                .ok_or_else(|| Error::malformed("[[source]] entries must be tables"))?;
            tables.push(table as &dyn TableLike);
        }
    } else {
        return Err(Error::malformed("[[source]] must be an array of tables"));
    }

    tables
        .into_iter()
        .map(|table| {
            let name = table
                .get("name")
                .and_then(Item::as_str)
                .ok_or_else(|| Error::malformed("source without a name"))?;
            let url = table
                .get("url")
                .and_then(Item::as_str)
                .ok_or_else(|| Error::malformed(format!("source {} has no url", name)))?;
            let verify_ssl = table.get("verify_ssl").and_then(Item::as_bool).unwrap_or(true);
            Ok(Source {
                name: name.to_string(),
                url: url.to_string(),
                verify_ssl,
            })
        })
        .collect()
}

fn parse_constraint(name: &str, raw: &str) -> Result<MultiConstraint> {
    raw.parse::<MultiConstraint>()
        .map_err(|e| Error::malformed(format!("invalid version constraint for {}: {}", name, e)))
}

fn parse_entry(category: &str, key: &str, item: &Item) -> Result<Specifier> {
    let name = PackageName::new(key).map_err(|e| Error::malformed(e.to_string()))?;
    let mut specifier = Specifier::new(name, category, MultiConstraint::any());
    specifier.display_name = key.to_string();

    if let Some(raw) = item.as_str() {
        specifier.constraint = parse_constraint(key, raw)?;
        return Ok(specifier);
    }

    let table = item
        .as_table_like()
        .ok_or_else(|| Error::malformed(format!("{} must be a string or a table", key)))?;

    let mut markers = Vec::new();
    for (field, value) in table.iter() {
        match field {
            "version" => {
                let raw = value
                    .as_str()
                    .ok_or_else(|| Error::malformed(format!("{}.version must be a string", key)))?;
                specifier.constraint = parse_constraint(key, raw)?;
            }
            "markers" => {
                let raw = value
                    .as_str()
                    .ok_or_else(|| Error::malformed(format!("{}.markers must be a string", key)))?;
                markers.push(parse_marker(key, raw)?);
            }
            "index" => specifier.index = value.as_str().map(str::to_string),
            "extras" => {
                specifier.extras = value
                    .as_array()
                    .map(|a| a.iter().filter_map(|v| v.as_str()).map(str::to_string).collect())
                    .ok_or_else(|| Error::malformed(format!("{}.extras must be an array", key)))?;
            }
            "editable" => specifier.editable = value.as_bool().unwrap_or(false),
            "path" => specifier.origin = value.as_str().map(|p| Origin::Path(p.to_string())),
            "file" => specifier.origin = value.as_str().map(|u| Origin::File(u.to_string())),
            "ref" | "subdirectory" | "hashes" => {}
            other => {
                if let Some(kind) = VcsKind::ALL.iter().find(|k| k.as_str() == other) {
                    let url = value
                        .as_str()
                        .ok_or_else(|| Error::malformed(format!("{}.{} must be a string", key, other)))?;
                    specifier.origin = Some(Origin::Vcs {
                        kind: *kind,
                        url: url.to_string(),
                        rev: table.get("ref").and_then(Item::as_str).map(str::to_string),
                    });
                } else if MarkerVariable::parse(other).is_some() {
                    let raw = value.as_str().ok_or_else(|| {
                        Error::malformed(format!("{}.{} must be a string", key, other))
                    })?;
                    markers.push(parse_marker(key, &format!("{} {}", other, raw))?);
                } else {
                    log::debug!("Ignoring unknown key {}.{}", key, other);
                }
            }
        }
    }

    if !markers.is_empty() {
        specifier.marker = Some(MarkerTree::and(markers));
    }
    Ok(specifier)
}

fn parse_marker(name: &str, raw: &str) -> Result<MarkerTree> {
    raw.parse::<MarkerTree>()
        .map_err(|e| Error::malformed(format!("invalid marker for {}: {}", name, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    const PIPFILE: &str = r#"# project dependencies
[[source]]
url = "https://pypi.org/simple"
verify_ssl = true
name = "pypi"

[[source]]
url = "https://download.pytorch.org/whl/cpu"
verify_ssl = true
name = "pytorch"

[packages]
requests = ">=2.0,<3.0"  # http
Flask_SQLAlchemy = "*"
torch = {version = "==2.1.0", index = "pytorch"}
pywinusb = {version = "*", sys_platform = "== 'win32'"}
django = {git = "https://github.com/django/django.git", ref = "4.2", editable = true}

[dev-packages]
pytest = "*"

[docs]
sphinx = {version = ">=7", markers = "python_version >= '3.9'"}

[requires]
python_version = "3.11"

[pipenv]
allow_prereleases = false
custom_key = "kept"
"#;

    fn name(s: &str) -> PackageName {
        PackageName::new(s).unwrap()
    }

    #[test]
    fn test_parse_categories() {
        let pipfile = Pipfile::parse(PIPFILE).unwrap();
        let model = pipfile.model();

        assert_eq!(model.category_names(), vec!["default", "develop", "docs"]);
        assert_eq!(model.sources.len(), 2);
        assert_eq!(model.default_source().name, "pypi");
        assert_eq!(model.requires.python_version.as_deref(), Some("3.11"));
        assert_eq!(model.settings.allow_prereleases, Some(false));

        let default = model.category("default").unwrap();
        assert_eq!(default.len(), 5);
        let sqlalchemy = &default[&name("flask-sqlalchemy")];
        assert_eq!(sqlalchemy.display_name, "Flask_SQLAlchemy");
        assert!(sqlalchemy.constraint.is_any());

        let torch = &default[&name("torch")];
        assert_eq!(torch.index.as_deref(), Some("pytorch"));

        let pywinusb = &default[&name("pywinusb")];
        assert_eq!(
            pywinusb.marker.as_ref().unwrap().to_string(),
            "sys_platform == 'win32'"
        );

        let django = &default[&name("django")];
        assert!(django.editable);
        assert!(!django.is_resolvable());
        assert!(matches!(
            django.origin,
            Some(Origin::Vcs { kind: VcsKind::Git, ref rev, .. }) if rev.as_deref() == Some("4.2")
        ));

        let sphinx = &model.category("docs").unwrap()[&name("sphinx")];
        assert!(sphinx.marker.is_some());
    }

    #[test]
    fn test_malformed_inputs() {
        let cases = [
            "[packages]\nrequests = \">=banana\"\n",
            "[packages]\nrequests = \"*\"\nRequests = \"*\"\n",
            "[packages]\ntorch = {version = \"*\", index = \"nowhere\"}\n",
            "[packages]\nfoo = {version = \"*\", markers = \"bogus == '1'\"}\n",
            "[[source]]\nname = \"a\"\nurl = \"x\"\n[[source]]\nname = \"a\"\nurl = \"y\"\n",
            "[packages\n",
        ];
        for case in cases {
            let err = Pipfile::parse(case).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::MalformedSpecification, "{}", case);
        }
    }

    #[test]
    fn test_add_preserves_comments_and_unknown_keys() {
        let mut pipfile = Pipfile::parse(PIPFILE).unwrap();
        pipfile
            .add_or_update("default", "numpy", ">=1.26", None, None)
            .unwrap();
        let rendered = pipfile.to_string();

        assert!(rendered.starts_with("# project dependencies\n"));
        assert!(rendered.contains("requests = \">=2.0,<3.0\"  # http"));
        assert!(rendered.contains("custom_key = \"kept\""));
        assert!(rendered.contains("numpy = \">=1.26\""));
        assert!(pipfile.model().get("default", &name("numpy")).is_some());
    }

    #[test]
    fn test_add_or_update_is_idempotent() {
        let mut pipfile = Pipfile::parse(PIPFILE).unwrap();
        pipfile
            .add_or_update("default", "requests", ">=2.31", None, Some("os_name == 'posix'"))
            .unwrap();
        let once = pipfile.to_string();
        pipfile
            .add_or_update("default", "requests", ">=2.31", None, Some("os_name == 'posix'"))
            .unwrap();
        assert_eq!(once, pipfile.to_string());

        let spec = pipfile.model().get("default", &name("requests")).unwrap();
        assert_eq!(spec.constraint.to_string(), ">=2.31");
        assert!(spec.marker.is_some());
    }

    #[test]
    fn test_update_with_different_spelling_replaces_entry() {
        let mut pipfile = Pipfile::parse(PIPFILE).unwrap();
        pipfile
            .add_or_update("default", "flask-sqlalchemy", "==3.1.1", None, None)
            .unwrap();
        let rendered = pipfile.to_string();
        assert!(!rendered.contains("Flask_SQLAlchemy"));
        assert!(rendered.contains("flask-sqlalchemy = \"==3.1.1\""));
    }

    #[test]
    fn test_add_to_new_category_and_unknown_source() {
        let mut pipfile = Pipfile::parse("[packages]\n").unwrap();
        pipfile.add_or_update("develop", "pytest", "*", None, None).unwrap();
        assert!(pipfile.to_string().contains("[dev-packages]"));

        let err = pipfile
            .add_or_update("default", "torch", "*", Some("pytorch"), None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedSpecification);
    }

    #[test]
    fn test_remove() {
        let mut pipfile = Pipfile::parse(PIPFILE).unwrap();
        let removed = pipfile.remove("default", "flask-sqlalchemy").unwrap();
        assert_eq!(removed.display_name, "Flask_SQLAlchemy");
        assert!(!pipfile.to_string().contains("Flask_SQLAlchemy"));

        let err = pipfile.remove("default", "flask-sqlalchemy").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let err = pipfile.remove("develop", "requests").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_model_round_trip() {
        let model = Pipfile::parse(PIPFILE).unwrap().model().clone();
        let serialized = Pipfile::from_model(&model).to_string();
        let reparsed = Pipfile::parse(&serialized).unwrap();
        assert_eq!(reparsed.model(), &model);
    }

    #[test]
    fn test_from_model_is_deterministic() {
        let model = Pipfile::parse(PIPFILE).unwrap().model().clone();
        assert_eq!(
            Pipfile::from_model(&model).to_string(),
            Pipfile::from_model(&model).to_string()
        );
    }
}
