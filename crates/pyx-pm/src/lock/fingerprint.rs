use serde_json::{Map, Value};

use super::{canonical_marker, origin_entry, LockDocument};
use crate::pipfile::{Specifier, SpecifierModel};
use crate::util::sha256_hex;

/// SHA-256 over the canonical form of everything a lock depends on.
///
/// Formatting, comments, entry order, name spelling and clause order do
/// not change the result; any semantic change to a constraint, marker,
/// index, extra, origin, source or the `[requires]` block does.
pub fn fingerprint(model: &SpecifierModel) -> String {
    let mut root = Map::new();

    let mut meta = Map::new();
    meta.insert("requires".to_string(), serde_json::json!(model.requires));
    meta.insert("sources".to_string(), serde_json::json!(model.effective_sources()));
    root.insert("_meta".to_string(), Value::Object(meta));

    for (name, category) in &model.categories {
        if category.is_empty() {
            continue;
        }
        let entries: Map<String, Value> = category
            .values()
            .map(|specifier| (specifier.name.to_string(), specifier_value(specifier)))
            .collect();
        root.insert(name.clone(), Value::Object(entries));
    }

    // Value objects keep their keys sorted
    sha256_hex(Value::Object(root).to_string().as_bytes())
}

/// Whether `lock` was produced from a different model
pub fn is_stale(lock: &LockDocument, model: &SpecifierModel) -> bool {
    lock.fingerprint() != fingerprint(model)
}

fn specifier_value(specifier: &Specifier) -> Value {
    if let Some(entry) = origin_entry(specifier) {
        return serde_json::to_value(entry).unwrap_or(Value::Null);
    }

    let mut value = Map::new();
    value.insert("version".to_string(), Value::String(specifier.constraint.canonical()));
    if let Some(marker) = specifier.marker.as_ref().and_then(canonical_marker) {
        value.insert("markers".to_string(), Value::String(marker));
    }
    if let Some(index) = &specifier.index {
        value.insert("index".to_string(), Value::String(index.clone()));
    }
    if !specifier.extras.is_empty() {
        let mut extras: Vec<String> = specifier.extras.iter().map(|e| e.to_ascii_lowercase()).collect();
        extras.sort();
        extras.dedup();
        value.insert("extras".to_string(), serde_json::json!(extras));
    }
    Value::Object(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipfile::Pipfile;

    fn fp(pipfile: &str) -> String {
        fingerprint(Pipfile::parse(pipfile).unwrap().model())
    }

    #[test]
    fn test_stable_under_cosmetic_changes() {
        let a = fp(r#"
[packages]
requests = ">=2.0,<3"
Flask_Login = { version = "*", markers = "sys_platform == 'linux' and python_version >= '3.8'" }
"#);
        let b = fp(r#"
# reordered, respelled, commented
[packages]
flask-login = { markers = "python_version >= '3.8' and sys_platform == 'linux'" }
requests = "<3, >=2.0"

[dev-packages]
"#);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_stable_under_equivalent_versions() {
        assert_eq!(fp("[packages]\nsix = \">=1.0\"\n"), fp("[packages]\nsix = \">=1.0.0\"\n"));
        assert_eq!(fp("[packages]\nsix = \"==1.0\"\n"), fp("[packages]\nsix = \"==1.0.0\"\n"));
        assert_ne!(fp("[packages]\nsix = \"~=1.4\"\n"), fp("[packages]\nsix = \"~=1.4.0\"\n"));
    }

    #[test]
    fn test_changes_on_semantic_edits() {
        let base = fp("[packages]\nrequests = \">=2.0\"\n");
        assert_ne!(base, fp("[packages]\nrequests = \">=2.1\"\n"));
        assert_ne!(base, fp("[packages]\nrequests = { version = \">=2.0\", extras = [\"socks\"] }\n"));
        assert_ne!(base, fp("[dev-packages]\nrequests = \">=2.0\"\n"));
        assert_ne!(base, fp("[requires]\npython_version = \"3.11\"\n\n[packages]\nrequests = \">=2.0\"\n"));
        assert_ne!(
            base,
            fp("[packages]\nrequests = { git = \"https://github.com/psf/requests.git\" }\n")
        );
    }

    #[test]
    fn test_source_order_matters() {
        let a = fp(r#"
[[source]]
name = "pypi"
url = "https://pypi.org/simple"
verify_ssl = true

[[source]]
name = "internal"
url = "https://internal.example/simple"
verify_ssl = true
"#);
        let b = fp(r#"
[[source]]
name = "internal"
url = "https://internal.example/simple"
verify_ssl = true

[[source]]
name = "pypi"
url = "https://pypi.org/simple"
verify_ssl = true
"#);
        assert_ne!(a, b);
    }

    #[test]
    fn test_is_stale() {
        let pipfile = Pipfile::parse("[packages]\nsix = \"*\"\n").unwrap();
        let lock = LockDocument::new(pipfile.model());
        assert!(!is_stale(&lock, pipfile.model()));

        let edited = Pipfile::parse("[packages]\nsix = \">=1.16\"\n").unwrap();
        assert!(is_stale(&lock, edited.model()));
    }
}
