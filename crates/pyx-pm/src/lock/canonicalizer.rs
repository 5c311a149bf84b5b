use pyx_pep440::MarkerTree;

use super::{LockedCategory, LockedPackage};
use crate::pipfile::{Category, Origin, Specifier, VcsKind};
use crate::solver::{Dnf, Resolution};

/// Marker in its canonical rendering; `None` when it always holds
pub fn canonical_marker(marker: &MarkerTree) -> Option<String> {
    Dnf::from_marker(Some(marker)).render()
}

/// Locked form of a category.
///
/// Every resolved package becomes a pinned entry with its sorted hash set
/// and explicit index. Specifiers with an origin override bypass
/// resolution and are recorded as declared.
pub fn canonicalize(resolution: &Resolution, specifiers: &Category) -> LockedCategory {
    let mut entries = LockedCategory::new();

    for package in resolution.packages() {
        let mut entry = LockedPackage {
            hashes: package.hashes.iter().cloned().collect(),
            index: Some(package.source.clone()),
            markers: package.marker.clone(),
            version: Some(format!("=={}", package.version)),
            ..Default::default()
        };
        if let Some(specifier) = specifiers.get(&package.name) {
            entry.extras = sorted_extras(specifier);
        }
        entries.insert(package.name.to_string(), entry);
    }

    for specifier in specifiers.values().filter(|s| !s.is_resolvable()) {
        if let Some(entry) = origin_entry(specifier) {
            entries.insert(specifier.name.to_string(), entry);
        }
    }

    entries
}

/// Locked form of a specifier that names its own origin
pub fn origin_entry(specifier: &Specifier) -> Option<LockedPackage> {
    let origin = specifier.origin.as_ref()?;
    let mut entry = LockedPackage {
        editable: specifier.editable,
        extras: sorted_extras(specifier),
        markers: specifier.marker.as_ref().and_then(canonical_marker),
        ..Default::default()
    };
    match origin {
        Origin::Vcs { kind, url, rev } => {
            let url = Some(url.clone());
            match kind {
                VcsKind::Git => entry.git = url,
                VcsKind::Hg => entry.hg = url,
                VcsKind::Svn => entry.svn = url,
                VcsKind::Bzr => entry.bzr = url,
            }
            entry.reference = rev.clone();
        }
        Origin::Path(path) => entry.path = Some(path.clone()),
        Origin::File(url) => entry.file = Some(url.clone()),
    }
    Some(entry)
}

fn sorted_extras(specifier: &Specifier) -> Vec<String> {
    let mut extras: Vec<String> = specifier.extras.iter().map(|e| e.to_ascii_lowercase()).collect();
    extras.sort();
    extras.dedup();
    extras
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipfile::Pipfile;
    use crate::solver::{Policy, PoolBuilder, Request, Solver};

    fn category(pipfile: &str) -> Category {
        Pipfile::parse(pipfile)
            .unwrap()
            .model()
            .category("default")
            .cloned()
            .unwrap_or_default()
    }

    #[test]
    fn test_canonical_entries() {
        let specifiers = category(
            r#"
[packages]
Requests = { version = ">=2.0", extras = ["socks", "SOCKS", "brotli"] }
"#,
        );
        let pool = PoolBuilder::new()
            .package("requests", "2.31.0", &["idna>=2.5", "pywin32; sys_platform == 'win32'"])
            .package("idna", "3.6", &[])
            .package("pywin32", "306", &[])
            .build();
        let mut request = Request::new();
        request.require("requests", ">=2.0").unwrap();
        let policy = Policy::new();
        let resolution = Solver::new(&pool, &policy).solve(&request).unwrap();

        let locked = canonicalize(&resolution, &specifiers);
        let names: Vec<&str> = locked.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["idna", "pywin32", "requests"]);

        let requests = &locked["requests"];
        assert_eq!(requests.version.as_deref(), Some("==2.31.0"));
        assert_eq!(requests.index.as_deref(), Some("pypi"));
        assert_eq!(requests.extras, vec!["brotli", "socks"]);
        assert_eq!(requests.hashes.len(), 1);
        assert!(requests.hashes[0].starts_with("sha256:"));
        assert!(locked["idna"].extras.is_empty());
        assert_eq!(locked["pywin32"].markers.as_deref(), Some("sys_platform == 'win32'"));
    }

    #[test]
    fn test_origin_entries_skip_version_and_index() {
        let specifiers = category(
            r#"
[packages]
mylib = { git = "https://github.com/org/mylib.git", ref = "main", editable = true }
local = { path = "./local", markers = "os_name == 'posix'" }
"#,
        );
        let locked = canonicalize(&Resolution::new(), &specifiers);

        let mylib = &locked["mylib"];
        assert_eq!(mylib.git.as_deref(), Some("https://github.com/org/mylib.git"));
        assert_eq!(mylib.reference.as_deref(), Some("main"));
        assert!(mylib.editable);
        assert_eq!(mylib.version, None);
        assert_eq!(mylib.index, None);

        let local = &locked["local"];
        assert_eq!(local.path.as_deref(), Some("./local"));
        assert_eq!(local.markers.as_deref(), Some("os_name == 'posix'"));
    }

    #[test]
    fn test_canonical_marker_is_order_independent() {
        let a: MarkerTree = "sys_platform == 'linux' and python_version >= '3.8'".parse().unwrap();
        let b: MarkerTree = "python_version >= '3.8' and sys_platform == 'linux'".parse().unwrap();
        assert_eq!(canonical_marker(&a), canonical_marker(&b));
    }
}
