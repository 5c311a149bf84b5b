//! Export of locked entries as a pip requirements file

use std::collections::BTreeMap;

use super::{LockDocument, LockedPackage};

/// Render the entries of `categories` in pip's requirements format.
///
/// A name locked in several categories is written once, from the first
/// category listed. The first source becomes `-i`, every other one an
/// `--extra-index-url`.
pub fn requirements(lock: &LockDocument, categories: &[String], hashes: bool) -> String {
    let mut out = String::new();
    for (i, source) in lock.meta.sources.iter().enumerate() {
        let flag = if i == 0 { "-i" } else { "--extra-index-url" };
        out.push_str(&format!("{} {}\n", flag, source.url));
        if !source.verify_ssl {
            if let Some(host) = url::Url::parse(&source.url).ok().and_then(|u| u.host_str().map(str::to_string)) {
                out.push_str(&format!("--trusted-host {}\n", host));
            }
        }
    }

    let mut entries: BTreeMap<&str, &LockedPackage> = BTreeMap::new();
    for category in categories {
        for (name, entry) in lock.category(category).into_iter().flatten() {
            entries.entry(name.as_str()).or_insert(entry);
        }
    }
    for (name, entry) in entries {
        out.push_str(&requirement_line(name, entry, hashes));
        out.push('\n');
    }
    out
}

fn requirement_line(name: &str, entry: &LockedPackage, hashes: bool) -> String {
    let extras = if entry.extras.is_empty() {
        String::new()
    } else {
        format!("[{}]", entry.extras.join(","))
    };

    let mut line = match origin(entry) {
        Some(location) if entry.editable => return format!("-e {}", location),
        Some(location) if !extras.is_empty() => format!("{}#egg={}{}", location, name, extras),
        Some(location) => location,
        None => format!("{}{}{}", name, extras, entry.version.as_deref().unwrap_or("")),
    };
    if let Some(markers) = &entry.markers {
        line.push_str(&format!("; {}", markers));
    }
    if hashes && !entry.is_origin() {
        for hash in &entry.hashes {
            line.push_str(&format!(" --hash={}", hash));
        }
    }
    line
}

/// Direct reference of an origin entry
fn origin(entry: &LockedPackage) -> Option<String> {
    let vcs = [("git", &entry.git), ("hg", &entry.hg), ("svn", &entry.svn), ("bzr", &entry.bzr)];
    if let Some((scheme, url)) = vcs.into_iter().find_map(|(s, u)| u.as_ref().map(|u| (s, u))) {
        let reference = entry.reference.as_deref().map(|r| format!("@{}", r)).unwrap_or_default();
        return Some(format!("{}+{}{}", scheme, url, reference));
    }
    entry.path.clone().or_else(|| entry.file.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::LockedCategory;
    use crate::pipfile::{Pipfile, Source};

    fn lock() -> LockDocument {
        let model = Pipfile::parse("[packages]\nrequests = \"*\"\n").unwrap().model().clone();
        let mut lock = LockDocument::new(&model);
        let mut internal = Source::new("internal", "https://pypi.internal.example/simple");
        internal.verify_ssl = false;
        lock.meta.sources.push(internal);

        let mut default = LockedCategory::new();
        default.insert(
            "requests".to_string(),
            LockedPackage {
                extras: vec!["socks".to_string()],
                hashes: vec!["sha256:aa".to_string(), "sha256:bb".to_string()],
                index: Some("pypi".to_string()),
                version: Some("==2.31.0".to_string()),
                ..Default::default()
            },
        );
        default.insert(
            "pywin32".to_string(),
            LockedPackage {
                hashes: vec!["sha256:cc".to_string()],
                markers: Some("sys_platform == 'win32'".to_string()),
                version: Some("==306".to_string()),
                ..Default::default()
            },
        );
        default.insert(
            "mylib".to_string(),
            LockedPackage {
                editable: true,
                path: Some("./mylib".to_string()),
                ..Default::default()
            },
        );
        lock.set_category("default", default);

        let mut develop = LockedCategory::new();
        develop.insert(
            "requests".to_string(),
            LockedPackage {
                version: Some("==1.0".to_string()),
                ..Default::default()
            },
        );
        develop.insert(
            "toolkit".to_string(),
            LockedPackage {
                git: Some("https://github.com/org/toolkit.git".to_string()),
                reference: Some("v2".to_string()),
                ..Default::default()
            },
        );
        lock.set_category("develop", develop);
        lock
    }

    #[test]
    fn test_default_requirements() {
        let text = requirements(&lock(), &["default".to_string()], false);
        assert_eq!(
            text,
            "-i https://pypi.org/simple\n\
             --extra-index-url https://pypi.internal.example/simple\n\
             --trusted-host pypi.internal.example\n\
             -e ./mylib\n\
             pywin32==306; sys_platform == 'win32'\n\
             requests[socks]==2.31.0\n"
        );
    }

    #[test]
    fn test_hashes_are_appended() {
        let text = requirements(&lock(), &["default".to_string()], true);
        assert!(text.contains("requests[socks]==2.31.0 --hash=sha256:aa --hash=sha256:bb\n"));
        assert!(text.contains("pywin32==306; sys_platform == 'win32' --hash=sha256:cc\n"));
        assert!(text.contains("-e ./mylib\n"));
    }

    #[test]
    fn test_first_category_wins() {
        let text = requirements(&lock(), &["develop".to_string(), "default".to_string()], false);
        assert!(text.contains("requests==1.0\n"));
        assert!(!text.contains("requests[socks]"));
        assert!(text.contains("git+https://github.com/org/toolkit.git@v2\n"));
    }
}
