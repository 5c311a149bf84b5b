//! The attribute record markers are evaluated against

use super::MarkerVariable;

/// Values for every marker variable of one target environment
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MarkerEnvironment {
    pub os_name: String,
    pub sys_platform: String,
    pub platform_system: String,
    pub platform_machine: String,
    pub platform_python_implementation: String,
    pub implementation_name: String,
    pub implementation_version: String,
    pub platform_release: String,
    pub platform_version: String,
    pub python_version: String,
    pub python_full_version: String,
    /// Extra being installed; unset outside of extra evaluation
    pub extra: Option<String>,
}

impl MarkerEnvironment {
    /// The machine we run on, targeting a CPython interpreter of the given
    /// version (`3.12` or `3.12.4`)
    pub fn host(python: &str) -> Self {
        let (os_name, sys_platform, platform_system) = if cfg!(windows) {
            ("nt", "win32", "Windows")
        } else if cfg!(target_os = "macos") {
            ("posix", "darwin", "Darwin")
        } else {
            ("posix", "linux", "Linux")
        };
        let machine = match (std::env::consts::ARCH, sys_platform) {
            ("x86_64", "win32") => "AMD64",
            ("aarch64", "darwin") => "arm64",
            (arch, _) => arch,
        };
        Self::cpython(os_name, sys_platform, platform_system, machine, python)
    }

    pub fn linux(python: &str) -> Self {
        Self::cpython("posix", "linux", "Linux", "x86_64", python)
    }

    pub fn macos(python: &str) -> Self {
        Self::cpython("posix", "darwin", "Darwin", "arm64", python)
    }

    pub fn windows(python: &str) -> Self {
        Self::cpython("nt", "win32", "Windows", "AMD64", python)
    }

    /// One environment per supported operating system
    pub fn all_platforms(python: &str) -> Vec<Self> {
        vec![Self::linux(python), Self::macos(python), Self::windows(python)]
    }

    fn cpython(
        os_name: &str,
        sys_platform: &str,
        platform_system: &str,
        machine: &str,
        python: &str,
    ) -> Self {
        let (python_version, python_full_version) = split_python_version(python);
        MarkerEnvironment {
            os_name: os_name.to_string(),
            sys_platform: sys_platform.to_string(),
            platform_system: platform_system.to_string(),
            platform_machine: machine.to_string(),
            platform_python_implementation: "CPython".to_string(),
            implementation_name: "cpython".to_string(),
            implementation_version: python_full_version.clone(),
            platform_release: String::new(),
            platform_version: String::new(),
            python_version,
            python_full_version,
            extra: None,
        }
    }

    pub fn with_extra(mut self, extra: impl Into<String>) -> Self {
        self.extra = Some(extra.into());
        self
    }

    /// Value of a variable; an unset `extra` reads as the empty string
    pub fn get(&self, variable: MarkerVariable) -> &str {
        match variable {
            MarkerVariable::OsName => &self.os_name,
            MarkerVariable::SysPlatform => &self.sys_platform,
            MarkerVariable::PlatformSystem => &self.platform_system,
            MarkerVariable::PlatformMachine => &self.platform_machine,
            MarkerVariable::PlatformPythonImplementation => &self.platform_python_implementation,
            MarkerVariable::ImplementationName => &self.implementation_name,
            MarkerVariable::ImplementationVersion => &self.implementation_version,
            MarkerVariable::PlatformRelease => &self.platform_release,
            MarkerVariable::PlatformVersion => &self.platform_version,
            MarkerVariable::PythonVersion => &self.python_version,
            MarkerVariable::PythonFullVersion => &self.python_full_version,
            MarkerVariable::Extra => self.extra.as_deref().unwrap_or(""),
        }
    }
}

/// `3.12` -> (`3.12`, `3.12.0`), `3.12.4` -> (`3.12`, `3.12.4`)
fn split_python_version(python: &str) -> (String, String) {
    let parts: Vec<&str> = python.trim().split('.').collect();
    match parts.as_slice() {
        [major] => (format!("{}.0", major), format!("{}.0.0", major)),
        [major, minor] => (format!("{}.{}", major, minor), format!("{}.{}.0", major, minor)),
        [major, minor, ..] => (format!("{}.{}", major, minor), python.trim().to_string()),
        [] => (String::new(), String::new()),
    }
}
