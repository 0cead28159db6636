//! The fixed catalog of diagnostic tests and the one-time tool probe.
//!
//! Every test is an argv vector, never a shell string, so arguments reach the
//! child process as discrete elements. Tool availability is resolved once at
//! startup and treated as read-only for the rest of the session; the menu
//! uses it to render `[MISSING]` markers and to refuse launching tests whose
//! binary cannot be found.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use thiserror::Error;

/// Token substituted with a user-selected block device before launch.
pub const DISK_PLACEHOLDER: &str = "{disk}";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestSpec {
    pub name: String,
    /// Menu section the test is listed under.
    pub section: String,
    /// Program followed by its fixed arguments.
    pub argv: Vec<String>,
    /// Binary that must resolve on PATH for the test to be runnable.
    pub required_bin: String,
}

impl TestSpec {
    pub fn new(name: &str, section: &str, argv: &[&str], required_bin: &str) -> Self {
        Self {
            name: name.to_string(),
            section: section.to_string(),
            argv: argv.iter().map(|a| a.to_string()).collect(),
            required_bin: required_bin.to_string(),
        }
    }

    /// Whether launching requires interactive disk selection first.
    pub fn needs_disk(&self) -> bool {
        self.argv.iter().any(|a| a.contains(DISK_PLACEHOLDER))
    }

    /// The argv with the placeholder replaced by the chosen device name
    /// (e.g. "sda"). Passing `None` returns the argv untouched.
    pub fn resolved_argv(&self, disk: Option<&str>) -> Vec<String> {
        match disk {
            Some(device) => self
                .argv
                .iter()
                .map(|a| a.replace(DISK_PLACEHOLDER, device))
                .collect(),
            None => self.argv.clone(),
        }
    }

    /// Human-readable command line for headers and `--list` output.
    pub fn command_line(&self) -> String {
        self.argv.join(" ")
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown test: {0}")]
    UnknownTest(String),
}

static CATALOG: Lazy<Vec<TestSpec>> = Lazy::new(|| {
    vec![
        // RAM
        TestSpec::new("RAM Usage", "RAM", &["free", "-h"], "free"),
        TestSpec::new("RAM Details", "RAM", &["cat", "/proc/meminfo"], "cat"),
        TestSpec::new(
            "RAM Stress Test (30s)",
            "RAM",
            &[
                "stress-ng", "--vm", "2", "--vm-bytes", "75%", "--cpu", "2", "--timeout", "30s",
            ],
            "stress-ng",
        ),
        TestSpec::new("Memtester 512M", "RAM", &["memtester", "512M", "1"], "memtester"),
        TestSpec::new(
            "Memory Speed",
            "RAM",
            &[
                "sysbench",
                "memory",
                "--memory-block-size=1M",
                "--memory-total-size=1G",
                "run",
            ],
            "sysbench",
        ),
        TestSpec::new("Swap Usage", "RAM", &["swapon", "--show"], "swapon"),
        // CPU
        TestSpec::new("CPU Info", "CPU", &["lscpu"], "lscpu"),
        TestSpec::new("CPU Details", "CPU", &["cat", "/proc/cpuinfo"], "cat"),
        TestSpec::new(
            "CPU Stress Test (20s)",
            "CPU",
            &["stress-ng", "--cpu", "4", "--timeout", "20s"],
            "stress-ng",
        ),
        TestSpec::new("Sysbench CPU", "CPU", &["sysbench", "cpu", "run"], "sysbench"),
        // Disk
        TestSpec::new("Smart Status", "Disk", &["smartctl", "-a", "/dev/{disk}"], "smartctl"),
        TestSpec::new("Disk Speed", "Disk", &["hdparm", "-tT", "/dev/{disk}"], "hdparm"),
        TestSpec::new("NVMe Smart Log", "Disk", &["nvme", "smart-log", "/dev/{disk}"], "nvme"),
        TestSpec::new("Disk Usage", "Disk", &["df", "-h"], "df"),
        // Sensors
        TestSpec::new("Sensors", "Sensors", &["sensors"], "sensors"),
        // Network
        TestSpec::new("Ping Test", "Network", &["ping", "-c", "4", "google.com"], "ping"),
        TestSpec::new("Speedtest Internet", "Network", &["speedtest-cli"], "speedtest-cli"),
        // GPU
        TestSpec::new("NVIDIA Info", "GPU", &["nvidia-smi"], "nvidia-smi"),
        // System
        TestSpec::new("Kernel & OS", "System", &["uname", "-a"], "uname"),
        TestSpec::new("Uptime", "System", &["uptime"], "uptime"),
        TestSpec::new("Top Processes", "System", &["top", "-b", "-n", "1"], "top"),
        TestSpec::new("Boot Analysis", "System", &["systemd-analyze"], "systemd-analyze"),
        // Battery
        TestSpec::new(
            "Battery Info",
            "Battery",
            &["upower", "-i", "/org/freedesktop/UPower/devices/battery_BAT0"],
            "upower",
        ),
        TestSpec::new("Battery Percentage", "Battery", &["acpi"], "acpi"),
    ]
});

/// The built-in test catalog, in menu order.
pub fn catalog() -> &'static [TestSpec] {
    &CATALOG
}

/// Catalog plus the session's tool availability map.
pub struct Registry {
    tests: Vec<TestSpec>,
    availability: HashMap<String, bool>,
}

impl Registry {
    /// Build the registry from the built-in catalog, resolving every
    /// required binary on PATH exactly once.
    pub fn probe() -> Self {
        Self::with_tests(catalog().to_vec())
    }

    /// Build a registry over an arbitrary test list (used by tests).
    pub fn with_tests(tests: Vec<TestSpec>) -> Self {
        let mut availability = HashMap::new();
        for test in &tests {
            availability
                .entry(test.required_bin.clone())
                .or_insert_with(|| which::which(&test.required_bin).is_ok());
        }
        Self {
            tests,
            availability,
        }
    }

    pub fn resolve(&self, name: &str) -> Result<&TestSpec, RegistryError> {
        self.tests
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| RegistryError::UnknownTest(name.to_string()))
    }

    pub fn is_available(&self, spec: &TestSpec) -> bool {
        self.availability
            .get(&spec.required_bin)
            .copied()
            .unwrap_or(false)
    }

    pub fn tests(&self) -> &[TestSpec] {
        &self.tests
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_names_are_unique() {
        let mut names: Vec<_> = catalog().iter().map(|t| t.name.as_str()).collect();
        names.sort_unstable();
        let before = names.len();
        names.dedup();
        assert_eq!(before, names.len(), "duplicate test names in the catalog");
    }

    #[test]
    fn catalog_argv_never_empty() {
        for test in catalog() {
            assert!(!test.argv.is_empty(), "{} has an empty argv", test.name);
            assert!(!test.required_bin.is_empty());
        }
    }

    #[test]
    fn catalog_contains_no_shell_metacharacters() {
        // The registry never invokes a shell, so pipes and redirections in an
        // argv element would be passed through literally and break the tool.
        for test in catalog() {
            for arg in &test.argv {
                assert!(
                    !arg.contains('|') && !arg.contains('>') && !arg.contains('<'),
                    "{} argv element {:?} looks like shell syntax",
                    test.name,
                    arg
                );
            }
        }
    }

    #[test]
    fn resolve_unknown_test_fails() {
        let registry = Registry::probe();
        let err = registry.resolve("No Such Test").unwrap_err();
        assert!(matches!(err, RegistryError::UnknownTest(_)));
    }

    #[test]
    fn disk_placeholder_substitution() {
        let spec = TestSpec::new("Smart", "Disk", &["smartctl", "-a", "/dev/{disk}"], "smartctl");
        assert!(spec.needs_disk());
        assert_eq!(
            spec.resolved_argv(Some("nvme0n1")),
            vec!["smartctl", "-a", "/dev/nvme0n1"]
        );
        assert_eq!(spec.resolved_argv(None), spec.argv);
    }

    #[test]
    fn plain_specs_do_not_need_disk() {
        let spec = TestSpec::new("Free", "RAM", &["free", "-h"], "free");
        assert!(!spec.needs_disk());
    }

    #[test]
    fn availability_is_probed_per_binary() {
        let registry = Registry::with_tests(vec![
            TestSpec::new("Echo A", "T", &["echo", "a"], "echo"),
            TestSpec::new("Gone", "T", &["definitely-not-a-real-tool-x"], "definitely-not-a-real-tool-x"),
        ]);
        let echo = registry.resolve("Echo A").unwrap();
        let gone = registry.resolve("Gone").unwrap();
        assert!(registry.is_available(echo));
        assert!(!registry.is_available(gone));
    }
}
