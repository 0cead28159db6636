//! Block-device discovery for the disk tests.
//!
//! Devices come from `lsblk -dno NAME,TYPE,SIZE`, keeping only rows whose
//! type is `disk` (partitions, loop devices and the like are ignored). The
//! picker runs before the test starts, so a plain blocking invocation is
//! fine here.

use std::process::Command;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disk {
    /// Device name without the `/dev/` prefix, e.g. `sda` or `nvme0n1`.
    pub name: String,
    pub size: String,
}

impl Disk {
    /// Label shown in the picker, e.g. `/dev/sda (256G)`.
    pub fn label(&self) -> String {
        format!("/dev/{} ({})", self.name, self.size)
    }
}

/// List the machine's disks. An empty result means `lsblk` is unavailable or
/// found nothing; the caller shows a message instead of starting the test.
pub fn discover() -> Vec<Disk> {
    let output = match Command::new("lsblk").args(["-dno", "NAME,TYPE,SIZE"]).output() {
        Ok(output) => output,
        Err(e) => {
            tracing::warn!("lsblk failed: {}", e);
            return Vec::new();
        }
    };
    parse_lsblk(&String::from_utf8_lossy(&output.stdout))
}

fn parse_lsblk(stdout: &str) -> Vec<Disk> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let name = parts.next()?;
            let kind = parts.next()?;
            let size = parts.next().unwrap_or("?");
            if kind == "disk" {
                Some(Disk {
                    name: name.to_string(),
                    size: size.to_string(),
                })
            } else {
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_keeps_only_disks() {
        let out = "sda    disk 256G\n\
                   sda1   part 255G\n\
                   nvme0n1 disk 1T\n\
                   loop0  loop 4K\n";
        let disks = parse_lsblk(out);
        assert_eq!(
            disks,
            vec![
                Disk {
                    name: "sda".to_string(),
                    size: "256G".to_string()
                },
                Disk {
                    name: "nvme0n1".to_string(),
                    size: "1T".to_string()
                },
            ]
        );
    }

    #[test]
    fn parse_tolerates_short_rows() {
        assert!(parse_lsblk("sda\n").is_empty());
        assert!(parse_lsblk("").is_empty());
    }

    #[test]
    fn label_formats_device_path() {
        let disk = Disk {
            name: "sda".to_string(),
            size: "256G".to_string(),
        };
        assert_eq!(disk.label(), "/dev/sda (256G)");
    }
}
