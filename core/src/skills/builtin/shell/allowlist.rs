//! Command allowlist: which shell commands the `shell` skill may run
//! without an explicit `force: true`, and which are blocked outright.

use std::collections::HashSet;

/// Command categories for the allowlist.
#[derive(Debug, Clone)]
pub struct CommandAllowlist {
    read_commands: HashSet<String>,
    write_commands: HashSet<String>,
    system_commands: HashSet<String>,
    file_ops_commands: HashSet<String>,
    network_commands: HashSet<String>,
    custom_allowed: HashSet<String>,
    custom_blocked: HashSet<String>,
}

impl Default for CommandAllowlist {
    fn default() -> Self {
        CommandAllowlist {
            read_commands: HashSet::from([
                "ls".to_string(),
                "cat".to_string(),
                "head".to_string(),
                "tail".to_string(),
                "grep".to_string(),
                "find".to_string(),
                "which".to_string(),
                "whereis".to_string(),
                "file".to_string(),
                "stat".to_string(),
                "wc".to_string(),
                "cut".to_string(),
                "sort".to_string(),
                "uniq".to_string(),
                "tr".to_string(),
                "date".to_string(),
                "whoami".to_string(),
                "hostname".to_string(),
                "pwd".to_string(),
                "echo".to_string(),
                "printf".to_string(),
            ]),
            write_commands: HashSet::from(["echo".to_string(), "printf".to_string()]),
            system_commands: HashSet::from([
                "ps".to_string(),
                "top".to_string(),
                "htop".to_string(),
                "free".to_string(),
                "df".to_string(),
                "du".to_string(),
                "uname".to_string(),
                "uptime".to_string(),
                "vmstat".to_string(),
                "iostat".to_string(),
                "lspci".to_string(),
                "lsusb".to_string(),
                "dmidecode".to_string(),
            ]),
            file_ops_commands: HashSet::from([
                "mkdir".to_string(),
                "rmdir".to_string(),
                "touch".to_string(),
                "cp".to_string(),
                "mv".to_string(),
                "rm".to_string(),
                "chmod".to_string(),
                "chown".to_string(),
                "chgrp".to_string(),
                "ln".to_string(),
                "unlink".to_string(),
            ]),
            network_commands: HashSet::from([
                "ping".to_string(),
                "traceroute".to_string(),
                "mtr".to_string(),
                "nslookup".to_string(),
                "dig".to_string(),
                "curl".to_string(),
                "wget".to_string(),
                "ss".to_string(),
                "netstat".to_string(),
                "ip".to_string(),
                "ifconfig".to_string(),
            ]),
            custom_allowed: HashSet::new(),
            custom_blocked: HashSet::new(),
        }
    }
}

impl CommandAllowlist {
    pub fn is_allowed(&self, command: &str) -> bool {
        let cmd = command.trim();
        if self.custom_blocked.contains(cmd) {
            return false;
        }
        if self.custom_allowed.contains(cmd) {
            return true;
        }
        self.read_commands.contains(cmd)
            || self.write_commands.contains(cmd)
            || self.system_commands.contains(cmd)
            || self.file_ops_commands.contains(cmd)
            || self.network_commands.contains(cmd)
    }

    pub fn get_safety_level(&self, command: &str) -> AllowlistLevel {
        let cmd = command.trim();

        if self.custom_blocked.contains(cmd) {
            return AllowlistLevel::Blocked;
        }
        if self.custom_allowed.contains(cmd) {
            return AllowlistLevel::CustomAllowed;
        }
        if self.read_commands.contains(cmd) {
            return AllowlistLevel::Safe;
        }
        if self.system_commands.contains(cmd) {
            return AllowlistLevel::SystemInfo;
        }
        if self.write_commands.contains(cmd) {
            return AllowlistLevel::LimitedWrite;
        }
        if self.file_ops_commands.contains(cmd) || self.network_commands.contains(cmd) {
            return AllowlistLevel::RequiresForce;
        }
        AllowlistLevel::Unknown
    }
}

/// Allowlist safety levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllowlistLevel {
    Blocked,
    Safe,
    SystemInfo,
    LimitedWrite,
    RequiresForce,
    CustomAllowed,
    Unknown,
}

impl AllowlistLevel {
    pub fn requires_force(&self) -> bool {
        matches!(self, AllowlistLevel::RequiresForce | AllowlistLevel::Unknown)
    }

    pub fn description(&self) -> &'static str {
        match self {
            AllowlistLevel::Blocked => "blocked",
            AllowlistLevel::Safe => "safe",
            AllowlistLevel::SystemInfo => "system info",
            AllowlistLevel::LimitedWrite => "limited write",
            AllowlistLevel::RequiresForce => "requires --force",
            AllowlistLevel::CustomAllowed => "custom allowed",
            AllowlistLevel::Unknown => "unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_commands_are_safe() {
        let allowlist = CommandAllowlist::default();
        assert_eq!(allowlist.get_safety_level("ls"), AllowlistLevel::Safe);
        assert!(allowlist.is_allowed("ls"));
    }

    #[test]
    fn file_ops_require_force() {
        let allowlist = CommandAllowlist::default();
        assert_eq!(allowlist.get_safety_level("rm"), AllowlistLevel::RequiresForce);
        assert!(allowlist.get_safety_level("rm").requires_force());
    }

    #[test]
    fn unrecognized_command_is_unknown_and_requires_force() {
        let allowlist = CommandAllowlist::default();
        assert_eq!(allowlist.get_safety_level("some-made-up-binary"), AllowlistLevel::Unknown);
    }
}
