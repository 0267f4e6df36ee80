//! Pattern-based safety net on top of the allowlist: catches destructive
//! invocations (`rm -rf /`, fork bombs) even for an otherwise-allowlisted
//! program.

/// Safety level for a command.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandSafety {
    Safe,
    Dangerous(String),
}

impl CommandSafety {
    pub fn is_dangerous(&self) -> bool {
        matches!(self, CommandSafety::Dangerous(_))
    }

    pub fn reason(&self) -> String {
        match self {
            CommandSafety::Safe => "safe".to_string(),
            CommandSafety::Dangerous(reason) => reason.clone(),
        }
    }
}

#[derive(Debug, Default)]
pub struct SafetyChecker;

impl SafetyChecker {
    pub fn new() -> Self {
        SafetyChecker
    }

    pub fn assess(&self, command_str: &str, command: &str, args: &[String]) -> CommandSafety {
        let dangerous_patterns = [
            ("rm", "-rf"),
            ("rm", "-r"),
            ("mkfs", ""),
            ("dd", "if="),
            ("shred", ""),
            ("chmod", "-R"),
            ("chown", "-R"),
        ];

        for (cmd, pattern) in dangerous_patterns {
            if command == cmd && (pattern.is_empty() || args.iter().any(|arg| arg.contains(pattern))) {
                return CommandSafety::Dangerous(format!(
                    "'{command_str}' matches dangerous pattern: {cmd} {pattern}"
                ));
            }
        }

        let destructive_patterns = ["> /dev/sda", ":(){:|:&};:", "mv /", "rm -rf /"];
        for pattern in destructive_patterns {
            if command_str.contains(pattern) {
                return CommandSafety::Dangerous(format!("contains destructive pattern: {pattern}"));
            }
        }

        CommandSafety::Safe
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_rm_rf() {
        let checker = SafetyChecker::new();
        let safety = checker.assess("rm -rf /tmp/x", "rm", &["-rf".to_string(), "/tmp/x".to_string()]);
        assert!(safety.is_dangerous());
    }

    #[test]
    fn flags_fork_bomb() {
        let checker = SafetyChecker::new();
        let safety = checker.assess(":(){:|:&};:", ":(){", &[]);
        assert!(safety.is_dangerous());
    }

    #[test]
    fn plain_read_command_is_safe() {
        let checker = SafetyChecker::new();
        let safety = checker.assess("ls -la", "ls", &["-la".to_string()]);
        assert!(!safety.is_dangerous());
    }
}
