use runguard::config::RunguardConfig;
use runguard::language;
use runguard::screen::ContentScreen;
use runguard::types::Language;

fn screen() -> ContentScreen {
    ContentScreen::new(&RunguardConfig::default())
}

#[test]
fn test_blocked_construct_named_per_language() {
    let cases = [
        ("import subprocess\nprint(1)", Language::Python, "subprocess"),
        ("eval(payload)", Language::Python, "eval"),
        ("int main(){ system(\"id\"); }", Language::C, "system"),
        ("int main(){ popen(cmd, \"r\"); }", Language::Cpp, "popen"),
        ("Runtime.getRuntime().exec(cmd);", Language::Java, "exec"),
        ("#!/bin/bash\nrm -rf /", Language::Shell, "rm"),
    ];

    for (source, lang, construct) in cases {
        let verdict = screen().scan(source, lang);
        assert!(!verdict.safe, "{:?} source should be unsafe", lang);
        assert!(
            verdict.violations.iter().any(|v| v.contains(construct)),
            "{:?} violations {:?} should name {}",
            lang,
            verdict.violations,
            construct
        );
    }
}

#[test]
fn test_oversized_script_rejected_alongside_other_checks() {
    let mut config = RunguardConfig::default();
    config.max_script_size = 32;
    let screen = ContentScreen::new(&config);

    let source = "import subprocess\nprint('aaaaaaaaaaaaaaaaaaaa')";
    let verdict = screen.scan(source, Language::Python);

    assert!(verdict.violations.iter().any(|v| v.contains("too large")));
    assert!(verdict.violations.iter().any(|v| v.contains("subprocess")));
}

#[test]
fn test_every_dangerous_metacharacter_rejected() {
    let screen = screen();
    for meta in [";", "&", "|", "`", "$", ">", "<", "*", "?"] {
        let verdict = screen.sanitize_command(&format!("python3 run.py {}", meta));
        assert!(!verdict.safe, "metacharacter {:?} must be refused", meta);
    }
}

#[test]
fn test_sanitize_is_case_insensitive_for_blocklist() {
    let screen = screen();
    assert!(!screen.sanitize_command("CURL http://example.com").safe);
    assert!(!screen.sanitize_command("curl http://example.com").safe);
}

#[test]
fn test_clean_submissions_pass() {
    let screen = screen();
    let verdict = screen.scan("print(\"hello\")", Language::Python);
    assert!(verdict.safe, "violations: {:?}", verdict.violations);

    let verdict = screen.scan("x = [i * i for i in range(10)]", Language::Python);
    assert!(verdict.safe);
}

#[test]
fn test_detect_is_deterministic_across_calls() {
    let samples = [
        "print(\"hello\")",
        "#include <stdio.h>\nint main() {}",
        "#!/bin/bash\nfoo",
        "public class A { public static void main(String[] a) {} }",
        "???",
    ];
    for sample in samples {
        let first = language::detect(sample);
        for _ in 0..20 {
            assert_eq!(language::detect(sample), first);
        }
    }
}

#[test]
fn test_malformed_python_is_violation_not_panic() {
    let verdict = screen().scan("def broken(:\n    ((((", Language::Python);
    assert!(!verdict.safe);
    assert!(verdict.violations.iter().any(|v| v.contains("syntax")));
}
