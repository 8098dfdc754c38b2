use std::collections::HashMap;

use serde_json::json;
use vulnscope::analysis::finding::Severity;
use vulnscope::analysis::tools::{
    map_tool_confidence, map_tool_severity, ToolIntegration, ToolParser,
};
use vulnscope::config::{EngineConfig, ToolSettings};

#[test]
fn severity_map_covers_names_and_numeric_levels() {
    assert_eq!(map_tool_severity("critical"), Severity::Critical);
    assert_eq!(map_tool_severity("HIGH"), Severity::High);
    assert_eq!(map_tool_severity("medium"), Severity::Medium);
    assert_eq!(map_tool_severity("low"), Severity::Low);
    assert_eq!(map_tool_severity("info"), Severity::Info);
    assert_eq!(map_tool_severity("0"), Severity::Info);
    assert_eq!(map_tool_severity("1"), Severity::Low);
    assert_eq!(map_tool_severity("2"), Severity::Medium);
    assert_eq!(map_tool_severity("3"), Severity::High);
    assert_eq!(map_tool_severity("4"), Severity::Critical);
    assert_eq!(map_tool_severity("surprising"), Severity::Medium);
}

#[test]
fn confidence_map_covers_names_and_numeric_levels() {
    assert_eq!(map_tool_confidence(Some("HIGH")), 0.9);
    assert_eq!(map_tool_confidence(Some("medium")), 0.7);
    assert_eq!(map_tool_confidence(Some("low")), 0.5);
    assert_eq!(map_tool_confidence(Some("0")), 0.3);
    assert_eq!(map_tool_confidence(Some("0.42")), 0.42);
    assert_eq!(map_tool_confidence(None), 0.7);
}

#[test]
fn bandit_parser_reads_results() {
    let output = json!({
        "results": [{
            "filename": "app.py",
            "line_number": 12,
            "issue_text": "subprocess call with shell=True",
            "issue_severity": "HIGH",
            "issue_confidence": "HIGH",
            "test_id": "B602",
        }]
    })
    .to_string();

    let issues = ToolParser::Bandit.parse(&output);
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].file_path, "app.py");
    assert_eq!(issues[0].line, 12);
    assert_eq!(issues[0].issue_type, "B602");
    assert_eq!(issues[0].confidence.as_deref(), Some("HIGH"));
}

#[test]
fn eslint_parser_flattens_file_messages() {
    let output = json!([{
        "filePath": "src/app.js",
        "messages": [
            {"line": 3, "message": "eval can be harmful", "severity": 2, "ruleId": "no-eval"},
            {"line": 9, "message": "unused variable", "severity": 1, "ruleId": "no-unused-vars"},
        ],
    }])
    .to_string();

    let issues = ToolParser::Eslint.parse(&output);
    assert_eq!(issues.len(), 2);
    assert_eq!(issues[0].severity, "high");
    assert_eq!(issues[1].severity, "medium");
    assert_eq!(issues[0].issue_type, "no-eval");
}

#[test]
fn semgrep_parser_maps_severity_labels() {
    let output = json!({
        "results": [{
            "check_id": "python.lang.security.audit.dangerous-subprocess-use",
            "path": "app.py",
            "start": {"line": 4},
            "extra": {"message": "dangerous subprocess", "severity": "ERROR"},
        }]
    })
    .to_string();

    let issues = ToolParser::Semgrep.parse(&output);
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].severity, "high");
    assert_eq!(issues[0].line, 4);
}

#[test]
fn gosec_parser_reads_issues() {
    let output = json!({
        "Issues": [{
            "file": "main.go",
            "line": "27",
            "details": "Potential hardcoded credentials",
            "severity": "MEDIUM",
            "confidence": "HIGH",
            "rule_id": "G101",
        }]
    })
    .to_string();

    let issues = ToolParser::Gosec.parse(&output);
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].line, 27);
    assert_eq!(issues[0].issue_type, "G101");
}

#[test]
fn pmd_parser_maps_priorities() {
    let output = json!({
        "files": [{
            "filename": "Main.java",
            "violations": [
                {"beginline": 5, "description": "Avoid concatenating SQL", "priority": 1, "rule": "SqlInjection"},
                {"beginline": 9, "description": "Style issue", "priority": 5, "rule": "Style"},
            ],
        }]
    })
    .to_string();

    let issues = ToolParser::Pmd.parse(&output);
    assert_eq!(issues.len(), 2);
    assert_eq!(issues[0].severity, "critical");
    assert_eq!(issues[1].severity, "info");
}

#[test]
fn generic_parser_accepts_json_list() {
    let output = json!([
        {"file": "x.c", "line": 3, "message": "strcpy is unsafe", "severity": "high", "type": "buffer"},
    ])
    .to_string();
    let issues = ToolParser::Generic.parse(&output);
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].file_path, "x.c");
}

#[test]
fn generic_parser_accepts_json_object_with_list_field() {
    let output = json!({"items": [
        {"path": "y.c", "line": 8, "message": "gets is unsafe", "severity": "critical"},
    ]})
    .to_string();
    let issues = ToolParser::Generic.parse(&output);
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].file_path, "y.c");
    assert_eq!(issues[0].severity, "critical");
}

#[test]
fn generic_parser_accepts_grep_style_lines() {
    let output = "src/main.c:14:unchecked buffer copy\nsrc/util.c:3:format string risk\nnot a finding line\n";
    let issues = ToolParser::Generic.parse(output);
    assert_eq!(issues.len(), 2);
    assert_eq!(issues[0].file_path, "src/main.c");
    assert_eq!(issues[0].line, 14);
    assert_eq!(issues[1].message, "format string risk");
}

#[test]
fn malformed_output_parses_to_nothing() {
    for parser in [
        ToolParser::Bandit,
        ToolParser::Eslint,
        ToolParser::Semgrep,
        ToolParser::Flawfinder,
        ToolParser::Pmd,
        ToolParser::Spotbugs,
        ToolParser::Gosec,
    ] {
        assert!(parser.parse("definitely { not json").is_empty());
    }
}

#[test]
fn convert_to_findings_maps_paths_and_drops_unknown_files() {
    let integration = ToolIntegration::new(&EngineConfig::default());
    let output = json!({
        "results": [
            {"filename": "known.py", "line_number": 1, "issue_text": "a", "issue_severity": "LOW", "issue_confidence": "LOW", "test_id": "B1"},
            {"filename": "unknown.py", "line_number": 2, "issue_text": "b", "issue_severity": "LOW", "issue_confidence": "LOW", "test_id": "B2"},
        ]
    })
    .to_string();
    let mut issues = ToolParser::Bandit.parse(&output);
    for issue in &mut issues {
        issue.tool = "bandit".to_string();
    }

    let mut file_id_map = HashMap::new();
    file_id_map.insert("known.py".to_string(), 5);

    let findings = integration.convert_to_findings(&issues, &file_id_map);
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].file_id, 5);
    assert_eq!(findings[0].severity, Severity::Low);
    assert_eq!(findings[0].confidence, 0.5);
    assert_eq!(findings[0].metadata["tool"], json!("bandit"));
}

#[test]
fn config_tools_are_registered_with_their_parser() {
    let mut config = EngineConfig::default();
    config.tools.insert(
        "mylinter".to_string(),
        ToolSettings {
            command: "mylinter".to_string(),
            parser: Some("generic".to_string()),
            language: Some("ruby".to_string()),
            args: vec!["--strict".to_string()],
            ..ToolSettings::default()
        },
    );

    let integration = ToolIntegration::new(&config);
    assert!(integration.registered_tools().contains(&"mylinter".to_string()));

    // Language filtering: the ruby tool and the universal semgrep apply.
    let ruby_tools = integration.tools_for_language("Ruby");
    let names: Vec<&str> = ruby_tools.iter().map(|t| t.name.as_str()).collect();
    assert!(names.contains(&"mylinter"));
    assert!(names.contains(&"semgrep"));
    assert!(!names.contains(&"bandit"));
}
