use super::Diagnostic;
use crate::ast::SourceMap;

/// One-line JSON rendering for `--json`.
pub fn render(d: &Diagnostic) -> String {
    let source_map = d.source.as_deref().map(SourceMap::new);

    let labels: Vec<serde_json::Value> = d
        .labels
        .iter()
        .enumerate()
        .map(|(i, l)| {
            let mut obj = serde_json::json!({
                "start": l.span.start,
                "end": l.span.end,
                "message": l.message,
                "primary": i == 0,
            });
            if let Some(map) = &source_map {
                let (line, col) = map.lookup(l.span.start);
                obj["line"] = serde_json::Value::from(line);
                obj["col"] = serde_json::Value::from(col);
            }
            obj
        })
        .collect();

    let mut obj = serde_json::json!({
        "severity": "error",
        "message": d.message,
        "labels": labels,
        "notes": d.notes,
    });

    if let Some(code) = d.code {
        obj["code"] = serde_json::Value::String(code.to_string());
    }

    if let Some(s) = &d.suggestion {
        obj["suggestion"] = serde_json::Value::String(s.clone());
    }

    serde_json::to_string(&obj).unwrap_or_else(|_| {
        r#"{"severity":"error","message":"internal error serializing diagnostic"}"#.to_string()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Span;

    fn parse_json(s: &str) -> serde_json::Value {
        serde_json::from_str(s).expect("valid JSON")
    }

    #[test]
    fn minimal_error() {
        let v = parse_json(&render(&Diagnostic::error("division by zero at ip 10")));
        assert_eq!(v["severity"], "error");
        assert_eq!(v["message"], "division by zero at ip 10");
        assert!(v["labels"].as_array().unwrap().is_empty());
        assert!(v.get("code").is_none());
        assert!(v.get("suggestion").is_none());
    }

    #[test]
    fn code_and_suggestion() {
        let d = Diagnostic::error("step budget exhausted after 5 instructions")
            .with_code("R009")
            .with_suggestion("raise --max-steps");
        let v = parse_json(&render(&d));
        assert_eq!(v["code"], "R009");
        assert_eq!(v["suggestion"], "raise --max-steps");
    }

    #[test]
    fn label_gets_line_and_col_from_source() {
        let d = Diagnostic::error("expected expression, got ')'")
            .with_span(Span { start: 6, end: 7 }, "here")
            .with_source("1 +\n (2 +)");
        let v = parse_json(&render(&d));
        let label = &v["labels"][0];
        assert_eq!(label["start"], 6);
        assert_eq!(label["end"], 7);
        assert_eq!(label["primary"], true);
        assert_eq!(label["line"], 2);
        assert_eq!(label["col"], 3);
    }

    #[test]
    fn only_first_label_is_primary() {
        let d = Diagnostic::error("bad")
            .with_span(Span { start: 0, end: 1 }, "first")
            .with_span(Span { start: 2, end: 3 }, "second");
        let v = parse_json(&render(&d));
        assert_eq!(v["labels"][0]["primary"], true);
        assert_eq!(v["labels"][1]["primary"], false);
    }

    #[test]
    fn label_without_source_has_no_position() {
        let d = Diagnostic::error("bad").with_span(Span { start: 5, end: 8 }, "here");
        let v = parse_json(&render(&d));
        assert!(v["labels"][0].get("line").is_none());
    }

    #[test]
    fn notes_are_listed() {
        let d = Diagnostic::error("bad").with_note("first").with_note("second");
        let v = parse_json(&render(&d));
        assert_eq!(v["notes"], serde_json::json!(["first", "second"]));
    }
}
