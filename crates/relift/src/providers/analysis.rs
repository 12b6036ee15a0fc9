//! Analysis providers for the first pipeline stage.
//!
//! The structured analyzer parses the legacy source for data-access
//! statements, business-logic markers and code patterns. The inference
//! analyzer is the general-purpose fallback: cheaper keyword heuristics,
//! same canonical payload shape, explicitly marked low-confidence.

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};

use crate::connector::{ProviderClient, ProviderError};

/// Words that match the data-access regexes but never name a table.
const NON_TABLE_WORDS: &[&str] = &["table", "into", "values", "where", "screen", "single"];

fn source_param(params: &Value) -> Result<&str, ProviderError> {
    let source = params
        .get("source")
        .and_then(Value::as_str)
        .ok_or_else(|| ProviderError::rejected("missing 'source' parameter"))?;
    if source.trim().is_empty() {
        return Err(ProviderError::rejected("source artifact is empty"));
    }
    Ok(source)
}

fn collect_tables(source: &str, regexes: &[&Regex]) -> Vec<String> {
    let mut tables = Vec::new();
    for re in regexes {
        for capture in re.captures_iter(source) {
            let name = capture[1].to_lowercase();
            if NON_TABLE_WORDS.contains(&name.as_str()) || tables.contains(&name) {
                continue;
            }
            tables.push(name);
        }
    }
    tables
}

/// Structured-analysis provider: statement-level parsing of the legacy
/// source.
pub struct StructuredAnalyzer {
    re_report: Regex,
    re_select_from: Regex,
    re_update: Regex,
    re_insert: Regex,
    re_modify: Regex,
}

impl StructuredAnalyzer {
    pub fn new() -> Self {
        Self {
            // Patterns are compiled from literals; they cannot fail.
            re_report: Regex::new(r"(?im)^\s*REPORT\s+([a-z0-9_]+)").unwrap(),
            re_select_from: Regex::new(r"(?i)\bFROM\s+([a-z][a-z0-9_]*)").unwrap(),
            re_update: Regex::new(r"(?i)\bUPDATE\s+([a-z][a-z0-9_]*)").unwrap(),
            re_insert: Regex::new(r"(?i)\bINSERT\s+(?:INTO\s+)?([a-z][a-z0-9_]*)").unwrap(),
            re_modify: Regex::new(r"(?i)\bMODIFY\s+([a-z][a-z0-9_]*)").unwrap(),
        }
    }

    fn analyze(&self, artifact_name: &str, source: &str) -> Value {
        let module = self
            .re_report
            .captures(source)
            .map(|c| c[1].to_lowercase())
            .unwrap_or_else(|| {
                artifact_name
                    .rsplit('/')
                    .next()
                    .unwrap_or(artifact_name)
                    .trim_end_matches(".abap")
                    .to_lowercase()
            });

        let tables = collect_tables(
            source,
            &[
                &self.re_select_from,
                &self.re_update,
                &self.re_insert,
                &self.re_modify,
            ],
        );

        let upper = source.to_uppercase();
        let mut business_logic = Vec::new();
        for (needles, label) in [
            (vec!["PRICE", "KBETR", "PRICING"], "pricing calculation"),
            (vec!["DISCOUNT"], "discount calculation"),
            (vec!["TAX", "MWST"], "tax calculation"),
            (vec!["CREDIT", "KLIMK"], "credit limit check"),
            (vec!["TOTAL", "SUM("], "amount aggregation"),
        ] {
            if needles.iter().any(|n| upper.contains(n)) {
                business_logic.push(label.to_string());
            }
        }

        let mut patterns = Vec::new();
        if upper.contains("AUTHORITY-CHECK") {
            patterns.push("authority-check".to_string());
        }
        if upper.contains("SELECT SINGLE") {
            patterns.push("single-row select".to_string());
        }
        if upper.contains("MESSAGE") {
            patterns.push("user messaging".to_string());
        }
        if upper.contains("IF ") || upper.contains("CASE ") {
            patterns.push("conditional branching".to_string());
        }
        if upper.contains("LOOP") || upper.contains("WHILE") {
            patterns.push("loop processing".to_string());
        }

        let lines_of_code = source.lines().filter(|l| !l.trim().is_empty()).count();
        let selects = self.re_select_from.find_iter(source).count();
        let branches = source
            .lines()
            .filter(|l| {
                let t = l.trim_start().to_uppercase();
                t.starts_with("IF ") || t.starts_with("CASE ") || t.starts_with("LOOP")
            })
            .count();
        let complexity = (1 + selects + branches).min(10);

        let documentation = format!(
            "Module {} reads {} table(s) ({}) and implements: {}.",
            module,
            tables.len(),
            tables.join(", "),
            if business_logic.is_empty() {
                "no recognized business rules".to_string()
            } else {
                business_logic.join(", ")
            }
        );

        json!({
            "module": module,
            "lines_of_code": lines_of_code,
            "complexity": complexity,
            "tables": tables,
            "business_logic": business_logic,
            "patterns": patterns,
            "documentation": documentation,
            "analyzer": "structured",
        })
    }
}

impl Default for StructuredAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderClient for StructuredAnalyzer {
    fn name(&self) -> &'static str {
        "structured-analyzer"
    }

    async fn call(&self, operation: &str, params: &Value) -> Result<Value, ProviderError> {
        if operation != "analyze" {
            return Err(ProviderError::rejected(format!(
                "unsupported operation '{}'",
                operation
            )));
        }
        let source = source_param(params)?;
        let artifact_name = params
            .get("artifact_name")
            .and_then(Value::as_str)
            .unwrap_or("artifact");
        Ok(self.analyze(artifact_name, source))
    }
}

/// General-purpose inference provider: keyword heuristics only, used when
/// structured analysis is unavailable.
pub struct InferredAnalyzer {
    re_from: Regex,
}

impl InferredAnalyzer {
    pub fn new() -> Self {
        Self {
            re_from: Regex::new(r"(?i)\bFROM\s+([a-z][a-z0-9_]*)").unwrap(),
        }
    }
}

impl Default for InferredAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderClient for InferredAnalyzer {
    fn name(&self) -> &'static str {
        "inference-analyzer"
    }

    async fn call(&self, operation: &str, params: &Value) -> Result<Value, ProviderError> {
        if operation != "analyze" {
            return Err(ProviderError::rejected(format!(
                "unsupported operation '{}'",
                operation
            )));
        }
        let source = source_param(params)?;
        let artifact_name = params
            .get("artifact_name")
            .and_then(Value::as_str)
            .unwrap_or("artifact");

        let tables = collect_tables(source, &[&self.re_from]);
        let lines_of_code = source.lines().filter(|l| !l.trim().is_empty()).count();
        let module = artifact_name
            .rsplit('/')
            .next()
            .unwrap_or(artifact_name)
            .trim_end_matches(".abap")
            .to_lowercase();

        Ok(json!({
            "module": module,
            "lines_of_code": lines_of_code,
            "complexity": (1 + tables.len()).min(10),
            "tables": tables,
            "business_logic": [],
            "patterns": [],
            "documentation": format!("Inferred summary of {}: {} non-empty lines.", module, lines_of_code),
            "analyzer": "inference",
            "confidence": "low",
        }))
    }
}

/// Closed set of analysis providers.
pub enum AnalysisProvider {
    Structured(StructuredAnalyzer),
    Inferred(InferredAnalyzer),
}

#[async_trait]
impl ProviderClient for AnalysisProvider {
    fn name(&self) -> &'static str {
        match self {
            AnalysisProvider::Structured(p) => p.name(),
            AnalysisProvider::Inferred(p) => p.name(),
        }
    }

    async fn call(&self, operation: &str, params: &Value) -> Result<Value, ProviderError> {
        match self {
            AnalysisProvider::Structured(p) => p.call(operation, params).await,
            AnalysisProvider::Inferred(p) => p.call(operation, params).await,
        }
    }
}
