use grep::regex::RegexMatcher;
use grep::searcher::{Searcher, Sink, SinkMatch};
use std::error::Error;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use walkdir::WalkDir;

// Words that may not appear in comments. Matched case-sensitively.
const FORBIDDEN_WORDS: &[&str] = &[
    "FIXED", "CORRECTED", "FIX", "FIXES", "NEW", "CHANGED", "CHANGES", "CHANGE", "MODIFIED",
    "MODIFIES", "MODIFY", "UPDATED", "UPDATES", "UPDATE",
];

// Collects matching lines of one file so a single error can list all of them.
struct ViolationCollector {
    violations: Vec<String>,
    file_path: PathBuf,
    rule: Rule,
}

#[derive(Clone, Copy)]
enum Rule {
    UnderscorePrefix,
    ForbiddenWord,
    StarsInComment,
    UppercaseComment,
    AllowDeadCode,
}

impl Rule {
    fn explain(self) -> &'static str {
        match self {
            Rule::UnderscorePrefix => {
                "Underscore-prefixed names are not allowed in this project.\n   Either use the variable (removing the underscore) or remove it completely."
            }
            Rule::ForbiddenWord => {
                "Comments containing 'FIXED', 'CORRECTED', 'FIX', 'NEW', 'CHANGE', 'MODIFY', 'UPDATE' or their variants are not allowed.\n   Remove them completely rather than commenting them out."
            }
            Rule::StarsInComment => {
                "The '**' pattern is not allowed in regular comments (doc comments may use it)."
            }
            Rule::UppercaseComment => {
                "Comments where all alphabetic characters are uppercase are not allowed."
            }
            Rule::AllowDeadCode => {
                "#[allow(dead_code)] attributes are not allowed.\n   Either use the code or remove it completely."
            }
        }
    }

    fn pattern(self) -> String {
        match self {
            Rule::UnderscorePrefix => r"\b(_[a-zA-Z0-9_]+)\b".to_string(),
            Rule::ForbiddenWord => format!(r"(//|/\*).*(?:{})", FORBIDDEN_WORDS.join("|")),
            Rule::StarsInComment => r"(//|/\*).*\*\*".to_string(),
            Rule::UppercaseComment => r"(//|/\*).*".to_string(),
            Rule::AllowDeadCode => r"#\s*\[\s*allow\s*\(\s*dead_code\s*\)\s*\]".to_string(),
        }
    }

    // The build script itself names the forbidden patterns.
    fn skips_build_script(self) -> bool {
        !matches!(self, Rule::UnderscorePrefix)
    }
}

impl ViolationCollector {
    fn new(file_path: &Path, rule: Rule) -> Self {
        Self {
            violations: Vec::new(),
            file_path: file_path.to_path_buf(),
            rule,
        }
    }

    fn check_and_get_error_message(&self) -> Option<String> {
        if self.violations.is_empty() {
            return None;
        }
        let mut error_msg = format!(
            "\n❌ ERROR: Found {} violations in {}:\n",
            self.violations.len(),
            self.file_path.display()
        );
        for violation in &self.violations {
            error_msg.push_str(&format!("   {violation}\n"));
        }
        error_msg.push_str(&format!("\n⚠️ {}\n", self.rule.explain()));
        Some(error_msg)
    }

    fn keep(&self, line_text: &str) -> bool {
        let trimmed = line_text.trim_start();
        match self.rule {
            Rule::UnderscorePrefix => {
                let is_pure_comment = trimmed.starts_with("//") || line_text.contains("/*");
                // An underscore name between quotes is string content.
                let is_in_string = line_text
                    .split('"')
                    .enumerate()
                    .any(|(i, part)| i % 2 == 1 && part.contains('_'));
                !is_pure_comment && !is_in_string
            }
            Rule::StarsInComment => !is_doc_comment(line_text),
            Rule::UppercaseComment => {
                let comment_text = if let Some(rest) = trimmed.strip_prefix("///") {
                    rest
                } else if let Some(rest) = trimmed.strip_prefix("//") {
                    rest
                } else if let Some(idx) = line_text.find("/*") {
                    let rest = &line_text[idx + 2..];
                    rest.find("*/").map_or(rest, |end| &rest[..end])
                } else {
                    return false;
                };
                let mut letters = comment_text.chars().filter(|c| c.is_alphabetic()).peekable();
                letters.peek().is_some() && letters.all(char::is_uppercase)
            }
            Rule::ForbiddenWord | Rule::AllowDeadCode => true,
        }
    }
}

impl Sink for ViolationCollector {
    type Error = std::io::Error;

    fn matched(&mut self, _: &Searcher, mat: &SinkMatch) -> Result<bool, Self::Error> {
        let line_number = mat.line_number().unwrap_or(0);
        let line_text = std::str::from_utf8(mat.bytes()).unwrap_or("").trim_end();
        if self.keep(line_text) {
            self.violations.push(format!("{line_number}:{line_text}"));
        }
        Ok(true)
    }
}

fn is_doc_comment(line: &str) -> bool {
    line.trim_start().starts_with("///")
}

// Every Rust source of the crate, leaving out build output and the
// read-only reference material under ./examples.
fn rust_sources(include_build_script: bool) -> impl Iterator<Item = PathBuf> {
    WalkDir::new(".")
        .into_iter()
        .filter_entry(|e| !e.path().starts_with("./target") && !e.path().starts_with("./examples"))
        .filter_map(|e| e.ok())
        .filter(move |e| include_build_script || e.file_name() != "build.rs")
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
        .map(|e| e.into_path())
}

fn scan(rule: Rule) -> Result<(), Box<dyn Error>> {
    let matcher = RegexMatcher::new_line_matcher(&rule.pattern())?;
    let mut searcher = Searcher::new();
    for path in rust_sources(!rule.skips_build_script()) {
        if std::fs::read_to_string(&path).is_err() {
            continue;
        }
        let mut collector = ViolationCollector::new(&path, rule);
        searcher.search_path(&matcher, &path, &mut collector)?;
        if let Some(error_message) = collector.check_and_get_error_message() {
            return Err(error_message.into());
        }
    }
    Ok(())
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    println!("cargo:rustc-env=CITYMIND_BUILD_TIMESTAMP={timestamp}");

    for rule in [
        Rule::UnderscorePrefix,
        Rule::ForbiddenWord,
        Rule::StarsInComment,
        Rule::UppercaseComment,
        Rule::AllowDeadCode,
    ] {
        if let Err(e) = scan(rule) {
            // eprintln is what surfaces the message in cargo's output.
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}
